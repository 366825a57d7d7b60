// src/core/task_abstraction.rs — TaskContext synthesiser
//
// Pure logic: consumes the outputs of the upstream classifiers (DUCS, SWECAS,
// complexity, code-gen detection, routing) and produces a single TaskContext.
// No I/O, no LLM calls.

use chrono::Utc;
use regex::Regex;

use crate::core::types::{Complexity, RiskLevel, TaskContext, TaskType, ValidationProfile};

/// SWECAS taxonomy ranges (opaque integers; only the ranges matter here).
pub const SECURITY_SWECAS: std::ops::Range<i64> = 500..600;
pub const PERFORMANCE_SWECAS: std::ops::Range<i64> = 800..900;

/// All 8 always-available rules, in pipeline order.
pub const ALL_RULE_NAMES: [&str; 8] = [
    "ast_syntax",
    "no_forbidden_imports",
    "no_eval_exec",
    "code_length",
    "complexity",
    "docstring",
    "type_hints",
    "oss_patterns",
];

/// Classifier output as received from an external taxonomy classifier.
#[derive(Debug, Clone, Default)]
pub struct ClassifierResult {
    pub code: Option<i64>,
    pub confidence: f32,
    pub fix_hint: String,
}

impl ClassifierResult {
    /// Code is only trusted above 0.5 confidence.
    pub fn accepted_code(&self) -> Option<i64> {
        if self.confidence >= 0.5 {
            self.code
        } else {
            None
        }
    }
}

/// Validation settings derived from a profile.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub rule_names: Vec<&'static str>,
    pub fail_fast: bool,
    pub parallel: bool,
}

/// Keyword regexes for task-type detection. The defaults cover English and
/// Russian phrasing; callers may supply their own sets.
pub struct TaskKeywords {
    bug_fix: Regex,
    refactor: Regex,
    explain: Regex,
    infra: Regex,
}

impl TaskKeywords {
    pub fn new(bug_fix: &str, refactor: &str, explain: &str, infra: &str) -> anyhow::Result<Self> {
        Ok(Self {
            bug_fix: Regex::new(&format!("(?i){}", bug_fix))?,
            refactor: Regex::new(&format!("(?i){}", refactor))?,
            explain: Regex::new(&format!("(?i){}", explain))?,
            infra: Regex::new(&format!("(?i){}", infra))?,
        })
    }
}

impl Default for TaskKeywords {
    fn default() -> Self {
        Self::new(
            r"(?:\b(?:fix|bug|error|crash|failing|broken)\b|исправ|баг|ошибк|сломан|падает)",
            r"(?:\b(?:refactor|restructure|clean\s*up|improve|simplify)\b|рефакторинг|упрост|улучш|реструктур|очист)",
            r"(?:\b(?:explain|what\s+is|how\s+does|why\s+does|describe)\b|объясн|что\s+тако|как\s+работ|почему|опиш)",
            r"(?:\b(?:kubernetes|k8s|terraform|helm|ansible|playbook|yaml|github\s*actions?|dockerfile|docker[\-\s]compose|kustomize|argocd|istio|ci/?cd|pipeline|workflow|shellcheck|bash\s+script|shell\s+script|helm\s+chart)\b|кубернет|терраформ|хельм|ансибл|плейбук|баш\s+скрипт)",
        )
        .expect("default task keyword regexes are valid")
    }
}

/// Execution mode hints passed down from the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Normal,
    Search,
    Deep,
}

pub struct TaskAbstraction {
    keywords: TaskKeywords,
}

impl Default for TaskAbstraction {
    fn default() -> Self {
        Self::new(TaskKeywords::default())
    }
}

impl TaskAbstraction {
    pub fn new(keywords: TaskKeywords) -> Self {
        Self { keywords }
    }

    /// Create a TaskContext from all available classification signals.
    #[allow(clippy::too_many_arguments)]
    pub fn classify(
        &self,
        query: &str,
        ducs: &ClassifierResult,
        swecas: &ClassifierResult,
        is_codegen: bool,
        is_command: bool,
        complexity: Complexity,
        mode: ExecutionMode,
    ) -> TaskContext {
        let task_type = self.determine_task_type(query, is_codegen, is_command, mode);
        let swecas_code = swecas.accepted_code();
        let risk_level = determine_risk(task_type, swecas_code, complexity);
        let profile = determine_profile(task_type, risk_level, complexity);
        let profile_cfg = profile_config(profile);

        TaskContext {
            query: query.to_string(),
            timestamp: Utc::now(),
            task_type,
            risk_level,
            validation_profile: profile,
            complexity,
            ducs_code: ducs.accepted_code(),
            ducs_confidence: ducs.confidence,
            swecas_code,
            swecas_confidence: swecas.confidence,
            fix_hint: if swecas.confidence >= 0.5 {
                swecas.fix_hint.clone()
            } else {
                String::new()
            },
            is_code_generation: is_codegen,
            is_command,
            use_multi_candidate: is_codegen
                && matches!(task_type, TaskType::CodeGen | TaskType::Infra),
            use_deep_mode: mode == ExecutionMode::Deep,
            fail_fast: profile_cfg.fail_fast,
            parallel_validation: profile_cfg.parallel,
        }
    }

    /// Priority: command > search > code_gen > bug_fix > refactor > explain
    /// > infra > general.
    fn determine_task_type(
        &self,
        query: &str,
        is_codegen: bool,
        is_command: bool,
        mode: ExecutionMode,
    ) -> TaskType {
        if is_command {
            return TaskType::Command;
        }
        if mode == ExecutionMode::Search {
            return TaskType::Search;
        }
        if is_codegen {
            return TaskType::CodeGen;
        }
        if self.keywords.bug_fix.is_match(query) {
            return TaskType::BugFix;
        }
        if self.keywords.refactor.is_match(query) {
            return TaskType::Refactor;
        }
        if self.keywords.explain.is_match(query) {
            return TaskType::Explain;
        }
        if self.keywords.infra.is_match(query) {
            return TaskType::Infra;
        }
        TaskType::General
    }
}

/// Risk rules, first match wins.
pub fn determine_risk(task_type: TaskType, swecas_code: Option<i64>, complexity: Complexity) -> RiskLevel {
    if let Some(code) = swecas_code {
        if SECURITY_SWECAS.contains(&code) {
            return RiskLevel::Critical;
        }
    }
    if complexity == Complexity::Critical {
        return RiskLevel::Critical;
    }
    if task_type == TaskType::BugFix && swecas_code.is_some() {
        return RiskLevel::High;
    }
    if let Some(code) = swecas_code {
        if PERFORMANCE_SWECAS.contains(&code) {
            return RiskLevel::High;
        }
    }
    if complexity == Complexity::Complex {
        return RiskLevel::High;
    }
    if matches!(task_type, TaskType::Command | TaskType::Explain) {
        return RiskLevel::Low;
    }
    if task_type == TaskType::CodeGen
        && matches!(complexity, Complexity::Trivial | Complexity::Simple)
    {
        return RiskLevel::Low;
    }
    RiskLevel::Medium
}

/// Map risk level + task type to a validation profile.
pub fn determine_profile(
    task_type: TaskType,
    risk_level: RiskLevel,
    complexity: Complexity,
) -> ValidationProfile {
    if risk_level == RiskLevel::Critical {
        return ValidationProfile::Critical;
    }
    if risk_level == RiskLevel::High {
        return ValidationProfile::SafeFix;
    }
    if matches!(task_type, TaskType::Command | TaskType::Explain) {
        return ValidationProfile::FastDev;
    }
    if complexity == Complexity::Trivial {
        return ValidationProfile::FastDev;
    }
    ValidationProfile::Balanced
}

/// Validation settings for a profile.
pub fn profile_config(profile: ValidationProfile) -> ProfileConfig {
    match profile {
        ValidationProfile::FastDev => ProfileConfig {
            rule_names: vec!["ast_syntax"],
            fail_fast: false,
            parallel: true,
        },
        ValidationProfile::Balanced => ProfileConfig {
            rule_names: vec![
                "ast_syntax",
                "no_forbidden_imports",
                "no_eval_exec",
                "complexity",
                "oss_patterns",
            ],
            fail_fast: false,
            parallel: true,
        },
        ValidationProfile::SafeFix => ProfileConfig {
            rule_names: ALL_RULE_NAMES.to_vec(),
            fail_fast: true,
            parallel: true,
        },
        ValidationProfile::Critical => ProfileConfig {
            rule_names: ALL_RULE_NAMES.to_vec(),
            fail_fast: true,
            // Sequential for maximum safety
            parallel: false,
        },
    }
}

/// DevOps rule names per detected content type. For non-Python content the
/// profile's rule list is replaced by these.
pub fn devops_rule_names(content_type: &str) -> Option<Vec<&'static str>> {
    match content_type {
        "kubernetes" => Some(vec!["yamllint", "kubeval", "kube-linter"]),
        "terraform" => Some(vec!["tflint", "checkov"]),
        "github_actions" => Some(vec!["yamllint", "actionlint"]),
        "ansible" => Some(vec!["yamllint", "ansible-lint"]),
        "helm" => Some(vec!["helm-lint"]),
        "bash" => Some(vec!["shellcheck"]),
        "docker_compose" => Some(vec!["yamllint", "docker-compose"]),
        "yaml" => Some(vec!["yamllint"]),
        _ => None,
    }
}

/// Validation config for a profile, adjusted for the detected content type.
pub fn config_for_content(content_type: &str, profile: ValidationProfile) -> ProfileConfig {
    let mut base = profile_config(profile);
    if let Some(names) = devops_rule_names(content_type) {
        base.rule_names = names;
    }
    base
}

/// Custom scoring weights per profile (validator name → weight).
pub fn scoring_weights(profile: ValidationProfile) -> Vec<(&'static str, f32)> {
    match profile {
        ValidationProfile::FastDev => vec![("ast_syntax", 10.0)],
        ValidationProfile::Critical => vec![
            ("ast_syntax", 10.0),
            ("static_ruff", 4.0),
            ("static_mypy", 3.0),
            // Extra weight on security
            ("static_bandit", 6.0),
            ("complexity", 2.0),
            ("docstring", 0.5),
            ("type_hints", 1.0),
            ("oss_patterns", 1.0),
            ("no_forbidden_imports", 5.0),
            ("no_eval_exec", 5.0),
        ],
        ValidationProfile::SafeFix => vec![
            ("ast_syntax", 10.0),
            ("static_ruff", 3.0),
            ("static_mypy", 2.5),
            ("static_bandit", 5.0),
            ("complexity", 2.0),
            ("docstring", 0.5),
            ("type_hints", 1.0),
            ("oss_patterns", 1.5),
            ("no_forbidden_imports", 4.0),
            ("no_eval_exec", 4.0),
        ],
        ValidationProfile::Balanced => vec![
            ("ast_syntax", 10.0),
            ("static_ruff", 3.0),
            ("static_mypy", 2.0),
            ("static_bandit", 4.0),
            ("complexity", 1.5),
            ("docstring", 0.5),
            ("oss_patterns", 1.5),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn abstraction() -> TaskAbstraction {
        TaskAbstraction::default()
    }

    fn classify(query: &str, is_codegen: bool, complexity: Complexity) -> TaskContext {
        abstraction().classify(
            query,
            &ClassifierResult::default(),
            &ClassifierResult::default(),
            is_codegen,
            false,
            complexity,
            ExecutionMode::Normal,
        )
    }

    // ─── Task type priority ─────────────────────────────────────

    #[test]
    fn test_command_wins() {
        let ctx = abstraction().classify(
            "fix the bug in read",
            &ClassifierResult::default(),
            &ClassifierResult::default(),
            true,
            true,
            Complexity::Moderate,
            ExecutionMode::Normal,
        );
        assert_eq!(ctx.task_type, TaskType::Command);
    }

    #[test]
    fn test_search_mode_beats_codegen() {
        let ctx = abstraction().classify(
            "write a parser",
            &ClassifierResult::default(),
            &ClassifierResult::default(),
            true,
            false,
            Complexity::Moderate,
            ExecutionMode::Search,
        );
        assert_eq!(ctx.task_type, TaskType::Search);
    }

    #[test]
    fn test_codegen_beats_keywords() {
        let ctx = classify("fix this by writing a function", true, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::CodeGen);
    }

    #[test]
    fn test_bug_fix_keywords() {
        let ctx = classify("there is a crash in app.py", false, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::BugFix);
    }

    #[test]
    fn test_bug_fix_russian() {
        let ctx = classify("исправь ошибку в app.py", false, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::BugFix);
    }

    #[test]
    fn test_refactor_keywords() {
        let ctx = classify("please refactor this module", false, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::Refactor);
    }

    #[test]
    fn test_explain_keywords() {
        let ctx = classify("explain how the router works", false, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::Explain);
    }

    #[test]
    fn test_infra_keywords() {
        let ctx = classify("deploy with kubernetes", false, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::Infra);
    }

    #[test]
    fn test_general_fallback() {
        let ctx = classify("tell me a story", false, Complexity::Moderate);
        assert_eq!(ctx.task_type, TaskType::General);
    }

    // ─── Risk rules ─────────────────────────────────────────────

    #[test]
    fn test_security_swecas_critical() {
        let risk = determine_risk(TaskType::CodeGen, Some(512), Complexity::Trivial);
        assert_eq!(risk, RiskLevel::Critical);
    }

    #[test]
    fn test_critical_complexity_critical() {
        let risk = determine_risk(TaskType::General, None, Complexity::Critical);
        assert_eq!(risk, RiskLevel::Critical);
    }

    #[test]
    fn test_bugfix_with_swecas_high() {
        let risk = determine_risk(TaskType::BugFix, Some(120), Complexity::Simple);
        assert_eq!(risk, RiskLevel::High);
    }

    #[test]
    fn test_performance_swecas_high() {
        let risk = determine_risk(TaskType::CodeGen, Some(810), Complexity::Simple);
        assert_eq!(risk, RiskLevel::High);
    }

    #[test]
    fn test_complex_high() {
        let risk = determine_risk(TaskType::General, None, Complexity::Complex);
        assert_eq!(risk, RiskLevel::High);
    }

    #[test]
    fn test_command_low() {
        assert_eq!(
            determine_risk(TaskType::Command, None, Complexity::Moderate),
            RiskLevel::Low
        );
        assert_eq!(
            determine_risk(TaskType::Explain, None, Complexity::Moderate),
            RiskLevel::Low
        );
    }

    #[test]
    fn test_trivial_codegen_low() {
        assert_eq!(
            determine_risk(TaskType::CodeGen, None, Complexity::Trivial),
            RiskLevel::Low
        );
        assert_eq!(
            determine_risk(TaskType::CodeGen, None, Complexity::Simple),
            RiskLevel::Low
        );
    }

    #[test]
    fn test_default_medium() {
        assert_eq!(
            determine_risk(TaskType::General, None, Complexity::Moderate),
            RiskLevel::Medium
        );
    }

    // ─── Profile rules ──────────────────────────────────────────

    #[test]
    fn test_critical_risk_critical_profile() {
        assert_eq!(
            determine_profile(TaskType::CodeGen, RiskLevel::Critical, Complexity::Moderate),
            ValidationProfile::Critical
        );
    }

    #[test]
    fn test_high_risk_safe_fix() {
        assert_eq!(
            determine_profile(TaskType::CodeGen, RiskLevel::High, Complexity::Moderate),
            ValidationProfile::SafeFix
        );
    }

    #[test]
    fn test_command_fast_dev() {
        assert_eq!(
            determine_profile(TaskType::Command, RiskLevel::Low, Complexity::Moderate),
            ValidationProfile::FastDev
        );
    }

    #[test]
    fn test_trivial_fast_dev() {
        assert_eq!(
            determine_profile(TaskType::CodeGen, RiskLevel::Low, Complexity::Trivial),
            ValidationProfile::FastDev
        );
    }

    #[test]
    fn test_default_balanced() {
        assert_eq!(
            determine_profile(TaskType::CodeGen, RiskLevel::Medium, Complexity::Moderate),
            ValidationProfile::Balanced
        );
    }

    // ─── Profile configs ────────────────────────────────────────

    #[test]
    fn test_fast_dev_config() {
        let cfg = profile_config(ValidationProfile::FastDev);
        assert_eq!(cfg.rule_names, vec!["ast_syntax"]);
        assert!(!cfg.fail_fast);
        assert!(cfg.parallel);
    }

    #[test]
    fn test_balanced_config() {
        let cfg = profile_config(ValidationProfile::Balanced);
        assert_eq!(cfg.rule_names.len(), 5);
        assert!(cfg.rule_names.contains(&"oss_patterns"));
    }

    #[test]
    fn test_safe_fix_config() {
        let cfg = profile_config(ValidationProfile::SafeFix);
        assert_eq!(cfg.rule_names.len(), 8);
        assert!(cfg.fail_fast);
        assert!(cfg.parallel);
    }

    #[test]
    fn test_critical_config_sequential() {
        let cfg = profile_config(ValidationProfile::Critical);
        assert_eq!(cfg.rule_names.len(), 8);
        assert!(cfg.fail_fast);
        assert!(!cfg.parallel);
    }

    // ─── Content-type overrides ─────────────────────────────────

    #[test]
    fn test_kubernetes_rules() {
        let cfg = config_for_content("kubernetes", ValidationProfile::Balanced);
        assert_eq!(cfg.rule_names, vec!["yamllint", "kubeval", "kube-linter"]);
    }

    #[test]
    fn test_terraform_rules() {
        assert_eq!(
            devops_rule_names("terraform"),
            Some(vec!["tflint", "checkov"])
        );
    }

    #[test]
    fn test_python_keeps_profile_rules() {
        let cfg = config_for_content("python", ValidationProfile::SafeFix);
        assert_eq!(cfg.rule_names.len(), 8);
    }

    #[test]
    fn test_unknown_keeps_profile_rules() {
        let cfg = config_for_content("unknown", ValidationProfile::FastDev);
        assert_eq!(cfg.rule_names, vec!["ast_syntax"]);
    }

    // ─── Derived flags ──────────────────────────────────────────

    #[test]
    fn test_context_flags_critical() {
        let swecas = ClassifierResult {
            code: Some(512),
            confidence: 0.9,
            fix_hint: "validate tokens server-side".into(),
        };
        let ctx = abstraction().classify(
            "implement JWT auth with token refresh",
            &ClassifierResult::default(),
            &swecas,
            true,
            false,
            Complexity::Critical,
            ExecutionMode::Normal,
        );
        assert_eq!(ctx.risk_level, RiskLevel::Critical);
        assert_eq!(ctx.validation_profile, ValidationProfile::Critical);
        assert!(ctx.fail_fast);
        assert!(!ctx.parallel_validation);
        assert!(ctx.use_multi_candidate);
        assert_eq!(ctx.swecas_code, Some(512));
        assert_eq!(ctx.fix_hint, "validate tokens server-side");
    }

    #[test]
    fn test_low_confidence_swecas_ignored() {
        let swecas = ClassifierResult {
            code: Some(512),
            confidence: 0.3,
            fix_hint: "hint".into(),
        };
        let ctx = abstraction().classify(
            "write hello world",
            &ClassifierResult::default(),
            &swecas,
            true,
            false,
            Complexity::Trivial,
            ExecutionMode::Normal,
        );
        assert_eq!(ctx.swecas_code, None);
        assert!(ctx.fix_hint.is_empty());
        assert_eq!(ctx.risk_level, RiskLevel::Low);
        assert_eq!(ctx.validation_profile, ValidationProfile::FastDev);
    }

    #[test]
    fn test_scoring_weights_fast_dev() {
        let w = scoring_weights(ValidationProfile::FastDev);
        assert_eq!(w, vec![("ast_syntax", 10.0)]);
    }

    #[test]
    fn test_scoring_weights_critical_security_heavy() {
        let w = scoring_weights(ValidationProfile::Critical);
        let bandit = w.iter().find(|(n, _)| *n == "static_bandit").unwrap().1;
        let ruff = w.iter().find(|(n, _)| *n == "static_ruff").unwrap().1;
        assert!(bandit > ruff);
    }
}
