// src/validators/mod.rs — Validator rule trait and registry

pub mod builtin;
pub mod content_type;
pub mod devops;
pub mod external;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::task_abstraction::{self, scoring_weights};
use crate::core::types::{RiskLevel, RuleSeverity, TaskType, ValidationProfile, ValidationScore};
use crate::infra::errors::CrucibleError;
use crate::oss::pattern_store::PatternStore;

/// Shared context handed to every rule alongside the candidate code.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    pub task_type: Option<TaskType>,
    pub risk_level: Option<RiskLevel>,
    pub swecas_code: Option<i64>,
}

/// A single static check producing a ValidationScore.
///
/// Rules never surface failures as pipeline errors: a missing tool is a
/// passing score with a warning, diagnostics are encoded in the score.
/// An `Err` return means the rule itself crashed.
#[async_trait]
pub trait ValidatorRule: Send + Sync {
    fn name(&self) -> &str;

    fn weight(&self) -> f32;

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Error
    }

    async fn check(&self, code: &str, context: &RuleContext) -> Result<ValidationScore, CrucibleError>;
}

/// Registry of all known rules, keyed by name.
pub struct ValidatorRegistry {
    rules: HashMap<String, Arc<dyn ValidatorRule>>,
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Build the full registry: built-in Python rules, external Python
    /// analysers, and DevOps analysers. `weights` overrides the default
    /// per-rule weights (profile weighting).
    pub fn build(
        weights: &[(&str, f32)],
        pattern_store: Option<Arc<PatternStore>>,
        per_rule_timeout: Duration,
    ) -> Self {
        let weight = |name: &str, default: f32| -> f32 {
            weights
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, w)| *w)
                .unwrap_or(default)
        };

        let mut registry = Self::empty();

        // Built-in Python rules
        registry.register(Arc::new(builtin::AstSyntaxRule::new(weight("ast_syntax", 10.0))));
        registry.register(Arc::new(builtin::ForbiddenImportsRule::new(weight(
            "no_forbidden_imports",
            4.0,
        ))));
        registry.register(Arc::new(builtin::NoEvalExecRule::new(weight("no_eval_exec", 4.0))));
        registry.register(Arc::new(builtin::CodeLengthRule::new(weight("code_length", 1.0))));
        registry.register(Arc::new(builtin::ComplexityRule::new(weight("complexity", 1.5))));
        registry.register(Arc::new(builtin::DocstringRule::new(weight("docstring", 0.5))));
        registry.register(Arc::new(builtin::TypeHintsRule::new(weight("type_hints", 1.0))));
        registry.register(Arc::new(builtin::OssPatternsRule::new(
            weight("oss_patterns", 1.5),
            pattern_store,
        )));

        // External Python analysers
        registry.register(Arc::new(external::RuffRule::new(
            weight("static_ruff", 3.0),
            per_rule_timeout,
        )));
        registry.register(Arc::new(external::MypyRule::new(
            weight("static_mypy", 2.0),
            per_rule_timeout,
        )));
        registry.register(Arc::new(external::BanditRule::new(
            weight("static_bandit", 4.0),
            per_rule_timeout,
        )));

        // External DevOps analysers
        for rule in devops::all_devops_rules(per_rule_timeout) {
            registry.register(rule);
        }

        registry
    }

    pub fn register(&mut self, rule: Arc<dyn ValidatorRule>) {
        self.rules.insert(rule.name().to_string(), rule);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ValidatorRule>> {
        self.rules.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve an ordered list of rule names; unknown names are skipped with
    /// a log entry.
    pub fn resolve(&self, names: &[&str]) -> Vec<Arc<dyn ValidatorRule>> {
        let mut rules = Vec::new();
        for name in names {
            match self.get(name) {
                Some(rule) => rules.push(rule),
                None => tracing::warn!("Unknown validator rule '{}', skipping", name),
            }
        }
        rules
    }

    /// Rule set for a profile and detected content type.
    ///
    /// Non-Python content replaces the profile's rule list with the content
    /// type's DevOps rules. For Python, safe_fix and critical additionally
    /// run the external static analysers.
    pub fn rules_for(
        &self,
        profile: ValidationProfile,
        content_type: &str,
    ) -> Vec<Arc<dyn ValidatorRule>> {
        if let Some(devops_names) = task_abstraction::devops_rule_names(content_type) {
            return self.resolve(&devops_names);
        }

        let cfg = task_abstraction::profile_config(profile);
        let mut names = cfg.rule_names;
        if matches!(
            profile,
            ValidationProfile::SafeFix | ValidationProfile::Critical
        ) {
            names.extend(["static_ruff", "static_mypy", "static_bandit"]);
        }
        self.resolve(&names)
    }
}

/// Default registry for a profile: per-profile weights applied.
pub fn registry_for_profile(
    profile: ValidationProfile,
    pattern_store: Option<Arc<PatternStore>>,
    per_rule_timeout: Duration,
) -> ValidatorRegistry {
    ValidatorRegistry::build(&scoring_weights(profile), pattern_store, per_rule_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::build(&[], None, Duration::from_secs(5))
    }

    #[test]
    fn test_build_registers_all_families() {
        let r = registry();
        // 8 builtin + 3 external python + 10 devops
        assert_eq!(r.len(), 21);
        assert!(r.get("ast_syntax").is_some());
        assert!(r.get("static_ruff").is_some());
        assert!(r.get("kube-linter").is_some());
    }

    #[test]
    fn test_weight_override() {
        let r = ValidatorRegistry::build(&[("ast_syntax", 7.5)], None, Duration::from_secs(5));
        assert!((r.get("ast_syntax").unwrap().weight() - 7.5).abs() < 0.001);
        // Unmentioned rules keep defaults
        assert!((r.get("docstring").unwrap().weight() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_resolve_skips_unknown() {
        let r = registry();
        let rules = r.resolve(&["ast_syntax", "does_not_exist", "no_eval_exec"]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name(), "ast_syntax");
        assert_eq!(rules[1].name(), "no_eval_exec");
    }

    #[test]
    fn test_rules_for_fast_dev_python() {
        let r = registry();
        let rules = r.rules_for(ValidationProfile::FastDev, "python");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name(), "ast_syntax");
    }

    #[test]
    fn test_rules_for_critical_python_includes_analysers() {
        let r = registry();
        let rules = r.rules_for(ValidationProfile::Critical, "python");
        let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        for builtin in crate::core::task_abstraction::ALL_RULE_NAMES {
            assert!(names.contains(&builtin), "missing {}", builtin);
        }
        assert!(names.contains(&"static_bandit"));
    }

    #[test]
    fn test_rules_for_kubernetes_replaces_profile() {
        let r = registry();
        let rules = r.rules_for(ValidationProfile::SafeFix, "kubernetes");
        let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["yamllint", "kubeval", "kube-linter"]);
    }

    #[test]
    fn test_rules_for_bash() {
        let r = registry();
        let rules = r.rules_for(ValidationProfile::Balanced, "bash");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name(), "shellcheck");
    }
}
