// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What kind of task the user is requesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Command,
    CodeGen,
    BugFix,
    Refactor,
    Explain,
    Search,
    Infra,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::CodeGen => "code_gen",
            TaskType::BugFix => "bug_fix",
            TaskType::Refactor => "refactor",
            TaskType::Explain => "explain",
            TaskType::Search => "search",
            TaskType::Infra => "infra",
            TaskType::General => "general",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How risky the generated code could be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Five-level complexity label used to pick generation breadth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Trivial => "trivial",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::Critical => "critical",
        }
    }

    pub fn all() -> [Complexity; 5] {
        [
            Complexity::Trivial,
            Complexity::Simple,
            Complexity::Moderate,
            Complexity::Complex,
            Complexity::Critical,
        ]
    }

    pub fn parse(s: &str) -> Option<Complexity> {
        match s.to_lowercase().as_str() {
            "trivial" => Some(Complexity::Trivial),
            "simple" => Some(Complexity::Simple),
            "moderate" => Some(Complexity::Moderate),
            "complex" => Some(Complexity::Complex),
            "critical" => Some(Complexity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which validation pipeline to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationProfile {
    FastDev,
    Balanced,
    SafeFix,
    Critical,
}

impl ValidationProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationProfile::FastDev => "fast_dev",
            ValidationProfile::Balanced => "balanced",
            ValidationProfile::SafeFix => "safe_fix",
            ValidationProfile::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<ValidationProfile> {
        match s {
            "fast_dev" => Some(ValidationProfile::FastDev),
            "balanced" => Some(ValidationProfile::Balanced),
            "safe_fix" => Some(ValidationProfile::SafeFix),
            "critical" => Some(ValidationProfile::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValidationProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified task classification — created once per request, never mutated
/// after the profile override is applied at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub query: String,
    pub timestamp: DateTime<Utc>,

    pub task_type: TaskType,
    pub risk_level: RiskLevel,
    pub validation_profile: ValidationProfile,
    pub complexity: Complexity,

    // Optional classifier fields
    pub ducs_code: Option<i64>,
    pub ducs_confidence: f32,
    pub swecas_code: Option<i64>,
    pub swecas_confidence: f32,
    pub fix_hint: String,

    // Derived flags
    pub is_code_generation: bool,
    pub is_command: bool,
    pub use_multi_candidate: bool,
    pub use_deep_mode: bool,

    // Validation control
    pub fail_fast: bool,
    pub parallel_validation: bool,
}

impl TaskContext {
    /// Serialize a compact view for logging.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "query": self.query.chars().take(100).collect::<String>(),
            "task_type": self.task_type.as_str(),
            "risk_level": self.risk_level.as_str(),
            "validation_profile": self.validation_profile.as_str(),
            "complexity": self.complexity.as_str(),
            "swecas_code": self.swecas_code,
            "is_code_generation": self.is_code_generation,
            "fail_fast": self.fail_fast,
            "parallel_validation": self.parallel_validation,
        })
    }
}

/// Plan produced by the adaptive strategy for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub n_candidates: u8,
    pub temperatures: Vec<f32>,
    pub complexity: Complexity,
    pub estimated_time: Duration,
    pub reasoning: String,
    pub confidence: f32,
}

/// Result of a single validator run on a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationScore {
    pub validator_name: String,
    pub passed: bool,
    pub score: f32,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub weight: f32,
    pub severity: RuleSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Error,
    Warning,
    Info,
}

impl ValidationScore {
    pub fn passing(name: impl Into<String>, score: f32, weight: f32) -> Self {
        Self {
            validator_name: name.into(),
            passed: true,
            score,
            errors: Vec::new(),
            warnings: Vec::new(),
            weight,
            severity: RuleSeverity::Error,
        }
    }

    pub fn failing(name: impl Into<String>, score: f32, weight: f32, errors: Vec<String>) -> Self {
        Self {
            validator_name: name.into(),
            passed: false,
            score,
            errors,
            warnings: Vec::new(),
            weight,
            severity: RuleSeverity::Error,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_severity(mut self, severity: RuleSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
    Generating,
    Generated,
    Validated,
    Failed,
    Rejected,
}

/// One attempt at code generation for a single task at a specific temperature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u32,
    pub task_id: String,
    pub code: String,
    pub temperature: f32,
    pub seed: u64,
    pub model: String,
    pub status: CandidateStatus,
    #[serde(default)]
    pub validation_scores: Vec<ValidationScore>,
    pub total_score: f32,
    pub generation_time: Duration,
    pub validation_time: Duration,
}

impl Candidate {
    pub fn new(id: u32, task_id: impl Into<String>, temperature: f32, seed: u64, model: impl Into<String>) -> Self {
        Self {
            id,
            task_id: task_id.into(),
            code: String::new(),
            temperature,
            seed,
            model: model.into(),
            status: CandidateStatus::Pending,
            validation_scores: Vec::new(),
            total_score: 0.0,
            generation_time: Duration::ZERO,
            validation_time: Duration::ZERO,
        }
    }

    /// Append a validation score and recompute the total score.
    pub fn add_validation(&mut self, score: ValidationScore) {
        self.validation_scores.push(score);
        self.total_score = super::scorer::total_score(&self.validation_scores);
    }

    pub fn all_passed(&self) -> bool {
        !self.validation_scores.is_empty() && self.validation_scores.iter().all(|s| s.passed)
    }

    /// Names of validators that failed on this candidate.
    pub fn failed_rules(&self) -> Vec<&str> {
        self.validation_scores
            .iter()
            .filter(|s| !s.passed)
            .map(|s| s.validator_name.as_str())
            .collect()
    }
}

/// All candidates generated for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidatePool {
    pub task_id: String,
    pub candidates: Vec<Candidate>,
    /// Id of the best candidate, set by the validation pipeline.
    pub best_id: Option<u32>,
    pub all_passed: bool,
}

impl CandidatePool {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            candidates: Vec::new(),
            best_id: None,
            all_passed: false,
        }
    }

    pub fn add(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    pub fn size(&self) -> usize {
        self.candidates.len()
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best_id
            .and_then(|id| self.candidates.iter().find(|c| c.id == id))
    }
}

/// Result of one full pipeline run (generation + validation).
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub pool: CandidatePool,
    pub all_passed: bool,
    pub generation_time: Duration,
    pub validation_time: Duration,
    pub total_time: Duration,
}

impl PipelineOutcome {
    pub fn best(&self) -> Option<&Candidate> {
        self.pool.best()
    }

    pub fn best_score(&self) -> f32 {
        self.best().map(|c| c.total_score).unwrap_or(0.0)
    }

    pub fn best_code(&self) -> &str {
        self.best().map(|c| c.code.as_str()).unwrap_or("")
    }
}
