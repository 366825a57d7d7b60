// src/core/pipeline.rs — Generation + validation pipeline
//
// Validates each candidate against the selected rule set. Rule results are
// stored in input-rule order regardless of completion order; fail-fast stops
// at the first error-severity failure. A rule that crashes twice in a row is
// soft-disabled for the rest of the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;

use crate::core::generator::CandidateGenerator;
use crate::core::scorer;
use crate::core::types::{
    Candidate, CandidatePool, CandidateStatus, PipelineOutcome, RuleSeverity, ValidationProfile,
    ValidationScore,
};
use crate::infra::errors::CrucibleError;
use crate::validators::{RuleContext, ValidatorRegistry, ValidatorRule};

/// Per-run options assembled by the agent from the TaskContext and plan.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub task_id: String,
    pub profile: ValidationProfile,
    pub n_candidates: u8,
    pub temperatures: Vec<f32>,
    pub parallel_generation: bool,
    pub fail_fast: bool,
    pub parallel_validation: bool,
    pub context: RuleContext,
    /// Extra prompt context (OSS patterns, working memory), appended as-is.
    pub prompt_context: Vec<String>,
}

impl RunOptions {
    pub fn new(task_id: impl Into<String>, profile: ValidationProfile) -> Self {
        Self {
            task_id: task_id.into(),
            profile,
            n_candidates: 1,
            temperatures: vec![0.5],
            parallel_generation: true,
            fail_fast: false,
            parallel_validation: true,
            context: RuleContext::default(),
            prompt_context: Vec::new(),
        }
    }
}

/// Anything the self-correction loop can drive. The production implementation
/// is [`CodegenPipeline`]; tests script their own.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, query: &str, opts: &RunOptions) -> Result<PipelineOutcome, CrucibleError>;
}

/// Validates candidates against rule sets.
pub struct ValidationPipeline {
    /// Consecutive crash count per rule name; two in a row soft-disables.
    crash_counts: Mutex<HashMap<String, u32>>,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationPipeline {
    pub fn new() -> Self {
        Self {
            crash_counts: Mutex::new(HashMap::new()),
        }
    }

    fn is_disabled(&self, rule: &str) -> bool {
        self.crash_counts
            .lock()
            .expect("crash count lock")
            .get(rule)
            .map(|c| *c >= 2)
            .unwrap_or(false)
    }

    fn note_crash(&self, rule: &str) {
        let mut counts = self.crash_counts.lock().expect("crash count lock");
        let entry = counts.entry(rule.to_string()).or_insert(0);
        *entry += 1;
        if *entry >= 2 {
            tracing::warn!("Rule '{}' crashed twice in a row, disabling for this session", rule);
        }
    }

    fn note_success(&self, rule: &str) {
        self.crash_counts
            .lock()
            .expect("crash count lock")
            .remove(rule);
    }

    async fn run_rule(
        &self,
        rule: &Arc<dyn ValidatorRule>,
        code: &str,
        context: &RuleContext,
        per_rule_timeout: Duration,
    ) -> ValidationScore {
        let effective = rule.timeout().min(per_rule_timeout);
        match tokio::time::timeout(effective, rule.check(code, context)).await {
            Err(_) => ValidationScore::failing(
                rule.name(),
                0.0,
                rule.weight(),
                vec![format!(
                    "{} timed out after {}s",
                    rule.name(),
                    effective.as_secs()
                )],
            ),
            Ok(Err(e)) => {
                self.note_crash(rule.name());
                ValidationScore::failing(
                    rule.name(),
                    0.0,
                    rule.weight(),
                    vec![format!("{} crashed: {}", rule.name(), e)],
                )
            }
            Ok(Ok(mut score)) => {
                self.note_success(rule.name());
                score.severity = rule.severity();
                score
            }
        }
    }

    /// Populate `candidate.validation_scores` from `rules`.
    pub async fn validate_candidate(
        &self,
        candidate: &mut Candidate,
        rules: &[Arc<dyn ValidatorRule>],
        context: &RuleContext,
        fail_fast: bool,
        parallel: bool,
        per_rule_timeout: Duration,
    ) {
        let start = Instant::now();
        let active: Vec<Arc<dyn ValidatorRule>> = rules
            .iter()
            .filter(|r| !self.is_disabled(r.name()))
            .cloned()
            .collect();

        let mut scores: Vec<ValidationScore> = Vec::with_capacity(active.len());

        if parallel {
            let futures: Vec<_> = active
                .iter()
                .map(|rule| self.run_rule(rule, &candidate.code, context, per_rule_timeout))
                .collect();
            // join_all preserves input order
            scores.extend(join_all(futures).await);
            if fail_fast {
                if let Some(cut) = scores
                    .iter()
                    .position(|s| !s.passed && s.severity == RuleSeverity::Error)
                {
                    scores.truncate(cut + 1);
                }
            }
        } else {
            for rule in &active {
                let score = self
                    .run_rule(rule, &candidate.code, context, per_rule_timeout)
                    .await;
                let stop = fail_fast && !score.passed && score.severity == RuleSeverity::Error;
                scores.push(score);
                if stop {
                    break;
                }
            }
        }

        for score in scores {
            candidate.add_validation(score);
        }
        candidate.validation_time = start.elapsed();
        candidate.status = if candidate.all_passed() {
            CandidateStatus::Validated
        } else if candidate.validation_scores.is_empty() {
            CandidateStatus::Rejected
        } else {
            CandidateStatus::Validated
        };
    }

    /// Validate every generated candidate in the pool and select the best.
    #[allow(clippy::too_many_arguments)]
    pub async fn validate_pool(
        &self,
        pool: &mut CandidatePool,
        rules_for: impl Fn(&Candidate) -> Vec<Arc<dyn ValidatorRule>>,
        context: &RuleContext,
        fail_fast: bool,
        parallel: bool,
        per_rule_timeout: Duration,
    ) {
        for candidate in pool.candidates.iter_mut() {
            if candidate.status != CandidateStatus::Generated {
                continue;
            }
            let rules = rules_for(candidate);
            self.validate_candidate(candidate, &rules, context, fail_fast, parallel, per_rule_timeout)
                .await;
        }

        pool.best_id = select_best(pool);
        pool.all_passed = pool.best().map(|c| c.all_passed()).unwrap_or(false);
    }
}

/// Best candidate selection: a candidate that passed every validator beats
/// any failing candidate; within a group, maximal total score wins and ties
/// break on the lowest id.
pub fn select_best(pool: &CandidatePool) -> Option<u32> {
    let validated: Vec<&Candidate> = pool
        .candidates
        .iter()
        .filter(|c| c.status == CandidateStatus::Validated)
        .collect();
    if validated.is_empty() {
        return None;
    }

    let passed: Vec<&&Candidate> = validated.iter().filter(|c| c.all_passed()).collect();
    let group: Vec<&Candidate> = if passed.is_empty() {
        validated.clone()
    } else {
        passed.into_iter().copied().collect()
    };

    let mut sub_pool = CandidatePool::new(pool.task_id.as_str());
    for c in group {
        sub_pool.add((*c).clone());
    }
    scorer::select_best(&sub_pool)
}

/// Full generate-then-validate pipeline driven by the self-correction loop
/// and the agent.
pub struct CodegenPipeline {
    generator: CandidateGenerator,
    registry: ValidatorRegistry,
    validation: ValidationPipeline,
    per_rule_timeout: Duration,
}

impl CodegenPipeline {
    pub fn new(
        generator: CandidateGenerator,
        registry: ValidatorRegistry,
        per_rule_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            registry,
            validation: ValidationPipeline::new(),
            per_rule_timeout,
        }
    }

    fn build_prompt(&self, query: &str, opts: &RunOptions) -> String {
        let mut parts = vec![query.to_string()];
        for extra in &opts.prompt_context {
            if !extra.is_empty() {
                parts.push(extra.clone());
            }
        }
        parts.join("\n\n---\n\n")
    }
}

#[async_trait]
impl PipelineRunner for CodegenPipeline {
    async fn run(&self, query: &str, opts: &RunOptions) -> Result<PipelineOutcome, CrucibleError> {
        let start = Instant::now();
        let prompt = self.build_prompt(query, opts);

        let gen_start = Instant::now();
        let mut pool = self
            .generator
            .generate(
                &opts.task_id,
                &prompt,
                opts.n_candidates,
                opts.parallel_generation,
                &opts.temperatures,
            )
            .await;
        let generation_time = gen_start.elapsed();

        let val_start = Instant::now();
        let registry = &self.registry;
        let profile = opts.profile;
        self.validation
            .validate_pool(
                &mut pool,
                |candidate| {
                    let content = crate::validators::content_type::detect_content_type(&candidate.code);
                    registry.rules_for(profile, content)
                },
                &opts.context,
                opts.fail_fast,
                opts.parallel_validation,
                self.per_rule_timeout,
            )
            .await;
        let validation_time = val_start.elapsed();

        let all_passed = pool.all_passed;
        Ok(PipelineOutcome {
            pool,
            all_passed,
            generation_time,
            validation_time,
            total_time: start.elapsed(),
        })
    }
}
