// src/core/correction.rs — Self-correction loop
//
// Feeds validator errors back to the generator as a corrective prompt.
// Stop conditions, checked in order after each iteration: iteration cap,
// everything passed, score below the correction floor, nothing to feed back.
// The returned code is the best across ALL iterations, not the last.

use std::sync::Arc;
use std::time::Instant;

use crate::core::pipeline::{PipelineRunner, RunOptions};
use crate::core::types::PipelineOutcome;

pub const MAX_ITERATIONS: u8 = 3;
pub const MIN_SCORE_FOR_CORRECTION: f32 = 0.10;

/// One completed pipeline iteration inside the loop.
#[derive(Debug, Clone, Default)]
pub struct CorrectionAttempt {
    pub iteration: u8,
    pub best_score: f32,
    pub all_passed: bool,
    pub code: String,
    pub errors: Vec<String>,
    pub n_candidates: u32,
    pub rules_run: Vec<String>,
    pub rules_passed: Vec<String>,
    pub rules_failed: Vec<String>,
    pub generation_time: f32,
    pub validation_time: f32,
    pub total_time: f32,
}

#[derive(Debug, Clone, Default)]
pub struct CorrectionResult {
    pub best_code: String,
    pub best_score: f32,
    pub all_passed: bool,
    pub attempts: Vec<CorrectionAttempt>,
    pub total_iterations: u8,
    pub total_time: f32,
    pub initial_score: f32,
    pub final_score: f32,
    pub improvement: f32,
    pub corrected: bool,
}

impl CorrectionResult {
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "total_iterations": self.total_iterations,
            "initial_score": self.initial_score,
            "final_score": self.final_score,
            "improvement": self.improvement,
            "corrected": self.corrected,
            "all_passed": self.all_passed,
            "attempts": self.attempts.iter().map(|a| serde_json::json!({
                "iteration": a.iteration,
                "best_score": a.best_score,
                "all_passed": a.all_passed,
                "n_errors": a.errors.len(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// One line per failing validator: `[name] first-error`.
pub fn extract_validation_errors(outcome: &PipelineOutcome) -> Vec<String> {
    let Some(best) = outcome.best() else {
        return Vec::new();
    };
    best.validation_scores
        .iter()
        .filter(|s| !s.passed && !s.errors.is_empty())
        .map(|s| format!("[{}] {}", s.validator_name, s.errors[0]))
        .collect()
}

/// Correction prompt: original query, the previous code fenced, a bulleted
/// error list capped at 10 items, and a fix-only instruction.
pub fn build_correction_prompt(
    original_query: &str,
    previous_code: &str,
    errors: &[String],
    iteration: u8,
) -> String {
    let error_lines: Vec<String> = errors.iter().take(10).map(|e| format!("- {}", e)).collect();
    format!(
        "CORRECTION ATTEMPT {iteration}\n\n\
         Original task:\n{original_query}\n\n\
         Previous code:\n```\n{previous_code}\n```\n\n\
         Validation reported these issues:\n{errors}\n\n\
         Fix only the reported issues. Keep everything else unchanged and \
         return the complete corrected code.",
        iteration = iteration,
        original_query = original_query,
        previous_code = previous_code,
        errors = error_lines.join("\n"),
    )
}

/// Validators that failed in two or more attempts: `name (k/n iterations)`.
pub fn extract_key_issues(attempts: &[CorrectionAttempt]) -> Vec<String> {
    if attempts.is_empty() {
        return Vec::new();
    }
    let total = attempts.len();
    let mut counts: Vec<(String, usize)> = Vec::new();

    for attempt in attempts {
        let mut seen_this_attempt: Vec<&str> = Vec::new();
        for error in &attempt.errors {
            let Some(name) = error
                .strip_prefix('[')
                .and_then(|rest| rest.split(']').next())
            else {
                continue;
            };
            if seen_this_attempt.contains(&name) {
                continue;
            }
            seen_this_attempt.push(name);
            match counts.iter_mut().find(|(n, _)| n == name) {
                Some((_, c)) => *c += 1,
                None => counts.push((name.to_string(), 1)),
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .filter(|(_, c)| *c >= 2)
        .map(|(name, c)| format!("{} ({}/{} iterations)", name, c, total))
        .collect()
}

pub struct SelfCorrectionLoop {
    pipeline: Arc<dyn PipelineRunner>,
    pub max_iterations: u8,
    pub min_score: f32,
    cancel: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl SelfCorrectionLoop {
    pub fn new(pipeline: Arc<dyn PipelineRunner>, max_iterations: u8, min_score: f32) -> Self {
        Self {
            pipeline,
            max_iterations: max_iterations.max(1),
            min_score,
            cancel: None,
        }
    }

    /// Cooperative cancellation: when the flag is set, no further iteration
    /// starts and the partial result so far is returned.
    pub fn with_cancel_flag(mut self, flag: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub async fn run(&self, query: &str, opts: &RunOptions) -> CorrectionResult {
        self.run_with_callback(query, opts, |_, _| {}).await
    }

    /// Run the loop, invoking `on_iteration(iteration, attempt)` after each
    /// completed pipeline run.
    pub async fn run_with_callback(
        &self,
        query: &str,
        opts: &RunOptions,
        mut on_iteration: impl FnMut(u8, &CorrectionAttempt),
    ) -> CorrectionResult {
        let start = Instant::now();
        let base_task_id = opts.task_id.clone();
        let mut attempts: Vec<CorrectionAttempt> = Vec::new();
        let mut current_query = query.to_string();

        for iteration in 1..=self.max_iterations {
            if let Some(flag) = &self.cancel {
                if flag.load(std::sync::atomic::Ordering::SeqCst) {
                    tracing::info!("Cancellation requested before iteration {}", iteration);
                    break;
                }
            }

            let mut iter_opts = opts.clone();
            iter_opts.task_id = format!("{}_iter{}", base_task_id, iteration);

            let outcome = match self.pipeline.run(&current_query, &iter_opts).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Pipeline-level failure is a terminal stop; the prior
                    // best is preserved.
                    tracing::warn!("Pipeline error on iteration {}: {}", iteration, e);
                    break;
                }
            };

            let errors = extract_validation_errors(&outcome);
            let (rules_run, rules_passed, rules_failed) = match outcome.best() {
                Some(best) => (
                    best.validation_scores
                        .iter()
                        .map(|s| s.validator_name.clone())
                        .collect(),
                    best.validation_scores
                        .iter()
                        .filter(|s| s.passed)
                        .map(|s| s.validator_name.clone())
                        .collect(),
                    best.validation_scores
                        .iter()
                        .filter(|s| !s.passed)
                        .map(|s| s.validator_name.clone())
                        .collect(),
                ),
                None => (Vec::new(), Vec::new(), Vec::new()),
            };
            let attempt = CorrectionAttempt {
                iteration,
                best_score: outcome.best_score(),
                all_passed: outcome.all_passed,
                code: outcome.best_code().to_string(),
                errors: errors.clone(),
                n_candidates: outcome.pool.size() as u32,
                rules_run,
                rules_passed,
                rules_failed,
                generation_time: outcome.generation_time.as_secs_f32(),
                validation_time: outcome.validation_time.as_secs_f32(),
                total_time: outcome.total_time.as_secs_f32(),
            };
            on_iteration(iteration, &attempt);
            attempts.push(attempt);

            // Stop conditions, in order.
            if iteration == self.max_iterations {
                break;
            }
            if outcome.all_passed {
                break;
            }
            if outcome.best_score() < self.min_score {
                tracing::debug!(
                    "Score {:.2} below correction floor {:.2}, stopping",
                    outcome.best_score(),
                    self.min_score
                );
                break;
            }
            if errors.is_empty() {
                break;
            }

            let last = attempts.last().expect("attempt just pushed");
            current_query = build_correction_prompt(query, &last.code, &last.errors, iteration + 1);
        }

        Self::finish(attempts, start.elapsed().as_secs_f32())
    }

    fn finish(attempts: Vec<CorrectionAttempt>, total_time: f32) -> CorrectionResult {
        let total_iterations = attempts.len() as u8;
        if attempts.is_empty() {
            return CorrectionResult {
                total_time,
                ..Default::default()
            };
        }

        // Overall best across all iterations; earliest wins ties.
        let best = attempts
            .iter()
            .fold(&attempts[0], |best, a| {
                if a.best_score > best.best_score {
                    a
                } else {
                    best
                }
            })
            .clone();

        let initial_score = attempts.first().map(|a| a.best_score).unwrap_or(0.0);
        let final_score = attempts.last().map(|a| a.best_score).unwrap_or(0.0);

        CorrectionResult {
            best_code: best.code.clone(),
            best_score: best.best_score,
            all_passed: best.all_passed,
            total_iterations,
            total_time,
            initial_score,
            final_score,
            improvement: final_score - initial_score,
            corrected: total_iterations > 1,
            attempts,
        }
    }
}
