// src/core/agent.rs — The code-generation agent
//
// Wires the full flow: route the query, synthesise a TaskContext, pick a
// generation plan, apply the history-based profile override, run the
// self-correction loop over the generation+validation pipeline, and record
// the outcome. Owns the shared services for the whole process lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;

use crate::core::correction::{CorrectionResult, SelfCorrectionLoop};
use crate::core::generator::CandidateGenerator;
use crate::core::pipeline::{CodegenPipeline, RunOptions};
use crate::core::strategy::AdaptiveStrategy;
use crate::core::task_abstraction::{ClassifierResult, ExecutionMode, TaskAbstraction};
use crate::core::types::{TaskContext, TaskType};
use crate::core::working_memory::WorkingMemory;
use crate::infra::config::Config;
use crate::infra::errors::CrucibleError;
use crate::infra::paths;
use crate::oss::pattern_store::PatternStore;
use crate::provider::GenerationBackend;
use crate::router::neural::NeuralRouter;
use crate::router::{HybridRouter, RouteResult};
use crate::tracker::profile_adapter::{AdapterDecision, ProfileAdapter};
use crate::tracker::{OutcomeRecord, OutcomeTracker};
use crate::validators::{registry_for_profile, RuleContext};

/// Process-wide shared services, constructed once at startup and threaded
/// through instead of living in globals.
pub struct CoreServices {
    pub backend: Arc<dyn GenerationBackend>,
    pub tracker: Arc<OutcomeTracker>,
    pub strategy: Mutex<AdaptiveStrategy>,
    pub pattern_store: Option<Arc<PatternStore>>,
    pub config: Config,
}

impl CoreServices {
    /// Build services from config with the default on-disk state layout.
    pub fn bootstrap(config: Config, backend: Arc<dyn GenerationBackend>) -> anyhow::Result<Self> {
        paths::ensure_dirs()?;
        let tracker = Arc::new(OutcomeTracker::new(
            Some(&paths::outcomes_db_path()),
            Duration::from_secs(config.outcomes.ttl_days as u64 * 86_400),
        )?);
        let strategy = Mutex::new(AdaptiveStrategy::with_persistence(
            Some(paths::adaptive_history_path()),
            config.adaptive.persist,
        ));
        let pattern_store = match PatternStore::open(&paths::oss_patterns_db_path()) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!("Pattern store unavailable: {}", e);
                None
            }
        };
        Ok(Self {
            backend,
            tracker,
            strategy,
            pattern_store,
            config,
        })
    }

    /// In-memory services for tests and ephemeral runs.
    pub fn ephemeral(config: Config, backend: Arc<dyn GenerationBackend>) -> anyhow::Result<Self> {
        Ok(Self {
            backend,
            tracker: Arc::new(OutcomeTracker::in_memory()?),
            strategy: Mutex::new(AdaptiveStrategy::new()),
            pattern_store: None,
            config,
        })
    }
}

/// What a processed query produced.
#[derive(Debug)]
pub enum AgentResponse {
    /// The query mapped to a tool intent; the shell executes it.
    ToolCall(RouteResult),
    /// Code was generated; carries the final artifact and its record.
    Generated {
        code: String,
        context: TaskContext,
        correction: CorrectionResult,
        record: OutcomeRecord,
    },
    /// No candidate survived generation.
    NoCandidate { record: OutcomeRecord },
}

fn codegen_detector() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:write|create|implement|generate|build|make|add)\b.*\b(?:function|class|method|script|program|code|module|endpoint|api|auth|handler|service|validator|parser|deployment|manifest|playbook|workflow|dockerfile|pipeline)\b|\bhello\s+world\b",
        )
        .expect("codegen detector regex")
    })
}

/// Whether the query asks for code to be produced.
pub fn is_code_generation_task(query: &str) -> bool {
    codegen_detector().is_match(query)
}

pub struct Agent {
    services: Arc<CoreServices>,
    router: HybridRouter,
    abstraction: TaskAbstraction,
    adapter: ProfileAdapter,
    memory: Mutex<WorkingMemory>,
    stats: Mutex<HashMap<&'static str, u64>>,
    cancel: Arc<AtomicBool>,
}

impl Agent {
    /// Build the agent. The neural tier is attached when enabled and its
    /// index builds; otherwise routing degrades to tiers 0 and 2.
    pub async fn new(services: Arc<CoreServices>) -> Self {
        let config = &services.config;
        let neural = if config.neural.enabled {
            match NeuralRouter::build(
                services.backend.clone(),
                Some(&paths::neural_learning_db_path()),
                config.neural.top_k,
            )
            .await
            {
                Ok(router) => Some(Arc::new(router)),
                Err(e) => {
                    tracing::warn!("Neural router unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self::with_neural(services, neural)
    }

    pub fn with_neural(services: Arc<CoreServices>, neural: Option<Arc<NeuralRouter>>) -> Self {
        let config = &services.config;
        let router = HybridRouter::new(
            neural,
            services.backend.clone(),
            config.models.generator.clone(),
            config.neural.min_confidence,
            config.router.llm_fallback,
        );
        let adapter = ProfileAdapter::new(services.tracker.clone());
        Self {
            router,
            abstraction: TaskAbstraction::default(),
            adapter,
            memory: Mutex::new(WorkingMemory::default()),
            stats: Mutex::new(HashMap::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            services,
        }
    }

    /// Flag checked between correction iterations; setting it flushes a
    /// partial outcome record.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn stats(&self) -> HashMap<&'static str, u64> {
        self.stats.lock().expect("stats lock").clone()
    }

    fn bump(&self, key: &'static str) {
        *self.stats.lock().expect("stats lock").entry(key).or_insert(0) += 1;
    }

    fn bump_by(&self, key: &'static str, amount: u64) {
        *self.stats.lock().expect("stats lock").entry(key).or_insert(0) += amount;
    }

    /// Process a query end to end.
    ///
    /// Tool intents are returned for the shell to execute; only code-gen
    /// tasks run the pipeline and produce an OutcomeRecord.
    pub async fn process(&self, query: &str) -> Result<AgentResponse, CrucibleError> {
        self.process_classified(query, &ClassifierResult::default(), &ClassifierResult::default())
            .await
    }

    /// Process with externally supplied taxonomy classifications.
    pub async fn process_classified(
        &self,
        query: &str,
        ducs: &ClassifierResult,
        swecas: &ClassifierResult,
    ) -> Result<AgentResponse, CrucibleError> {
        // 1. Route
        let routed = self.router.route(query).await;
        let is_codegen = is_code_generation_task(query);

        if routed.is_tool_call() && !is_codegen {
            match routed.method {
                crate::router::RouteMethod::Pattern => self.bump("routed_pattern"),
                crate::router::RouteMethod::Neural => self.bump("routed_neural"),
                crate::router::RouteMethod::Llm => self.bump("routed_llm"),
                crate::router::RouteMethod::Fallback => {}
            }
            return Ok(AgentResponse::ToolCall(routed));
        }

        // 2. Classify
        let swecas_code = swecas.accepted_code();
        let (complexity, plan) = {
            let strategy = self.services.strategy.lock().expect("strategy lock");
            let complexity = strategy.classify_complexity(query, swecas_code);
            (complexity, strategy.get_strategy(query, swecas_code))
        };
        let mut ctx = self.abstraction.classify(
            query,
            ducs,
            swecas,
            is_codegen,
            false,
            complexity,
            ExecutionMode::Normal,
        );

        if !ctx.is_code_generation && ctx.task_type == TaskType::General {
            // Plain conversational query: nothing to validate, nothing to
            // record.
            return Ok(AgentResponse::ToolCall(RouteResult::general(query)));
        }

        // 3. History-based profile override (construction-time only)
        if matches!(self.adapter.apply(&mut ctx), AdapterDecision::Overridden { .. }) {
            self.bump("profile_overrides");
        }
        let ctx = ctx; // sealed

        match ctx.complexity {
            crate::core::types::Complexity::Trivial => self.bump("adaptive_trivial"),
            crate::core::types::Complexity::Simple => self.bump("adaptive_simple"),
            crate::core::types::Complexity::Moderate => self.bump("adaptive_moderate"),
            crate::core::types::Complexity::Complex => self.bump("adaptive_complex"),
            crate::core::types::Complexity::Critical => self.bump("adaptive_critical"),
        }

        // 4. Assemble the run
        let config = &self.services.config;
        let mut prompt_context = Vec::new();
        if config.oss.context_enabled {
            if let Some(store) = &self.services.pattern_store {
                match store.context_snippet(query, 5) {
                    Ok(snippet) if !snippet.is_empty() => prompt_context.push(snippet),
                    Ok(_) => {}
                    Err(e) => tracing::debug!("OSS context lookup failed: {}", e),
                }
            }
        }
        {
            let memory = self.memory.lock().expect("memory lock");
            let compacted = memory.compact(2000);
            if compacted != "## Working Memory" {
                prompt_context.push(compacted);
            }
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let mut opts = RunOptions::new(task_id, ctx.validation_profile);
        opts.n_candidates = plan.n_candidates;
        opts.temperatures = plan.temperatures.clone();
        opts.parallel_generation = config.generation.parallel;
        opts.fail_fast = ctx.fail_fast;
        opts.parallel_validation = config
            .validation
            .parallel
            .unwrap_or(ctx.parallel_validation);
        opts.context = RuleContext {
            task_type: Some(ctx.task_type),
            risk_level: Some(ctx.risk_level),
            swecas_code: ctx.swecas_code,
        };
        opts.prompt_context = prompt_context;

        let max_iterations = if config.self_correction.enabled {
            config.self_correction.max_iterations
        } else {
            1
        };

        // Wall-clock budget for the whole run: the generation step takes the
        // critical share, spread over the planned candidates.
        let budget = crate::core::strategy::allocate_budget(
            plan.estimated_time * max_iterations as u32,
            plan.n_candidates,
            config.adaptive.critical_share,
        );
        let per_candidate_timeout = budget
            .per_candidate_generation
            .min(Duration::from_secs(config.generation.per_candidate_timeout_seconds))
            .max(Duration::from_secs(5));

        let per_rule_timeout = Duration::from_secs(config.validation.per_rule_timeout_seconds);
        let generator = CandidateGenerator::new(
            self.services.backend.clone(),
            config.models.generator.clone(),
            config.models.max_tokens,
            per_candidate_timeout,
        );
        let registry = registry_for_profile(
            ctx.validation_profile,
            self.services.pattern_store.clone(),
            per_rule_timeout,
        );
        let pipeline = Arc::new(CodegenPipeline::new(generator, registry, per_rule_timeout));

        let correction_loop =
            SelfCorrectionLoop::new(pipeline, max_iterations, config.self_correction.min_score)
                .with_cancel_flag(self.cancel.clone());

        // 5. Run
        let result = correction_loop.run(query, &opts).await;

        self.bump("correction_runs");
        self.bump_by("correction_iterations_total", result.total_iterations as u64);
        if result.corrected && result.improvement > 0.0 {
            self.bump("correction_improvements");
        }
        if result.corrected && result.all_passed {
            self.bump("correction_all_passed_after");
        }
        if result.total_iterations > 1 {
            let recurring = crate::core::correction::extract_key_issues(&result.attempts);
            if !recurring.is_empty() {
                tracing::info!("Recurring validation issues: {}", recurring.join("; "));
            }
        }

        // 6. Record the outcome (final iteration's metrics) and feed the
        // adaptive strategy. Persistence failures are logged and swallowed.
        let record = self.build_record(query, &ctx, &result, plan.n_candidates);
        if let Err(e) = self.services.tracker.record(&record) {
            let err = CrucibleError::PersistenceFailed {
                resource: "outcomes.sqlite".into(),
                cause: e.to_string(),
            };
            tracing::warn!("{}", err);
        }
        {
            let mut strategy = self.services.strategy.lock().expect("strategy lock");
            strategy.record_outcome(
                &plan,
                result.best_score,
                result.all_passed,
                result.total_time,
                query,
            );
        }

        if self.cancel.load(Ordering::SeqCst) {
            return Err(CrucibleError::CancellationRequested);
        }

        if result.best_code.is_empty() {
            return Ok(AgentResponse::NoCandidate { record });
        }
        Ok(AgentResponse::Generated {
            code: result.best_code.clone(),
            context: ctx,
            correction: result,
            record,
        })
    }

    fn build_record(
        &self,
        query: &str,
        ctx: &TaskContext,
        result: &CorrectionResult,
        n_candidates: u8,
    ) -> OutcomeRecord {
        let mut record = OutcomeRecord::for_query(query);
        record.task_type = ctx.task_type.as_str().into();
        record.risk_level = ctx.risk_level.as_str().into();
        record.validation_profile = ctx.validation_profile.as_str().into();
        record.complexity = ctx.complexity.as_str().into();
        record.n_candidates = n_candidates as u32;
        record.best_score = result.final_score as f64;
        record.all_passed = result.all_passed;
        record.total_time = result.total_time as f64;

        if let Some(last) = result.attempts.last() {
            record.generation_time = last.generation_time as f64;
            record.validation_time = last.validation_time as f64;
            record.rules_run = last.rules_run.join(",");
            record.rules_passed = last.rules_passed.join(",");
            record.rules_failed = last.rules_failed.join(",");
            record.n_rules_run = last.rules_run.len() as u32;
            record.n_rules_passed = last.rules_passed.len() as u32;
            record.n_rules_failed = last.rules_failed.len() as u32;
        }
        record.swecas_code = ctx.swecas_code;
        record
    }

    /// Feed a tool execution result into working memory; the compact view
    /// is injected into subsequent generation prompts.
    pub fn observe_tool_result(
        &self,
        tool: &str,
        params: &serde_json::Value,
        result: &serde_json::Value,
    ) {
        self.memory
            .lock()
            .expect("memory lock")
            .update_from_tool_result(tool, params, result);
    }

    pub fn reset_session(&self) {
        self.memory.lock().expect("memory lock").clear();
        self.cancel.store(false, Ordering::SeqCst);
    }
}
