// tests/agent_test.rs — End-to-end agent scenarios with a scripted backend

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;

use crucible::core::agent::{Agent, AgentResponse, CoreServices};
use crucible::core::types::{Complexity, RiskLevel, TaskType, ValidationProfile};
use crucible::infra::config::Config;
use crucible::infra::errors::CrucibleError;
use crucible::provider::{GenerationBackend, GenerationRequest, GenerationResponse, StreamEvent};
use crucible::router::RouteMethod;
use crucible::tracker::OutcomeRecord;

/// Backend that replays queued replies, then falls back to a default reply.
/// Also records every request it served.
struct ScriptedBackend {
    queue: Mutex<VecDeque<String>>,
    default_reply: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn with_default(default_reply: &str) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            default_reply: default_reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn scripted(replies: Vec<&str>, default_reply: &str) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(replies.into_iter().map(String::from).collect()),
            default_reply: default_reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, CrucibleError> {
        self.requests.lock().unwrap().push(request);
        let text = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        Ok(GenerationResponse {
            text,
            finish_reason: None,
        })
    }

    async fn generate_stream(
        &self,
        _request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, CrucibleError>> + Send>>, CrucibleError>
    {
        unimplemented!("not used in tests")
    }

    async fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, CrucibleError> {
        Err(CrucibleError::Backend {
            backend: "scripted".into(),
            message: "no embeddings in tests".into(),
            retriable: false,
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    // Keep routing deterministic: no neural tier, no LLM fallback.
    config.neural.enabled = false;
    config.router.llm_fallback = false;
    config.validation.per_rule_timeout_seconds = 5;
    config
}

async fn agent_with(config: Config, backend: Arc<ScriptedBackend>) -> (Agent, Arc<CoreServices>) {
    let services = Arc::new(CoreServices::ephemeral(config, backend).unwrap());
    let agent = Agent::with_neural(services.clone(), None);
    (agent, services)
}

const CLEAN_PYTHON: &str = "\
```python
def greet(name: str) -> str:
    \"\"\"Return a greeting.\"\"\"
    return f\"hello {name}\"
```";

// ─── Scenario: trivial code gen ─────────────────────────────────

#[tokio::test]
async fn trivial_codegen_single_candidate_fast_dev() {
    let backend = ScriptedBackend::with_default("print('hello world')");
    let (agent, services) = agent_with(test_config(), backend.clone()).await;

    let response = agent.process("write hello world").await.unwrap();
    let AgentResponse::Generated {
        code,
        context,
        correction,
        record,
    } = response
    else {
        panic!("expected generated code");
    };

    assert_eq!(code, "print('hello world')");
    assert_eq!(context.task_type, TaskType::CodeGen);
    assert_eq!(context.complexity, Complexity::Trivial);
    assert_eq!(context.risk_level, RiskLevel::Low);
    assert_eq!(context.validation_profile, ValidationProfile::FastDev);

    assert_eq!(record.n_candidates, 1);
    assert_eq!(record.rules_run, "ast_syntax");
    assert!(record.all_passed);
    assert!(record.best_score >= 0.9 && record.best_score <= 1.0);
    assert_eq!(correction.total_iterations, 1);
    assert!(!correction.corrected);

    // Exactly one generation request at the planned temperature
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!((requests[0].temperature - 0.2).abs() < f32::EPSILON);

    // Exactly one outcome record for one completed run
    assert_eq!(services.tracker.get_total_outcomes().unwrap(), 1);
}

// ─── Scenario: critical security task ───────────────────────────

#[tokio::test]
async fn critical_security_task_uses_full_sweep() {
    let mut config = test_config();
    config.self_correction.max_iterations = 1;
    let backend = ScriptedBackend::with_default(CLEAN_PYTHON);
    let (agent, _services) = agent_with(config, backend.clone()).await;

    let response = agent
        .process("implement JWT auth with token refresh")
        .await
        .unwrap();
    let AgentResponse::Generated { context, record, .. } = response else {
        panic!("expected generated code");
    };

    assert_eq!(context.complexity, Complexity::Critical);
    assert_eq!(context.risk_level, RiskLevel::Critical);
    assert_eq!(context.validation_profile, ValidationProfile::Critical);
    assert!(context.fail_fast);
    assert!(!context.parallel_validation);

    // Three candidates over the pinned critical temperature sweep
    assert_eq!(record.n_candidates, 3);
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    let mut temps: Vec<f32> = requests.iter().map(|r| r.temperature).collect();
    temps.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(temps, vec![0.1, 0.4, 0.7]);

    // All eight built-in rules ran on the best candidate
    for rule in [
        "ast_syntax",
        "no_forbidden_imports",
        "no_eval_exec",
        "code_length",
        "complexity",
        "docstring",
        "type_hints",
        "oss_patterns",
    ] {
        assert!(
            record.rules_run.contains(rule),
            "rules_run missing {}: {}",
            rule,
            record.rules_run
        );
    }
}

// ─── Scenario: kubernetes manifest ──────────────────────────────

const LATEST_TAG_MANIFEST: &str = "\
```yaml
apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx
spec:
  replicas: 3
  template:
    spec:
      containers:
      - name: nginx
        image: nginx:latest
        resources:
          limits:
            memory: 128Mi
```";

#[tokio::test]
async fn kubernetes_manifest_swaps_rule_set_and_flags_latest() {
    let mut config = test_config();
    config.self_correction.max_iterations = 1;
    let backend = ScriptedBackend::with_default(LATEST_TAG_MANIFEST);
    let (agent, _services) = agent_with(config, backend).await;

    let response = agent
        .process("create a kubernetes deployment manifest for nginx with 3 replicas")
        .await
        .unwrap();
    let AgentResponse::Generated { code, correction, record, .. } = response else {
        panic!("expected generated code");
    };

    // The candidate is returned even though validation failed
    assert!(code.contains("nginx:latest"));
    assert!(!record.all_passed);
    assert!(record.best_score < 1.0);

    // Profile rules were replaced by the kubernetes set
    assert!(record.rules_run.contains("yamllint"));
    assert!(record.rules_run.contains("kubeval"));
    assert!(record.rules_run.contains("kube-linter"));
    assert!(!record.rules_run.contains("ast_syntax"));

    // kube-linter failed with a latest-tag diagnostic
    assert!(record.rules_failed.contains("kube-linter"));
    let attempt = &correction.attempts[0];
    assert!(
        attempt.errors.iter().any(|e| e.contains("kube-linter") && e.contains("latest")),
        "errors: {:?}",
        attempt.errors
    );
}

// ─── Scenario: router pattern hit ───────────────────────────────

#[tokio::test]
async fn pattern_routed_command_skips_generation() {
    let backend = ScriptedBackend::with_default(CLEAN_PYTHON);
    let (agent, services) = agent_with(test_config(), backend.clone()).await;

    let response = agent.process("read core/agent.py").await.unwrap();
    let AgentResponse::ToolCall(routed) = response else {
        panic!("expected a tool call");
    };

    assert_eq!(routed.tool, "read");
    assert_eq!(routed.params.get("file_path").unwrap(), "core/agent.py");
    assert!((routed.confidence - 0.95).abs() < f32::EPSILON);
    assert_eq!(routed.method, RouteMethod::Pattern);

    // No generation, no outcome record for a routed command
    assert!(backend.requests().is_empty());
    assert_eq!(services.tracker.get_total_outcomes().unwrap(), 0);
}

// ─── Scenario: self-correction improves the score ───────────────

#[tokio::test]
async fn self_correction_recovers_from_syntax_failure() {
    let broken = "def validate_email(address:\n    return '@' in address";
    let fixed = "\
def validate_email(address: str) -> bool:
    \"\"\"Validate an email address.\"\"\"
    return '@' in address";
    // A moderate query plans two candidates per iteration: both fail in
    // iteration 1, both pass in iteration 2. The balanced profile keeps the
    // first-iteration score above the correction floor despite the failing
    // syntax rule.
    let backend = ScriptedBackend::scripted(vec![broken, broken, fixed, fixed], fixed);
    let mut config = test_config();
    config.adaptive.enabled = true;
    let (agent, services) = agent_with(config, backend).await;

    let query = "write a function that checks a list of email addresses and reports the bad ones";
    let response = agent.process(query).await.unwrap();
    let AgentResponse::Generated { code, correction, record, .. } = response else {
        panic!("expected generated code");
    };

    assert_eq!(correction.total_iterations, 2);
    assert!(correction.corrected);
    assert!(correction.initial_score < correction.final_score);
    assert!(correction.all_passed);
    assert_eq!(code, fixed);

    // The record carries the final iteration's metrics
    assert!(record.all_passed);
    assert!((record.best_score - correction.final_score as f64).abs() < 1e-6);
    assert_eq!(services.tracker.get_total_outcomes().unwrap(), 1);

    let stats = agent.stats();
    assert_eq!(stats["correction_runs"], 1);
    assert_eq!(stats["correction_iterations_total"], 2);
    assert_eq!(stats["correction_improvements"], 1);
    assert_eq!(stats["correction_all_passed_after"], 1);
}

// ─── Scenario: history-based profile override ───────────────────

#[tokio::test]
async fn profile_override_from_outcome_history() {
    let backend = ScriptedBackend::with_default(CLEAN_PYTHON);
    let (agent, services) = agent_with(test_config(), backend).await;

    // 5 outcomes at safe_fix scoring high, 5 at balanced scoring low
    for _ in 0..5 {
        let mut r = OutcomeRecord::for_query("seed");
        r.task_type = "code_gen".into();
        r.complexity = "moderate".into();
        r.validation_profile = "safe_fix".into();
        r.best_score = 0.95;
        r.all_passed = true;
        services.tracker.record(&r).unwrap();

        let mut r = OutcomeRecord::for_query("seed");
        r.task_type = "code_gen".into();
        r.complexity = "moderate".into();
        r.validation_profile = "balanced".into();
        r.best_score = 0.60;
        services.tracker.record(&r).unwrap();
    }

    let query = "write a function that takes a list of items and does something interesting with them";
    let response = agent.process(query).await.unwrap();
    let AgentResponse::Generated { context, .. } = response else {
        panic!("expected generated code");
    };

    // The static pick for a moderate code_gen task would be balanced
    assert_eq!(context.complexity, Complexity::Moderate);
    assert_eq!(context.validation_profile, ValidationProfile::SafeFix);
    assert!(context.fail_fast);

    assert_eq!(agent.stats()["profile_overrides"], 1);
}

// ─── Tracker bookkeeping across runs ────────────────────────────

#[tokio::test]
async fn one_record_per_completed_run() {
    let backend = ScriptedBackend::with_default("print('ok')");
    let (agent, services) = agent_with(test_config(), backend).await;

    for i in 0..3 {
        let query = format!("write hello world variant {}", i);
        agent.process(&query).await.unwrap();
    }
    assert_eq!(services.tracker.get_total_outcomes().unwrap(), 3);
}

// ─── Cancellation ───────────────────────────────────────────────

#[tokio::test]
async fn cancellation_flushes_partial_record() {
    let backend = ScriptedBackend::with_default("print('ok')");
    let (agent, services) = agent_with(test_config(), backend).await;

    agent.cancel_flag().store(true, std::sync::atomic::Ordering::SeqCst);
    let result = agent.process("write hello world").await;
    assert!(matches!(result, Err(CrucibleError::CancellationRequested)));

    // A partial record was still flushed
    assert_eq!(services.tracker.get_total_outcomes().unwrap(), 1);
    let recent = services.tracker.get_recent_outcomes(1).unwrap();
    assert!(!recent[0].all_passed);
}

// ─── General chat bypasses the pipeline ─────────────────────────

#[tokio::test]
async fn general_query_produces_no_record() {
    let backend = ScriptedBackend::with_default(CLEAN_PYTHON);
    let (agent, services) = agent_with(test_config(), backend.clone()).await;

    let response = agent.process("tell me about the roman empire").await.unwrap();
    let AgentResponse::ToolCall(routed) = response else {
        panic!("expected a general fallback");
    };
    assert_eq!(routed.tool, "general");
    assert_eq!(services.tracker.get_total_outcomes().unwrap(), 0);
    assert!(backend.requests().is_empty());
}
