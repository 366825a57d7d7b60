// src/core/generator.rs — Multi-candidate generation
//
// Produces N candidates across a temperature sweep. Each request is
// independent: one failure or timeout yields a failed candidate with empty
// code while the rest of the pool continues. Scoring and best-selection
// belong to the validation pipeline, not the generator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::core::types::{Candidate, CandidatePool, CandidateStatus};
use crate::provider::{GenerationBackend, GenerationRequest};
use crate::util::candidate_seed;

pub struct CandidateGenerator {
    backend: Arc<dyn GenerationBackend>,
    model: String,
    max_tokens: u32,
    per_candidate_timeout: Duration,
}

impl CandidateGenerator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        model: impl Into<String>,
        max_tokens: u32,
        per_candidate_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            max_tokens,
            per_candidate_timeout,
        }
    }

    /// Generate `n` candidates for `prompt`. Temperatures cycle when
    /// `n > temperatures.len()`. When `parallel`, all requests run
    /// concurrently under the per-candidate timeout.
    pub async fn generate(
        &self,
        task_id: &str,
        prompt: &str,
        n: u8,
        parallel: bool,
        temperatures: &[f32],
    ) -> CandidatePool {
        let mut pool = CandidatePool::new(task_id);
        let n = n.clamp(1, 3);
        let temps: Vec<f32> = (0..n as usize)
            .map(|i| {
                if temperatures.is_empty() {
                    0.5
                } else {
                    temperatures[i % temperatures.len()]
                }
            })
            .collect();

        if parallel {
            let futures: Vec<_> = temps
                .iter()
                .enumerate()
                .map(|(i, temp)| self.generate_one(task_id, prompt, i as u32, *temp))
                .collect();
            for candidate in join_all(futures).await {
                pool.add(candidate);
            }
        } else {
            for (i, temp) in temps.iter().enumerate() {
                let candidate = self.generate_one(task_id, prompt, i as u32, *temp).await;
                pool.add(candidate);
            }
        }

        pool
    }

    async fn generate_one(&self, task_id: &str, prompt: &str, index: u32, temperature: f32) -> Candidate {
        let seed = candidate_seed(task_id, index);
        let mut candidate = Candidate::new(index, task_id, temperature, seed, self.model.clone());
        candidate.status = CandidateStatus::Generating;

        let request = GenerationRequest::new(self.model.clone(), prompt)
            .with_temperature(temperature)
            .with_seed(seed)
            .with_max_tokens(self.max_tokens);

        let start = Instant::now();
        let result = tokio::time::timeout(self.per_candidate_timeout, self.backend.generate(request)).await;
        candidate.generation_time = start.elapsed();

        match result {
            Ok(Ok(response)) => {
                candidate.code = extract_code_block(&response.text);
                candidate.status = CandidateStatus::Generated;
            }
            Ok(Err(e)) => {
                tracing::warn!("Candidate {} generation failed: {}", index, e);
                candidate.status = CandidateStatus::Failed;
            }
            Err(_) => {
                tracing::warn!(
                    "Candidate {} timed out after {}s",
                    index,
                    self.per_candidate_timeout.as_secs()
                );
                candidate.status = CandidateStatus::Failed;
            }
        }

        candidate
    }
}

/// Pull the code out of an LLM response: the first fenced block when one is
/// present, otherwise the whole trimmed text.
pub fn extract_code_block(text: &str) -> String {
    let Some(start) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_fence = &text[start + 3..];
    // Skip the language tag line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim_end().to_string(),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::errors::CrucibleError;
    use crate::provider::{GenerationResponse, StreamEvent};
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that echoes the temperature back and counts calls.
    struct EchoBackend {
        calls: AtomicU32,
        fail_index: Option<u32>,
    }

    impl EchoBackend {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_index: None,
            }
        }

        fn failing_on(index: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_index: Some(index),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        fn id(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            request: crate::provider::GenerationRequest,
        ) -> Result<GenerationResponse, CrucibleError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_index == Some(call) {
                return Err(CrucibleError::Backend {
                    backend: "echo".into(),
                    message: "scripted failure".into(),
                    retriable: false,
                });
            }
            Ok(GenerationResponse {
                text: format!("def f():\n    return {}\n", request.temperature),
                finish_reason: None,
            })
        }

        async fn generate_stream(
            &self,
            _request: crate::provider::GenerationRequest,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<StreamEvent, CrucibleError>> + Send>>,
            CrucibleError,
        > {
            unimplemented!("not used in tests")
        }

        async fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, CrucibleError> {
            Ok(vec![])
        }
    }

    fn generator(backend: EchoBackend) -> CandidateGenerator {
        CandidateGenerator::new(
            Arc::new(backend),
            "test-model",
            600,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_generates_n_candidates() {
        let g = generator(EchoBackend::new());
        let pool = g.generate("t1", "prompt", 3, false, &[0.2, 0.5, 0.8]).await;
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.candidates[0].temperature, 0.2);
        assert_eq!(pool.candidates[1].temperature, 0.5);
        assert_eq!(pool.candidates[2].temperature, 0.8);
        for c in &pool.candidates {
            assert_eq!(c.status, CandidateStatus::Generated);
            assert!(!c.code.is_empty());
        }
    }

    #[tokio::test]
    async fn test_ids_assigned_in_creation_order() {
        let g = generator(EchoBackend::new());
        let pool = g.generate("t1", "prompt", 3, true, &[0.2, 0.5, 0.8]).await;
        let ids: Vec<u32> = pool.candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_temperature_cycling() {
        let g = generator(EchoBackend::new());
        let pool = g.generate("t1", "prompt", 3, false, &[0.2]).await;
        assert!(pool.candidates.iter().all(|c| c.temperature == 0.2));
    }

    #[tokio::test]
    async fn test_temperature_override_single() {
        let g = generator(EchoBackend::new());
        let pool = g.generate("t1", "prompt", 1, false, &[0.99]).await;
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.candidates[0].temperature, 0.99);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_sink_pool() {
        let g = generator(EchoBackend::failing_on(1));
        let pool = g.generate("t1", "prompt", 3, false, &[0.2, 0.5, 0.8]).await;
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.candidates[1].status, CandidateStatus::Failed);
        assert!(pool.candidates[1].code.is_empty());
        assert_eq!(pool.candidates[0].status, CandidateStatus::Generated);
        assert_eq!(pool.candidates[2].status, CandidateStatus::Generated);
    }

    #[tokio::test]
    async fn test_seeds_deterministic() {
        let g1 = generator(EchoBackend::new());
        let pool1 = g1.generate("t1", "prompt", 2, false, &[0.2, 0.5]).await;
        let g2 = generator(EchoBackend::new());
        let pool2 = g2.generate("t1", "prompt", 2, false, &[0.2, 0.5]).await;
        assert_eq!(pool1.candidates[0].seed, pool2.candidates[0].seed);
        assert_eq!(pool1.candidates[1].seed, pool2.candidates[1].seed);
        assert_ne!(pool1.candidates[0].seed, pool1.candidates[1].seed);
    }

    // ─── extract_code_block ─────────────────────────────────────

    #[test]
    fn test_extract_fenced_block() {
        let text = "Here is the code:\n```python\ndef f():\n    return 1\n```\nDone.";
        assert_eq!(extract_code_block(text), "def f():\n    return 1");
    }

    #[test]
    fn test_extract_plain_text() {
        assert_eq!(extract_code_block("  x = 1  "), "x = 1");
    }

    #[test]
    fn test_extract_unterminated_fence() {
        let text = "```python\ndef f():\n    return 1\n";
        assert_eq!(extract_code_block(text), "def f():\n    return 1");
    }

    #[test]
    fn test_extract_fence_without_language() {
        let text = "```\nx = 1\n```";
        assert_eq!(extract_code_block(text), "x = 1");
    }
}
