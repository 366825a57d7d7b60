// src/provider/mod.rs — Generation back-end layer

pub mod ollama;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::infra::errors::CrucibleError;

/// Core trait that all generation back-ends implement.
///
/// The pipeline treats the back-end as opaque: text in, text out. Embeddings
/// are only consumed by the neural router; a backend that cannot embed
/// returns `Backend` errors and the router degrades to pattern + LLM tiers.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, CrucibleError>;

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, CrucibleError>> + Send>>, CrucibleError>;

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CrucibleError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// Streaming variant: a sequence of token events followed by a terminal done.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Done,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 1200,
            temperature: 0.5,
            stop_sequences: Vec::new(),
            seed: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let r = GenerationRequest::new("qwen2.5-coder:7b", "write hello world")
            .with_temperature(0.2)
            .with_seed(42)
            .with_max_tokens(600);
        assert_eq!(r.model, "qwen2.5-coder:7b");
        assert!((r.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(r.seed, Some(42));
        assert_eq!(r.max_tokens, 600);
        assert!(r.stop_sequences.is_empty());
    }

    #[test]
    fn test_request_serialize_skips_empty() {
        let r = GenerationRequest::new("m", "p");
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("stop_sequences"));
        assert!(!json.contains("seed"));
    }

    #[test]
    fn test_stream_event_equality() {
        assert_eq!(StreamEvent::Done, StreamEvent::Done);
        assert_ne!(StreamEvent::Token("a".into()), StreamEvent::Done);
    }
}
