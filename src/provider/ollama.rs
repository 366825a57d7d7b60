// src/provider/ollama.rs — Ollama local model back-end

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use std::pin::Pin;

use super::{FinishReason, GenerationBackend, GenerationRequest, GenerationResponse, StreamEvent};
use crate::infra::errors::CrucibleError;

pub struct OllamaBackend {
    base_url: String,
    embed_model: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: Option<String>, embed_model: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".into()),
            embed_model: embed_model.unwrap_or_else(|| "nomic-embed-text".into()),
            client: reqwest::Client::new(),
        }
    }

    /// Probe the endpoint for available models.
    pub async fn probe(&self) -> Result<Vec<String>, CrucibleError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| CrucibleError::Backend {
                backend: "ollama".into(),
                message: format!("Cannot reach Ollama: {}", e),
                retriable: false,
            })?;

        let body: serde_json::Value = resp.json().await.map_err(|e| CrucibleError::Backend {
            backend: "ollama".into(),
            message: format!("Invalid Ollama response: {}", e),
            retriable: false,
        })?;

        let models: Vec<String> = body["models"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
            .collect();

        Ok(models)
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut options = serde_json::json!({
            "temperature": request.temperature,
            "num_predict": request.max_tokens,
        });
        if let Some(seed) = request.seed {
            options["seed"] = serde_json::json!(seed);
        }
        if !request.stop_sequences.is_empty() {
            options["stop"] = serde_json::json!(request.stop_sequences);
        }

        serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": stream,
            "options": options,
        })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, CrucibleError> {
        let body = self.request_body(&request, false);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CrucibleError::Backend {
                backend: "ollama".into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CrucibleError::Backend {
                backend: "ollama".into(),
                message: format!("HTTP error: {}", error_body),
                retriable: false,
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| CrucibleError::Backend {
            backend: "ollama".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        let text = resp["response"].as_str().unwrap_or("").to_string();
        let finish_reason = match resp["done_reason"].as_str() {
            Some("length") => Some(FinishReason::Length),
            Some(_) => Some(FinishReason::Stop),
            None => None,
        };

        Ok(GenerationResponse { text, finish_reason })
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, CrucibleError>> + Send>>, CrucibleError>
    {
        let body = self.request_body(&request, true);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CrucibleError::Backend {
                backend: "ollama".into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CrucibleError::Backend {
                backend: "ollama".into(),
                message: format!("HTTP error: {}", error_body),
                retriable: false,
            });
        }

        // Ollama uses NDJSON streaming, not SSE.
        // Each line is a JSON object: {"response":"...","done":false}
        let byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut byte_stream = std::pin::pin!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(CrucibleError::Backend {
                            backend: "ollama".into(),
                            message: format!("Stream read error: {}", e),
                            retriable: false,
                        });
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    if line.is_empty() {
                        continue;
                    }

                    let parsed: serde_json::Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(e) => {
                            yield Err(CrucibleError::Backend {
                                backend: "ollama".into(),
                                message: format!("Failed to parse NDJSON: {}", e),
                                retriable: false,
                            });
                            break;
                        }
                    };

                    if parsed["done"].as_bool().unwrap_or(false) {
                        yield Ok(StreamEvent::Done);
                        break;
                    }

                    let token = parsed["response"].as_str().unwrap_or("").to_string();
                    if !token.is_empty() {
                        yield Ok(StreamEvent::Token(token));
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CrucibleError> {
        let mut results = Vec::new();
        for text in texts {
            let body = serde_json::json!({
                "model": self.embed_model,
                "prompt": text,
            });
            let response = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| CrucibleError::Backend {
                    backend: "ollama".into(),
                    message: e.to_string(),
                    retriable: false,
                })?;
            let resp: serde_json::Value =
                response.json().await.map_err(|e| CrucibleError::Backend {
                    backend: "ollama".into(),
                    message: e.to_string(),
                    retriable: false,
                })?;
            let embedding: Vec<f32> = resp["embedding"]
                .as_array()
                .unwrap_or(&vec![])
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            results.push(embedding);
        }
        Ok(results)
    }
}
