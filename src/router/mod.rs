// src/router/mod.rs — Tiered query routing
//
// Tier 0: compiled regex patterns, <1ms, confidence 0.95.
// Tier 1: embedding nearest-neighbour voting, skipped when unavailable.
// Tier 2: LLM tool-selection prompt with a single-line directive reply.
// Anything that falls through all tiers becomes a `general` intent.

pub mod neural;
pub mod params;
pub mod patterns;
pub mod training;

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::{GenerationBackend, GenerationRequest};
use neural::NeuralRouter;
use params::{extract_params, ParamMap};
use patterns::PatternMatcher;
use training::TOOL_NAMES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    Pattern,
    Neural,
    Llm,
    Fallback,
}

impl RouteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Pattern => "pattern",
            RouteMethod::Neural => "neural",
            RouteMethod::Llm => "llm",
            RouteMethod::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub tool: String,
    pub params: ParamMap,
    pub confidence: f32,
    pub method: RouteMethod,
}

impl RouteResult {
    pub fn general(query: &str) -> Self {
        let mut params = HashMap::new();
        params.insert("_raw_input".to_string(), query.to_string());
        Self {
            tool: "general".into(),
            params,
            confidence: 0.0,
            method: RouteMethod::Fallback,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        self.tool != "general"
    }
}

/// Parse a single-line tool directive from an LLM reply:
/// `tool: read params: {"file_path": "x.py"}`. Only known tools are
/// accepted; a missing or unparseable params object falls back to the
/// regex extractors.
pub fn parse_tool_directive(reply: &str, query: &str) -> Option<RouteResult> {
    for line in reply.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("tool:") else {
            continue;
        };
        let rest = rest.trim();
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() || !TOOL_NAMES.contains(&name.as_str()) {
            continue;
        }

        let params = rest
            .find("params:")
            .and_then(|idx| {
                let json_part = rest[idx + 7..].trim();
                serde_json::from_str::<serde_json::Value>(json_part).ok()
            })
            .and_then(|v| {
                v.as_object().map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect::<ParamMap>()
                })
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| extract_params(query, &name));

        return Some(RouteResult {
            tool: name,
            params,
            confidence: 0.7,
            method: RouteMethod::Llm,
        });
    }
    None
}

fn tool_selection_prompt(query: &str) -> String {
    format!(
        "You are a command router. Map the user request to one tool.\n\
         Available tools: {tools}.\n\
         Reply with EXACTLY one line in this format and nothing else:\n\
         tool:<name> params:<json object>\n\
         If no tool fits, reply: tool:none\n\n\
         User request: {query}",
        tools = TOOL_NAMES.join(", "),
        query = query,
    )
}

pub struct HybridRouter {
    patterns: PatternMatcher,
    neural: Option<Arc<NeuralRouter>>,
    backend: Arc<dyn GenerationBackend>,
    model: String,
    min_confidence: f32,
    llm_fallback: bool,
}

impl HybridRouter {
    pub fn new(
        neural: Option<Arc<NeuralRouter>>,
        backend: Arc<dyn GenerationBackend>,
        model: impl Into<String>,
        min_confidence: f32,
        llm_fallback: bool,
    ) -> Self {
        Self {
            patterns: PatternMatcher::new(),
            neural,
            backend,
            model: model.into(),
            min_confidence,
            llm_fallback,
        }
    }

    pub fn neural_available(&self) -> bool {
        self.neural.is_some()
    }

    /// Dispatch in strict tier order; always returns a result.
    pub async fn route(&self, query: &str) -> RouteResult {
        // Tier 0
        if let Some(result) = self.patterns.match_query(query) {
            tracing::debug!("Routed by pattern: {} ({})", result.tool, result.confidence);
            return result;
        }

        // Tier 1
        if let Some(neural) = &self.neural {
            match neural.route(query, self.min_confidence).await {
                Ok(Some(result)) => {
                    tracing::debug!("Routed by neural: {} ({:.2})", result.tool, result.confidence);
                    return result;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Neural tier failed, skipping: {}", e),
            }
        }

        // Tier 2
        if self.llm_fallback {
            let request = GenerationRequest::new(self.model.clone(), tool_selection_prompt(query))
                .with_temperature(0.0)
                .with_max_tokens(100);
            match self.backend.generate(request).await {
                Ok(response) => {
                    if let Some(result) = parse_tool_directive(&response.text, query) {
                        tracing::debug!("Routed by LLM: {}", result.tool);
                        return result;
                    }
                }
                Err(e) => tracing::warn!("LLM routing tier failed: {}", e),
            }
        }

        RouteResult::general(query)
    }
}
