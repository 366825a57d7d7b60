// src/infra/errors.rs — Error types for Crucible

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrucibleError {
    // Routing
    #[error("No routing tier produced a result (last tier: {tier})")]
    RouterFailed { tier: String },

    // Generation (local to one candidate)
    #[error("Candidate {candidate_id} generation failed: {cause}")]
    GenerationFailed { candidate_id: u32, cause: String },

    // Validation
    #[error("Validator '{rule}' timed out after {seconds}s")]
    ValidatorTimeout { rule: String, seconds: u64 },

    #[error("Validator '{rule}' is not installed")]
    ValidatorMissing { rule: String },

    #[error("Validator '{rule}' crashed: {cause}")]
    ValidatorCrashed { rule: String, cause: String },

    // Persistence (swallowed at the tracker boundary)
    #[error("Persistence failed for '{resource}': {cause}")]
    PersistenceFailed { resource: String, cause: String },

    #[error("Cancellation requested")]
    CancellationRequested,

    // Back-end
    #[error("Backend '{backend}' error: {message}")]
    Backend {
        backend: String,
        message: String,
        retriable: bool,
    },

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrucibleError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, CrucibleError::Backend { retriable: true, .. })
    }

    /// Whether the error is local to a single candidate or rule and the
    /// pipeline should continue with the rest of the pool.
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            CrucibleError::GenerationFailed { .. }
                | CrucibleError::ValidatorTimeout { .. }
                | CrucibleError::ValidatorMissing { .. }
                | CrucibleError::ValidatorCrashed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_backend() {
        let e = CrucibleError::Backend {
            backend: "ollama".into(),
            message: "connection refused".into(),
            retriable: true,
        };
        assert!(e.is_retriable());
    }

    #[test]
    fn test_not_retriable() {
        let e = CrucibleError::RouterFailed { tier: "llm".into() };
        assert!(!e.is_retriable());
        assert!(!e.is_candidate_local());
    }

    #[test]
    fn test_candidate_local() {
        let e = CrucibleError::GenerationFailed {
            candidate_id: 2,
            cause: "timeout".into(),
        };
        assert!(e.is_candidate_local());

        let e = CrucibleError::ValidatorMissing { rule: "ruff".into() };
        assert!(e.is_candidate_local());
    }

    #[test]
    fn test_display_messages() {
        let e = CrucibleError::ValidatorTimeout {
            rule: "mypy".into(),
            seconds: 10,
        };
        assert_eq!(e.to_string(), "Validator 'mypy' timed out after 10s");

        let e = CrucibleError::PersistenceFailed {
            resource: "outcomes.sqlite".into(),
            cause: "disk full".into(),
        };
        assert!(e.to_string().contains("outcomes.sqlite"));
    }
}
