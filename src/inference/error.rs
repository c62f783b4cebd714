//! Runtime error taxonomy
//!
//! Every failure the boundary can surface maps to one named variant with a
//! human-readable message. Argument errors are raised before any native
//! allocation; resource errors roll back session construction; runtime errors
//! abort only the in-flight generate call.

use thiserror::Error;

/// Errors surfaced by the load / generate / unload boundary.
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    /// Null, empty or out-of-range input, or a handle that names no session.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The model file could not be loaded (missing, corrupt, or the engine
    /// rejected it). Also covers an engine that never came up: backend init
    /// failure is not signaled on its own, the failed load is the signal.
    #[error("failed to load model: {0}")]
    ModelLoadFailed(String),

    /// The decode context could not be created for the requested sizing.
    #[error("failed to create decode context: {0}")]
    ContextCreateFailed(String),

    /// The reusable token batch could not be allocated.
    #[error("failed to allocate token batch: {0}")]
    BatchAllocFailed(String),

    /// Sampler construction failed (at load or on a per-call reset).
    #[error("failed to initialize sampler: {0}")]
    SamplerInitFailed(String),

    /// The prompt produced no tokens, or the tokenizer itself failed.
    #[error("prompt tokenization failed: {0}")]
    TokenizationFailed(String),

    /// The prompt does not leave room for generation in the context window.
    #[error("prompt is too long for the context window ({prompt_tokens} tokens, context size {context_size})")]
    PromptTooLong {
        prompt_tokens: usize,
        context_size: u32,
    },

    /// The engine reported a non-zero status while decoding. Fatal for the
    /// in-flight call; the session stays usable.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The session's worker thread is gone or unreachable.
    #[error("session worker unavailable: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failed_stage() {
        let err = RuntimeError::ModelLoadFailed("no such file".into());
        assert!(err.to_string().contains("load model"));

        let err = RuntimeError::PromptTooLong {
            prompt_tokens: 600,
            context_size: 512,
        };
        assert!(err.to_string().contains("600"));
        assert!(err.to_string().contains("512"));
    }
}
