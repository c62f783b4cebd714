//! localgen — embedded text-generation runtime
//!
//! Loads a GGUF causal language model, binds it to a decoding session with a
//! fixed context window, and drives an autoregressive generation loop that
//! returns valid UTF-8 text with an early stop on the first complete
//! top-level JSON object. Hosts talk to it through opaque integer session
//! handles: [`Runtime::load_model`], [`Runtime::generate`],
//! [`Runtime::unload_model`].

pub mod inference;
pub mod runtime;

pub use inference::{
    BackendManager, RuntimeError, Session, SessionConfig, SessionInfo, MAX_BATCH_SIZE,
    MIN_CONTEXT_SIZE,
};
pub use runtime::{default_runtime, Runtime};
