//! LLM inference runtime
//!
//! Everything that talks to llama-cpp: backend lifecycle, GGUF preflight,
//! session ownership and the token-generation loop.

pub mod backend;
pub mod error;
pub mod gguf;
pub mod sampler;
pub mod session;
pub mod text;

// Re-export main types for convenience
pub use backend::BackendManager;
pub use error::RuntimeError;
pub use gguf::{preflight_gguf, GgufHeader, GGUF_MAGIC};
pub use session::{Session, SessionConfig, SessionInfo, MAX_BATCH_SIZE, MIN_CONTEXT_SIZE};
pub use text::{has_complete_json_object, Utf8Assembler};
