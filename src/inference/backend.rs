//! Backend lifecycle management
//!
//! llama.cpp keeps process-global state that must be initialized once before
//! any model is loaded and freed once the last session is gone.
//! `BackendManager` reference-counts sessions: the engine comes up on the
//! 0→1 transition and goes down on 1→0, with a single mutex serializing the
//! transitions. The manager is an ordinary value — each `Runtime` owns one,
//! and tests can construct their own instead of reaching for a hidden global.

use std::sync::{Arc, Mutex};

use llama_cpp_2::llama_backend::LlamaBackend;

struct BackendState {
    refs: usize,
    engine: Option<Arc<LlamaBackend>>,
}

/// Reference-counted init/teardown of the shared inference engine.
pub struct BackendManager {
    state: Mutex<BackendState>,
}

impl BackendManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                refs: 0,
                engine: None,
            }),
        }
    }

    /// Registers one more user of the shared engine.
    ///
    /// Initializes the engine and routes its log lines into `tracing` on the
    /// first acquisition. The count is incremented even when engine init
    /// fails; callers must not assume the engine is ready and should treat
    /// the subsequent model-load failure as the real error signal. Returns
    /// the engine when it is available.
    pub fn acquire(&self) -> Option<Arc<LlamaBackend>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.refs == 0 {
            match LlamaBackend::init() {
                Ok(backend) => {
                    llama_cpp_2::send_logs_to_tracing(llama_cpp_2::LogOptions::default());
                    tracing::info!("inference backend initialized");
                    state.engine = Some(Arc::new(backend));
                }
                Err(e) => {
                    tracing::error!("failed to initialize inference backend: {e}");
                }
            }
        }
        state.refs += 1;
        state.engine.clone()
    }

    /// Releases one user of the shared engine.
    ///
    /// A no-op when the count is already zero; the count never goes negative.
    /// The engine is torn down when the last user releases.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.refs == 0 {
            return;
        }
        state.refs -= 1;
        if state.refs == 0 {
            state.engine = None;
            tracing::info!("inference backend released");
        }
    }

    /// Current number of registered users. Exposed for tests and diagnostics.
    pub fn ref_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).refs
    }
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::new()
    }
}
