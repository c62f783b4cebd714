//! Handle-based boundary
//!
//! Hosts address sessions through opaque `u64` handles. `Runtime` is the
//! arena behind that boundary: it owns the backend lifecycle manager and a
//! map from handle to session, and translates handle operations into calls
//! on the owned sessions. Handle 0 is never issued and means "no session".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::inference::{BackendManager, RuntimeError, Session, SessionConfig, SessionInfo};

/// Session arena with load / generate / unload operations.
pub struct Runtime {
    backend: Arc<BackendManager>,
    sessions: DashMap<u64, Session>,
    next_handle: AtomicU64,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(BackendManager::new()))
    }

    /// Builds a runtime around an injected backend manager. Tests use this to
    /// observe the reference count.
    pub fn with_backend(backend: Arc<BackendManager>) -> Self {
        Self {
            backend,
            sessions: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Loads a model and returns the handle of the new session.
    ///
    /// `context_size` is clamped to at least 512 and `threads` to at least 1.
    pub fn load_model(
        &self,
        path: &str,
        context_size: i32,
        threads: i32,
    ) -> Result<u64, RuntimeError> {
        if path.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "model path cannot be empty".into(),
            ));
        }

        let config = SessionConfig::new(context_size, threads);
        let session = Session::open(Arc::clone(&self.backend), path, config)?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(handle, session);
        tracing::debug!(handle, path, "session registered");
        Ok(handle)
    }

    /// Releases the session behind `handle`.
    ///
    /// Handle 0, unknown handles and already-unloaded handles are no-ops, so
    /// a stale second unload can never double-free or drive the backend
    /// count below zero.
    pub fn unload_model(&self, handle: u64) {
        if handle == 0 {
            return;
        }
        if self.sessions.remove(&handle).is_some() {
            tracing::debug!(handle, "session unloaded");
        }
    }

    /// Runs one generation call on the session behind `handle`.
    ///
    /// `max_tokens <= 0` means "fill the remaining context window".
    pub fn generate(
        &self,
        handle: u64,
        prompt: &str,
        max_tokens: i32,
        temperature: f32,
        top_p: f32,
    ) -> Result<String, RuntimeError> {
        let session = self.sessions.get(&handle).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!("invalid model handle {handle}"))
        })?;
        session.generate(prompt, max_tokens, temperature, top_p)
    }

    /// Metadata captured when the session behind `handle` was loaded.
    pub fn session_info(&self, handle: u64) -> Option<SessionInfo> {
        self.sessions.get(&handle).map(|s| s.info().clone())
    }

    /// The backend lifecycle manager this runtime sessions against.
    pub fn backend(&self) -> &BackendManager {
        &self.backend
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide default runtime for hosts that want C-style free calls
/// instead of owning a `Runtime` value.
pub fn default_runtime() -> &'static Runtime {
    static RUNTIME: Lazy<Runtime> = Lazy::new(Runtime::new);
    &RUNTIME
}
