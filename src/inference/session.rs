//! Decoding sessions
//!
//! A session owns one model, one decode context, one reusable token batch and
//! one sampler, all bound to a fixed context window for the session's whole
//! life. llama-cpp-2 contexts borrow their model, so all four resources live
//! on a dedicated worker thread whose stack frame is their owner: a failed
//! creation stage early-returns and Rust drops whatever was already acquired
//! in reverse order, and session destruction is the thread unwinding its
//! frame. The host-facing `Session` value talks to the worker over channels
//! and blocks for each reply, keeping the boundary synchronous.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use crate::inference::backend::BackendManager;
use crate::inference::error::RuntimeError;
use crate::inference::gguf::preflight_gguf;
use crate::inference::sampler::{build_sampler, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use crate::inference::text::{has_complete_json_object, Utf8Assembler};

/// Smallest context window a session will run with.
pub const MIN_CONTEXT_SIZE: u32 = 512;

/// Widest batch submitted to the engine in one decode call.
pub const MAX_BATCH_SIZE: u32 = 512;

/// Session sizing, resolved once at creation and fixed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub context_size: u32,
    pub batch_size: u32,
    pub threads: i32,
}

impl SessionConfig {
    /// Clamps host-supplied sizing: context window at least
    /// [`MIN_CONTEXT_SIZE`], batch width = min(context, [`MAX_BATCH_SIZE`]),
    /// at least one thread.
    pub fn new(context_size: i32, threads: i32) -> Self {
        let context_size = context_size.max(MIN_CONTEXT_SIZE as i32) as u32;
        Self {
            context_size,
            batch_size: context_size.min(MAX_BATCH_SIZE),
            threads: threads.max(1),
        }
    }
}

/// Model metadata captured when a session comes up.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub path: String,
    pub context_size: u32,
    pub batch_size: u32,
    pub threads: i32,
    pub vocab_size: i32,
    pub embedding_dim: i32,
    pub trained_context_length: u32,
    pub param_count: u64,
    pub size_bytes: u64,
}

struct GenerateRequest {
    prompt: String,
    max_tokens: i32,
    temperature: f32,
    top_p: f32,
}

enum WorkerCommand {
    Generate {
        request: GenerateRequest,
        reply: Sender<Result<String, RuntimeError>>,
    },
    Shutdown,
}

/// One loaded model plus its decode context, batch buffer and sampler.
///
/// Generate calls on one session are serialized by its worker thread; the
/// host is expected not to interleave them. Dropping the session shuts the
/// worker down and joins it, so destruction is synchronous and happens at
/// most once.
#[derive(Debug)]
pub struct Session {
    command_tx: Option<Sender<WorkerCommand>>,
    worker: Option<JoinHandle<()>>,
    info: SessionInfo,
}

impl Session {
    /// Loads a model and brings up a fully constructed session.
    ///
    /// The backend is acquired once before the model load and released
    /// exactly once when the session (or a failed creation attempt) is torn
    /// down. Each creation stage gates on the previous one; the first failure
    /// rolls back everything acquired so far and surfaces as the
    /// stage-specific error.
    pub fn open(
        backend: Arc<BackendManager>,
        path: impl Into<PathBuf>,
        config: SessionConfig,
    ) -> Result<Self, RuntimeError> {
        let path: PathBuf = path.into();
        if path.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "model path cannot be empty".into(),
            ));
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("localgen-session".into())
            .spawn(move || worker_main(backend, path, config, ready_tx, command_rx))
            .map_err(|e| RuntimeError::Worker(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok(Self {
                command_tx: Some(command_tx),
                worker: Some(worker),
                info,
            }),
            Ok(Err(e)) => {
                // The worker has already rolled back and released the backend.
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(RuntimeError::Worker(
                    "session worker exited before reporting readiness".into(),
                ))
            }
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn context_size(&self) -> u32 {
        self.info.context_size
    }

    pub fn batch_size(&self) -> u32 {
        self.info.batch_size
    }

    /// Runs one generation call to completion and returns the decoded text.
    ///
    /// `max_tokens <= 0` means "fill the remaining context window".
    pub fn generate(
        &self,
        prompt: &str,
        max_tokens: i32,
        temperature: f32,
        top_p: f32,
    ) -> Result<String, RuntimeError> {
        let command_tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| RuntimeError::Worker("session is closed".into()))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        command_tx
            .send(WorkerCommand::Generate {
                request: GenerateRequest {
                    prompt: prompt.to_string(),
                    max_tokens,
                    temperature,
                    top_p,
                },
                reply: reply_tx,
            })
            .map_err(|e| RuntimeError::Worker(e.to_string()))?;

        reply_rx
            .recv()
            .map_err(|e| RuntimeError::Worker(e.to_string()))?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn worker_main(
    backend: Arc<BackendManager>,
    path: PathBuf,
    config: SessionConfig,
    ready_tx: Sender<Result<SessionInfo, RuntimeError>>,
    command_rx: Receiver<WorkerCommand>,
) {
    let engine = backend.acquire();
    // Every native resource is a local of run_session; by the time it
    // returns they have all been dropped, so the release below always runs
    // after the rollback and exactly once per acquire.
    let outcome = run_session(engine, &path, config, &ready_tx, command_rx);
    backend.release();
    if let Err(e) = outcome {
        let _ = ready_tx.send(Err(e));
    }
}

/// Owns the session's native resources for the session's whole life.
///
/// Acquisition order is model, context, batch, sampler; drops run in reverse
/// on both the failure paths and the final shutdown.
fn run_session(
    engine: Option<Arc<LlamaBackend>>,
    path: &Path,
    config: SessionConfig,
    ready_tx: &Sender<Result<SessionInfo, RuntimeError>>,
    command_rx: Receiver<WorkerCommand>,
) -> Result<(), RuntimeError> {
    preflight_gguf(path)?;

    let engine = engine.ok_or_else(|| {
        RuntimeError::ModelLoadFailed("inference backend is not available".into())
    })?;

    let model_params = LlamaModelParams::default();
    let model = LlamaModel::load_from_file(&engine, path, &model_params)
        .map_err(|e| RuntimeError::ModelLoadFailed(e.to_string()))?;

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(config.context_size))
        .with_n_batch(config.batch_size)
        .with_n_ubatch(config.batch_size)
        .with_n_threads(config.threads)
        .with_n_threads_batch(config.threads);
    let mut ctx = model
        .new_context(&engine, ctx_params)
        .map_err(|e| RuntimeError::ContextCreateFailed(e.to_string()))?;

    if config.batch_size == 0 {
        return Err(RuntimeError::BatchAllocFailed(
            "batch width must be positive".into(),
        ));
    }
    let mut batch = LlamaBatch::new(config.batch_size as usize, 1);

    let mut sampler = build_sampler(DEFAULT_TEMPERATURE, DEFAULT_TOP_P)?;

    let info = SessionInfo {
        path: path.to_string_lossy().into_owned(),
        context_size: config.context_size,
        batch_size: config.batch_size,
        threads: config.threads,
        vocab_size: model.n_vocab(),
        embedding_dim: model.n_embd(),
        trained_context_length: model.n_ctx_train(),
        param_count: model.n_params() as u64,
        size_bytes: model.size() as u64,
    };
    tracing::info!(
        path = %path.display(),
        context_size = config.context_size,
        batch_size = config.batch_size,
        threads = config.threads,
        "model loaded"
    );
    let _ = ready_tx.send(Ok(info));

    while let Ok(command) = command_rx.recv() {
        match command {
            WorkerCommand::Generate { request, reply } => {
                let result =
                    run_generation(&model, &mut ctx, &mut batch, &mut sampler, config, &request);
                let _ = reply.send(result);
            }
            WorkerCommand::Shutdown => break,
        }
    }

    Ok(())
}

/// Drives the sample → accept → detokenize → decode cycle for one call.
fn run_generation(
    model: &LlamaModel,
    ctx: &mut LlamaContext<'_>,
    batch: &mut LlamaBatch,
    sampler: &mut LlamaSampler,
    config: SessionConfig,
    request: &GenerateRequest,
) -> Result<String, RuntimeError> {
    tracing::info!(
        prompt_chars = request.prompt.len(),
        max_tokens = request.max_tokens,
        temperature = request.temperature,
        top_p = request.top_p,
        "generate start"
    );

    // Each call starts from a blank context; an aborted earlier call must
    // not influence this one. The fresh sampler likewise carries no
    // repetition history across calls.
    ctx.clear_kv_cache();
    *sampler = build_sampler(request.temperature, request.top_p)?;

    let prompt_tokens = model
        .str_to_token(&request.prompt, AddBos::Always)
        .map_err(|e| RuntimeError::TokenizationFailed(e.to_string()))?;
    if prompt_tokens.is_empty() {
        return Err(RuntimeError::TokenizationFailed(
            "prompt produced no tokens".into(),
        ));
    }
    tracing::debug!(prompt_tokens = prompt_tokens.len(), "prompt tokenized");

    if prompt_tokens.len() >= (config.context_size as usize).saturating_sub(4) {
        return Err(RuntimeError::PromptTooLong {
            prompt_tokens: prompt_tokens.len(),
            context_size: config.context_size,
        });
    }

    let n_predict = resolve_n_predict(request.max_tokens, config.context_size, prompt_tokens.len());

    decode_in_batches(
        ctx,
        batch,
        &prompt_tokens,
        0,
        true,
        config.batch_size as usize,
    )?;

    let mut assembler = Utf8Assembler::with_capacity(n_predict.saturating_mul(4));
    let mut position = prompt_tokens.len() as i32;
    let last_position = config.context_size as i32 - 2;
    let mut generated = 0usize;

    for _ in 0..n_predict {
        if position >= last_position {
            tracing::debug!("context window exhausted");
            break;
        }

        let token = sampler.sample(ctx, -1);
        sampler.accept(token);
        generated += 1;

        if model.is_eog_token(token) {
            tracing::debug!("end-of-generation token");
            break;
        }

        let piece = model
            .token_to_bytes(token, Special::Tokenize)
            .map_err(|e| RuntimeError::DecodeFailed(format!("detokenize: {e}")))?;
        if assembler.push(&piece) && has_complete_json_object(assembler.text()) {
            tracing::info!("stopping early after first complete JSON object");
            break;
        }

        // Decode the accepted token to prepare the next step's logits.
        decode_in_batches(
            ctx,
            batch,
            std::slice::from_ref(&token),
            position,
            true,
            config.batch_size as usize,
        )?;
        position += 1;
    }

    let output = assembler.into_text();
    tracing::info!(
        generated_tokens = generated,
        output_chars = output.len(),
        "generate done"
    );
    Ok(output)
}

/// How many tokens one call may generate. A non-positive request means
/// "fill the remaining context", always at least one step.
fn resolve_n_predict(requested: i32, context_size: u32, prompt_len: usize) -> usize {
    if requested > 0 {
        requested as usize
    } else {
        (context_size as usize)
            .saturating_sub(prompt_len)
            .saturating_sub(2)
            .max(1)
    }
}

/// Feeds a token sequence to the engine in chunks no wider than the batch.
///
/// Each token carries its absolute position (`start_pos + offset`); logits
/// are requested only for the final token of the whole sequence, and only
/// when the caller asked for them. The first non-zero decode status aborts
/// without attempting the remaining chunks.
fn decode_in_batches(
    ctx: &mut LlamaContext<'_>,
    batch: &mut LlamaBatch,
    tokens: &[LlamaToken],
    start_pos: i32,
    logits_on_last: bool,
    batch_width: usize,
) -> Result<(), RuntimeError> {
    if tokens.is_empty() {
        return Ok(());
    }

    let last = tokens.len() - 1;
    let mut offset = 0usize;
    for chunk in tokens.chunks(batch_width.max(1)) {
        batch.clear();
        for (i, &token) in chunk.iter().enumerate() {
            let index = offset + i;
            let wants_logits = logits_on_last && index == last;
            batch
                .add(token, start_pos + index as i32, &[0], wants_logits)
                .map_err(|e| RuntimeError::DecodeFailed(format!("batch add: {e}")))?;
        }
        ctx.decode(batch)
            .map_err(|e| RuntimeError::DecodeFailed(e.to_string()))?;
        offset += chunk.len();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_clamps_small_context_to_minimum() {
        let config = SessionConfig::new(128, 4);
        assert_eq!(config.context_size, 512);
        assert_eq!(config.batch_size, 512);

        let config = SessionConfig::new(-1, 4);
        assert_eq!(config.context_size, 512);
    }

    #[test]
    fn test_config_batch_width_tracks_context_up_to_cap() {
        let config = SessionConfig::new(512, 1);
        assert_eq!(config.batch_size, 512);

        let config = SessionConfig::new(4096, 1);
        assert_eq!(config.context_size, 4096);
        assert_eq!(config.batch_size, 512);
    }

    #[test]
    fn test_config_clamps_threads_to_one() {
        assert_eq!(SessionConfig::new(512, 0).threads, 1);
        assert_eq!(SessionConfig::new(512, -8).threads, 1);
        assert_eq!(SessionConfig::new(512, 6).threads, 6);
    }

    #[test]
    fn test_n_predict_uses_request_when_positive() {
        assert_eq!(resolve_n_predict(64, 512, 10), 64);
    }

    #[test]
    fn test_n_predict_auto_fills_remaining_context() {
        assert_eq!(resolve_n_predict(0, 512, 10), 500);
        assert_eq!(resolve_n_predict(-1, 512, 10), 500);
    }

    #[test]
    fn test_n_predict_auto_is_at_least_one() {
        assert_eq!(resolve_n_predict(0, 512, 511), 1);
    }

    #[test]
    fn test_open_rejects_empty_path_before_any_allocation() {
        let backend = Arc::new(BackendManager::new());
        let err = Session::open(backend.clone(), "", SessionConfig::new(512, 1)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
        assert_eq!(backend.ref_count(), 0);
    }
}
