//! Lazy, idle-reaped supervision of the engine subprocess.
//!
//! One supervisor exists per distinct Prisma schema. The subprocess is
//! started by the first request after construction or a reap, and stopped
//! again once no request has completed for the close timeout. Readers
//! share the engine handle through the read lock; cold start and shutdown
//! take the write lock.
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::PrismaEngine;
use super::QueryEngine;
use super::DEFAULT_READY_BUDGET;
use crate::error::EngineError;

// the idle timer is parked far in the future until a completion arms it
const IDLE_PARKED: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Constructs the engine on cold start. The indirection keeps the
/// supervisor independent of the subprocess so it can be exercised without
/// one.
#[async_trait]
pub(crate) trait EngineStarter: Send + Sync {
    async fn start(&self) -> Result<Box<dyn QueryEngine>, EngineError>;
}

struct PrismaStarter {
    prisma_schema: String,
    wundergraph_dir: PathBuf,
}

#[async_trait]
impl EngineStarter for PrismaStarter {
    async fn start(&self) -> Result<Box<dyn QueryEngine>, EngineError> {
        let engine = PrismaEngine::start(
            &self.prisma_schema,
            &self.wundergraph_dir,
            DEFAULT_READY_BUDGET,
        )
        .await?;
        Ok(Box::new(engine))
    }
}

struct State {
    engine: Option<Box<dyn QueryEngine>>,
    closed: bool,
}

/// A per-schema engine supervisor.
pub struct LazyEngine {
    close_timeout: Duration,
    starter: Box<dyn EngineStarter>,
    state: RwLock<State>,
    processed: mpsc::Sender<()>,
}

impl LazyEngine {
    /// Creates the supervisor and spawns its loop. The loop runs until
    /// `close_signal` fires, after which the engine rejects every request.
    pub(crate) fn spawn(
        starter: Box<dyn EngineStarter>,
        close_timeout: Duration,
        close_signal: CancellationToken,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1);
        let engine = Arc::new(LazyEngine {
            close_timeout,
            starter,
            state: RwLock::new(State {
                engine: None,
                closed: false,
            }),
            processed: tx,
        });
        tokio::spawn(Self::supervise(Arc::clone(&engine), rx, close_signal));
        engine
    }

    /// Waits for completions, idle expiry and the close signal. The idle
    /// timer only starts counting once a request has completed and re-arms
    /// on every completion.
    async fn supervise(
        this: Arc<Self>,
        mut processed: mpsc::Receiver<()>,
        close_signal: CancellationToken,
    ) {
        let idle = tokio::time::sleep(IDLE_PARKED);
        tokio::pin!(idle);
        loop {
            tokio::select! {
                Some(()) = processed.recv() => {
                    idle.as_mut().reset(Instant::now() + this.close_timeout);
                }
                () = idle.as_mut() => {
                    let mut state = this.state.write().await;
                    if let Some(mut engine) = state.engine.take() {
                        tracing::debug!("reaping idle query engine");
                        engine.close().await;
                    }
                    drop(state);
                    idle.as_mut().reset(Instant::now() + IDLE_PARKED);
                }
                _ = close_signal.cancelled() => {
                    let mut state = this.state.write().await;
                    if let Some(mut engine) = state.engine.take() {
                        engine.close().await;
                    }
                    state.closed = true;
                    return;
                }
            }
        }
    }

    /// Executes one request, cold-starting the subprocess when necessary.
    pub async fn execute(&self, request: &[u8], out: &mut Vec<u8>) -> Result<(), EngineError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(EngineError::Closed);
        }
        match state.engine.as_deref() {
            None => {
                drop(state);
                self.init_engine_and_execute(request, out).await
            }
            Some(engine) => self.run(engine, request, out).await,
        }
    }

    async fn init_engine_and_execute(
        &self,
        request: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(EngineError::Closed);
        }
        // a concurrent cold start may have won the write lock first
        if state.engine.is_none() {
            state.engine = Some(self.starter.start().await?);
        }
        match state.engine.as_deref() {
            Some(engine) => self.run(engine, request, out).await,
            None => Err(EngineError::StartFailed {
                reason: "engine handle is empty after initialization".to_string(),
            }),
        }
    }

    async fn run(
        &self,
        engine: &dyn QueryEngine,
        request: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let result = engine.execute(request, out).await;
        // completions coalesce: a token already in flight re-arms the idle
        // timer just the same, and the send must never block while the
        // engine lock is held or after supervisor shutdown
        let _ = self.processed.try_send(());
        result
    }
}

impl Drop for LazyEngine {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_read() {
            debug_assert!(
                state.engine.is_none(),
                "the engine must be closed before its supervisor is dropped"
            );
        }
    }
}

/// Process-wide mapping of Prisma schema strings to their supervisors.
pub struct EngineRegistry {
    engines: Mutex<HashMap<String, Arc<LazyEngine>>>,
    close_signal: CancellationToken,
}

impl EngineRegistry {
    pub fn new(close_signal: CancellationToken) -> Self {
        EngineRegistry {
            engines: Mutex::new(HashMap::new()),
            close_signal,
        }
    }

    /// Returns the supervisor for the schema, creating and spawning it on
    /// first use.
    pub(crate) fn engine(
        &self,
        prisma_schema: &str,
        wundergraph_dir: &Path,
        close_timeout: Duration,
    ) -> Arc<LazyEngine> {
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(prisma_schema) {
            return Arc::clone(engine);
        }
        let starter = Box::new(PrismaStarter {
            prisma_schema: prisma_schema.to_string(),
            wundergraph_dir: wundergraph_dir.to_path_buf(),
        });
        let engine = LazyEngine::spawn(starter, close_timeout, self.close_signal.child_token());
        engines.insert(prisma_schema.to_string(), Arc::clone(&engine));
        engine
    }
}

impl Drop for EngineRegistry {
    fn drop(&mut self) {
        self.close_signal.cancel();
    }
}
