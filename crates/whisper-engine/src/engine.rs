use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tokio::runtime::{Builder, EnterGuard, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    handle::{EngineHandle, Shared},
    signal,
    types::{EngineConfig, EngineError, Phase, StopReason, panic_message},
};

/// Owner of the engine's runtime.
///
/// Lives on the thread that will call [`run_main`](Self::run_main); hand
/// [`EngineHandle`]s to everybody else.
pub struct EventEngine {
    config: EngineConfig,
    runtime: Runtime,
    shared: Arc<Shared>,
}

impl EventEngine {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            config,
            runtime,
            shared: Arc::new(Shared::new()),
        })
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            runtime: self.runtime.handle().clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Enters the runtime context without driving it, so I/O objects can be
    /// registered with the engine before `run_main`.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    pub fn stop_main(&self, reason: StopReason) -> bool {
        self.handle().stop_main(reason)
    }

    /// Drives the engine until `main` returns, then cancels and awaits every
    /// task still alive.
    ///
    /// Errors and panics from `main` are captured and returned, as is a
    /// fault that stopped the engine. `None` means a clean run.
    pub fn run_main<F, Fut>(&self, main: F) -> Option<EngineError>
    where
        F: FnOnce(EngineHandle) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if let Err(e) = self.begin_run() {
            return Some(e);
        }

        let handle = self.handle();
        if self.config.handle_signals {
            handle.create_task("signal listener", signal::listen(handle.clone()));
        }

        info!("Engine running");
        let outcome = self
            .runtime
            .block_on(AssertUnwindSafe(main(handle.clone())).catch_unwind());

        // `main` may have returned without draining.
        self.runtime.block_on(handle.drain());
        let reason = self.finish_run();
        info!(?reason, "Engine stopped");

        match outcome {
            Err(panic) => Some(EngineError::Panicked(panic_message(panic))),
            Ok(Err(e)) => Some(EngineError::Main(e)),
            Ok(Ok(())) => match reason {
                Some(StopReason::Fault { task, error }) => Some(EngineError::Fault { task, error }),
                _ => None,
            },
        }
    }

    fn begin_run(&self) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Idle {
            return Err(EngineError::AlreadyRunning);
        }
        if state.stop.is_cancelled() {
            debug!("Resetting stop signal from a previous run");
        }
        state.stop = CancellationToken::new();
        state.tasks = CancellationToken::new();
        state.reason = None;
        state.phase = Phase::Running;
        self.shared.tracker.reopen();
        Ok(())
    }

    fn finish_run(&self) -> Option<StopReason> {
        let mut state = self.shared.state.lock();
        state.phase = Phase::Idle;
        state.reason.clone()
    }
}
