use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::oneshot,
    task::AbortHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info, info_span};

use crate::types::{EngineError, Phase, StopReason, panic_message};

pub(crate) struct RunState {
    /// Fires once per run; `keep_running` waits on it.
    pub(crate) stop: CancellationToken,
    /// Parent of every task spawned during the current run.
    pub(crate) tasks: CancellationToken,
    pub(crate) reason: Option<StopReason>,
    pub(crate) phase: Phase,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<RunState>,
    pub(crate) tracker: TaskTracker,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let tasks = CancellationToken::new();
        // Nothing may run before the first `run_main`.
        tasks.cancel();
        Self {
            state: Mutex::new(RunState {
                stop: CancellationToken::new(),
                tasks,
                reason: None,
                phase: Phase::Idle,
            }),
            tracker: TaskTracker::new(),
        }
    }

    fn stop(&self, reason: StopReason) -> bool {
        let mut state = self.state.lock();
        if state.stop.is_cancelled() {
            return false;
        }
        info!(?reason, "Stopping engine");
        state.reason = Some(reason);
        state.stop.cancel();
        true
    }
}

/// A named future started by `main` before it waits for the stop signal.
pub struct InitialTask {
    name: &'static str,
    fut: Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>,
}

impl InitialTask {
    pub fn new<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            fut: Box::pin(fut),
        }
    }
}

/// Cloneable, thread-safe reference to an [`EventEngine`](crate::EventEngine).
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) runtime: Handle,
    pub(crate) shared: Arc<Shared>,
}

impl EngineHandle {
    /// Hands `fut` to the engine thread. Safe to call from any thread.
    ///
    /// The future runs until it completes or the engine drains. If the
    /// engine is not running the future is dropped unpolled and the returned
    /// handle resolves to [`EngineError::Cancelled`].
    pub fn schedule<F>(&self, fut: F) -> Scheduled<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        // Held across the spawn so draining cannot slip in between the
        // phase check and the tracker registration.
        let state = self.shared.state.lock();
        if state.phase != Phase::Running {
            debug!(phase = ?state.phase, "Dropping future scheduled on a stopped engine");
            return Scheduled { rx, abort: None };
        }

        let tasks = state.tasks.clone();
        let shared = Arc::clone(&self.shared);
        let task = async move {
            tokio::select! {
                biased;
                _ = tasks.cancelled() => {}
                out = AssertUnwindSafe(fut).catch_unwind() => match out {
                    Ok(value) => {
                        let _ = tx.send(value);
                    }
                    Err(panic) => {
                        let error = panic_message(panic);
                        error!(%error, "Scheduled future panicked");
                        shared.stop(StopReason::Fault {
                            task: "scheduled".to_string(),
                            error,
                        });
                    }
                },
            }
        };
        let join = self.shared.tracker.spawn_on(task, &self.runtime);
        drop(state);

        Scheduled {
            rx,
            abort: Some(join.abort_handle()),
        }
    }

    /// Spawns an engine-owned task.
    ///
    /// An error or panic escaping `fut` is an engine fault: it is logged and
    /// stops the engine. Cancellation during drain is a normal exit.
    pub fn create_task<F>(&self, name: &'static str, fut: F) -> AbortHandle
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let tasks = self.shared.state.lock().tasks.clone();
        let shared = Arc::clone(&self.shared);

        let task = async move {
            debug!("{name} running");
            let outcome = tokio::select! {
                biased;
                _ = tasks.cancelled() => {
                    debug!("{name} cancelled");
                    return;
                }
                outcome = AssertUnwindSafe(fut).catch_unwind() => outcome,
            };

            let error = match outcome {
                Ok(Ok(())) => {
                    debug!("{name} finished");
                    return;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic),
            };
            error!(%error, "{name} got exception");
            shared.stop(StopReason::Fault {
                task: name.to_string(),
                error,
            });
        }
        .instrument(info_span!("task", task = name));

        self.shared
            .tracker
            .spawn_on(task, &self.runtime)
            .abort_handle()
    }

    /// Fires the stop signal. Returns `false` if it had already fired.
    pub fn stop_main(&self, reason: StopReason) -> bool {
        self.shared.stop(reason)
    }

    pub fn stop_main_result(&self) -> Option<StopReason> {
        self.shared.state.lock().reason.clone()
    }

    /// Resolves once the stop signal fires.
    pub async fn keep_running(&self) {
        let stop = self.shared.state.lock().stop.clone();
        stop.cancelled_owned().await;
    }

    /// Body of a typical `main`: start `tasks`, wait for the stop signal, then
    /// cancel and await everything spawned on the engine.
    ///
    /// Must be awaited by `main` itself, never from an engine task.
    pub async fn run_until_stopped(
        &self,
        tasks: impl IntoIterator<Item = InitialTask>,
    ) -> StopReason {
        for task in tasks {
            self.create_task(task.name, task.fut);
        }
        self.keep_running().await;
        self.drain().await;
        self.stop_main_result().unwrap_or(StopReason::Requested)
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    pub(crate) async fn drain(&self) {
        {
            let mut state = self.shared.state.lock();
            state.phase = Phase::Draining;
            state.tasks.cancel();
        }
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
    }
}

/// Result slot of a [`EngineHandle::schedule`] call.
///
/// Resolves to the future's output, or to [`EngineError::Cancelled`] when
/// the future was cancelled, dropped by a draining engine, or panicked.
pub struct Scheduled<T> {
    rx: oneshot::Receiver<T>,
    abort: Option<AbortHandle>,
}

impl<T> Scheduled<T> {
    /// Blocks the calling thread until the result is ready.
    ///
    /// Must not be called from the engine thread.
    pub fn wait(self) -> Result<T, EngineError> {
        self.rx.blocking_recv().map_err(|_| EngineError::Cancelled)
    }

    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

impl<T> Future for Scheduled<T> {
    type Output = Result<T, EngineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| EngineError::Cancelled))
    }
}
