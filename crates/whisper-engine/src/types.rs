#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Stop the engine on SIGINT/SIGTERM/SIGQUIT (Ctrl-C/Ctrl-Break on windows).
    pub handle_signals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handle_signals: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Draining,
}

/// Why the stop signal fired. Only the first reason is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Signal(&'static str),
    Fault { task: String, error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("main failed: {0:#}")]
    Main(anyhow::Error),
    #[error("main panicked: {0}")]
    Panicked(String),
    #[error("task {task} failed: {error}")]
    Fault { task: String, error: String },
    #[error("task cancelled")]
    Cancelled,
    #[error("engine is already running")]
    AlreadyRunning,
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
