use tracing::{info, warn};

use crate::{handle::EngineHandle, types::StopReason};

pub(crate) async fn listen(handle: EngineHandle) -> anyhow::Result<()> {
    match wait_for_signal().await {
        Ok(name) => {
            info!(signal = name, "Shutdown signal received");
            handle.stop_main(StopReason::Signal(name));
        }
        Err(e) => warn!(error = %e, "Failed to install signal handlers"),
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(windows)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::windows::{ctrl_break, ctrl_c};

    let mut interrupt = ctrl_c()?;
    let mut brk = ctrl_break()?;

    let name = tokio::select! {
        _ = interrupt.recv() => "CTRL_C",
        _ = brk.recv() => "CTRL_BREAK",
    };
    Ok(name)
}

#[cfg(not(any(unix, windows)))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    std::future::pending().await
}
