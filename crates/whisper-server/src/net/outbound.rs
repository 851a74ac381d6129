use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::inbound::ConnId;

/// Queue of encoded frames for one connection.
pub type OutboundTx = mpsc::Sender<Bytes>;

/// Drains `rx` into `write` until every sender is gone, then shuts the
/// write half down so the peer sees EOF only after the last queued frame.
/// Finishing also fires `cancel`, which stops the connection's reader.
///
/// Firing `cancel` from outside abandons whatever is still queued. Socket
/// errors end the connection, never the engine, so they are logged and
/// swallowed here.
pub async fn write_loop<W>(
    conn_id: ConnId,
    mut write: W,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(conn_id, "Writer aborted");
                return Ok(());
            }
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let res = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conn_id, "Writer aborted mid-frame");
                return Ok(());
            }
            res = write.write_all(&frame) => res,
        };
        if let Err(e) = res {
            debug!(conn_id, error = %e, "Write failed, dropping connection writer");
            cancel.cancel();
            return Ok(());
        }
    }

    if let Err(e) = write.shutdown().await {
        debug!(conn_id, error = %e, "Shutdown of write half failed");
    }
    cancel.cancel();
    Ok(())
}
