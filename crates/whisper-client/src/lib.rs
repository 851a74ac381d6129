//! whisper chat client.
//!
//! A [`ChatClient`] connects to a server and, once served on an
//! [`EventEngine`], runs three engine tasks: a socket reader, a socket
//! writer, and a response dispatcher that turns server packets into
//! [`ClientEvent`]s for the GUI thread. The GUI talks back through a
//! [`ClientHandle`], which is safe to use from any thread.
//!
//! The engine stops itself when the server acknowledges an EXIT or the
//! connection goes away.

use std::{net::SocketAddr, sync::Arc};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use whisper_engine::{EngineHandle, EventEngine, InitialTask, Scheduled, StopReason};
use whisper_proto::{PacketRegistry, messages::ExitReason};

use crate::{
    dispatch::ResponseRegistry,
    net::{TcpClient, TcpClientCommand, TcpClientEvent, reader_loop, writer_loop},
};

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod net;
pub mod state;

pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ClientEvent, Request};
pub use state::ClientState;

pub struct ChatClient {
    config: ClientConfig,
    packets: Arc<PacketRegistry>,
    handlers: Arc<ResponseRegistry>,
    transport: TcpClient,
    state: Arc<Mutex<ClientState>>,
    events: Sender<ClientEvent>,
    commands: mpsc::Sender<TcpClientCommand>,
    command_rx: mpsc::Receiver<TcpClientCommand>,
}

impl ChatClient {
    /// `events` is the GUI's inbox. Everything the server tells us lands
    /// there in arrival order.
    pub fn new(config: ClientConfig, events: Sender<ClientEvent>) -> Self {
        let (commands, command_rx) = mpsc::channel(config.outbound_queue);
        Self {
            config,
            packets: Arc::new(PacketRegistry::standard()),
            handlers: Arc::new(ResponseRegistry::standard()),
            transport: TcpClient::new(),
            state: Arc::new(Mutex::new(ClientState::default())),
            events,
            commands,
            command_rx,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects to the configured server on `engine` and returns the handle
    /// the GUI should keep.
    pub fn connect(&mut self, engine: &EventEngine) -> Result<ClientHandle, ClientError> {
        let _guard = engine.enter();
        self.transport
            .connect(self.config.server, self.config.connect_timeout)?;
        Ok(self.handle(engine.handle()))
    }

    pub fn handle(&self, engine: EngineHandle) -> ClientHandle {
        ClientHandle {
            engine,
            commands: self.commands.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    /// Engine `main`: runs the connection until the session ends or the
    /// engine is stopped.
    pub async fn serve(mut self, engine: EngineHandle) -> anyhow::Result<()> {
        let stream = self.transport.take_stream()?;
        let (read, write) = stream.into_split();
        let (event_tx, event_rx) = mpsc::channel(self.config.inbound_queue);

        let tasks = [
            InitialTask::new(
                "server reader",
                reader_loop(read, Arc::clone(&self.packets), event_tx),
            ),
            InitialTask::new("server writer", writer_loop(write, self.command_rx)),
            InitialTask::new(
                "response dispatcher",
                dispatch_loop(
                    event_rx,
                    Arc::clone(&self.handlers),
                    Arc::clone(&self.state),
                    self.events.clone(),
                    engine.clone(),
                ),
            ),
        ];

        let reason = engine.run_until_stopped(tasks).await;
        info!(?reason, "Client stopped");
        self.transport.disconnect()?;
        Ok(())
    }

    /// Connects (if needed) and serves on `engine`, blocking the calling thread.
    pub fn run(mut self, engine: &EventEngine) -> Result<(), ClientError> {
        if !self.transport.is_connected() {
            self.connect(engine)?;
        }
        match engine.run_main(|handle| self.serve(handle)) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// GUI-side handle to a running client.
#[derive(Clone)]
pub struct ClientHandle {
    engine: EngineHandle,
    commands: mpsc::Sender<TcpClientCommand>,
    state: Arc<Mutex<ClientState>>,
}

impl ClientHandle {
    /// Encodes and queues `request` on the engine thread.
    ///
    /// Requests made while the engine is not running resolve to
    /// [`EngineError::Cancelled`](whisper_engine::EngineError::Cancelled).
    pub fn send(&self, request: Request) -> Scheduled<Result<(), ClientError>> {
        self.engine.schedule(queue_request(self.commands.clone(), request))
    }

    /// Announces a voluntary exit. The engine stops once the server acks it.
    pub fn leave(&self) -> Scheduled<Result<(), ClientError>> {
        self.send(Request::Exit {
            reason: Some(ExitReason::SelfExit),
        })
    }

    /// Closes the socket after any queued frames, without an EXIT.
    pub fn disconnect(&self) -> Scheduled<Result<(), ClientError>> {
        let commands = self.commands.clone();
        self.engine.schedule(async move {
            commands
                .send(TcpClientCommand::Disconnect)
                .await
                .map_err(|_| ClientError::NotConnected)
        })
    }

    pub fn stop(&self) -> bool {
        self.engine.stop_main(StopReason::Requested)
    }

    /// Current identity and roster, as last reported by the server.
    pub fn snapshot(&self) -> ClientState {
        self.state.lock().clone()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

async fn queue_request(
    commands: mpsc::Sender<TcpClientCommand>,
    request: Request,
) -> Result<(), ClientError> {
    let frame = request.to_packet()?.encode()?;
    debug!(kind = request.kind(), "Queueing request");
    commands
        .send(TcpClientCommand::SendRaw(frame))
        .await
        .map_err(|_| ClientError::NotConnected)
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<TcpClientEvent>,
    handlers: Arc<ResponseRegistry>,
    state: Arc<Mutex<ClientState>>,
    gui: Sender<ClientEvent>,
    engine: EngineHandle,
) -> anyhow::Result<()> {
    let notify = |event: ClientEvent| {
        if gui.send(event).is_err() {
            debug!("GUI event channel closed");
        }
    };

    while let Some(event) = rx.recv().await {
        let packet = match event {
            TcpClientEvent::Packet(packet) => packet,
            TcpClientEvent::Disconnected { reason } => {
                notify(ClientEvent::Disconnected { reason });
                engine.stop_main(StopReason::Requested);
                return Ok(());
            }
        };

        let outcome = handlers.dispatch(&packet, &mut state.lock());
        let events = match outcome {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Malformed server packet, disconnecting");
                notify(ClientEvent::Disconnected {
                    reason: format!("protocol error: {e}"),
                });
                engine.stop_main(StopReason::Requested);
                return Ok(());
            }
        };

        for event in events {
            let exited = matches!(event, ClientEvent::Exited { .. });
            notify(event);
            if exited {
                engine.stop_main(StopReason::Requested);
                return Ok(());
            }
        }
    }
    Ok(())
}
