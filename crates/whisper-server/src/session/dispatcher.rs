use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whisper_engine::EngineHandle;
use whisper_proto::{
    Packet, PacketV1, Status,
    messages::{ExitNotice, ExitReason, ValidationFailure},
};

use super::{handle::ConnectionHandle, state::ChatState};
use crate::{
    net::{
        inbound::{ConnId, InboundEvent},
        outbound::OutboundTx,
    },
    proto_dispatch::{
        error::HandlerError,
        handlers::{HandlerContext, Response, user_exit},
        registry::HandlerRegistry,
    },
};

/// Sole owner of the connection set.
///
/// Every state change happens inside [`handle_event`](Self::handle_event),
/// one event at a time, so responses reach each connection's queue in the
/// order the handlers produced them.
pub struct Dispatcher {
    state: ChatState,
    handlers: Arc<HandlerRegistry>,
    engine: EngineHandle,
    /// Loops back into the dispatcher's own queue; used by handshake timers.
    events: mpsc::Sender<InboundEvent>,
    handshake_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        engine: EngineHandle,
        events: mpsc::Sender<InboundEvent>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            state: ChatState::new(),
            handlers,
            engine,
            events,
            handshake_timeout,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<InboundEvent>) -> anyhow::Result<()> {
        info!("Dispatcher started");
        while let Some(ev) = rx.recv().await {
            self.handle_event(ev);
        }
        Ok(())
    }

    pub fn handle_event(&mut self, ev: InboundEvent) {
        match ev {
            InboundEvent::Connected {
                conn_id,
                peer,
                outbound,
                cancel,
            } => self.handle_connected(conn_id, peer, outbound, cancel),
            InboundEvent::Packet { conn_id, packet } => self.handle_packet(conn_id, packet),
            InboundEvent::Disconnected { conn_id, reason } => {
                debug!(conn_id, %reason, "Reader finished");
                self.drop_connection(conn_id, None);
            }
            InboundEvent::HandshakeExpired { conn_id } => self.handle_handshake_expired(conn_id),
        }
    }

    fn handle_connected(
        &mut self,
        conn_id: ConnId,
        peer: SocketAddr,
        outbound: OutboundTx,
        cancel: CancellationToken,
    ) {
        let mut handle = ConnectionHandle::new(conn_id, peer, outbound, cancel);

        let events = self.events.clone();
        let timeout = self.handshake_timeout;
        let timer = self.engine.create_task("handshake timeout", async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(InboundEvent::HandshakeExpired { conn_id }).await;
            Ok(())
        });
        handle.arm_timeout(timer);

        self.state.insert(handle);
        debug!(conn_id, %peer, ?timeout, "Awaiting handshake");
    }

    fn handle_packet(&mut self, conn_id: ConnId, packet: Packet) {
        if !self.state.contains(conn_id) {
            debug!(conn_id, "Dropping packet for closed connection");
            return;
        }

        let result = {
            let mut ctx = HandlerContext {
                conn_id,
                state: &mut self.state,
            };
            self.handlers.dispatch(&packet, &mut ctx)
        };

        match result {
            Ok(responses) => self.route(responses),
            Err(HandlerError::Validation { field, message }) => {
                debug!(conn_id, field, %message, "Validation failed");
                let failure = ValidationFailure {
                    message,
                    field: field.to_owned(),
                };
                match PacketV1::with_content(packet.packet_type(), Status::ValidationError, &failure)
                {
                    Ok(p) => self.route(vec![Response::to(conn_id, p)]),
                    Err(e) => warn!(conn_id, error = %e, "Failed to encode validation failure"),
                }
            }
            Err(e) => {
                warn!(conn_id, error = %e, "Rejected packet, closing connection");
                self.abort_connection(conn_id);
                return;
            }
        }

        if self.state.get(conn_id).is_some_and(|h| h.close) {
            self.release(conn_id);
        }
    }

    fn handle_handshake_expired(&mut self, conn_id: ConnId) {
        let Some(handle) = self.state.get_mut(conn_id) else {
            return;
        };
        // A successful INIT took the timer first.
        if handle.take_timeout().is_none() || handle.is_serving() {
            return;
        }
        info!(conn_id, peer = %handle.address(), "Handshake timed out");

        match PacketV1::response(
            Status::Success,
            &ExitNotice {
                reason: Some(ExitReason::HandshakeTimeout),
            },
        ) {
            Ok(p) => self.route(vec![Response::to(conn_id, p)]),
            Err(e) => warn!(conn_id, error = %e, "Failed to encode exit notice"),
        }
        self.release(conn_id);
    }

    /// Removes a connection whose reader has already finished, and announces
    /// its departure if it had joined.
    fn drop_connection(&mut self, conn_id: ConnId, reason: Option<ExitReason>) {
        let notices = self.release(conn_id).map_or_else(Vec::new, |h| self.departure(&h, reason));
        self.route(notices);
    }

    /// Closes a faulted connection without flushing its queue.
    fn abort_connection(&mut self, conn_id: ConnId) {
        let notices = self.abort(conn_id);
        self.route(notices);
    }

    fn abort(&mut self, conn_id: ConnId) -> Vec<Response> {
        let Some(mut handle) = self.state.remove(conn_id) else {
            return Vec::new();
        };
        handle.abort();
        info!(conn_id, name = %handle.display_name(), "Connection aborted");
        self.departure(&handle, Some(ExitReason::ForceExit))
    }

    /// The notice the remaining peers get about `handle` leaving.
    fn departure(&self, handle: &ConnectionHandle, reason: Option<ExitReason>) -> Vec<Response> {
        let conn_id = handle.id();
        let Some(user) = handle.username().filter(|_| handle.is_authenticated()) else {
            return Vec::new();
        };

        let receivers = self.state.authenticated_except(conn_id);
        if receivers.is_empty() {
            return Vec::new();
        }
        match user_exit(user, reason) {
            Ok(p) => vec![Response::new(p, receivers)],
            Err(e) => {
                warn!(conn_id, error = %e, "Failed to encode exit notice");
                Vec::new()
            }
        }
    }

    /// Takes the connection out of the active set. Its writer flushes the
    /// queue and then closes the socket.
    fn release(&mut self, conn_id: ConnId) -> Option<ConnectionHandle> {
        let mut handle = self.state.remove(conn_id)?;
        handle.shutdown();
        info!(conn_id, name = %handle.display_name(), "Connection closed");
        Some(handle)
    }

    /// Queues `responses` without ever waiting on a peer. A receiver whose
    /// queue is full is dropped as if it had faulted, and its departure is
    /// routed the same way.
    fn route(&mut self, responses: Vec<Response>) {
        let mut stalled = self.deliver(responses);
        while let Some(conn_id) = stalled.pop() {
            warn!(conn_id, "Outbound queue full, dropping slow peer");
            let notices = self.abort(conn_id);
            stalled.extend(self.deliver(notices));
        }
    }

    /// Returns the receivers that could not take their frame.
    fn deliver(&self, responses: Vec<Response>) -> Vec<ConnId> {
        let mut stalled = Vec::new();
        for Response { packet, receivers } in responses {
            let frame = match packet.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Failed to encode response");
                    continue;
                }
            };
            for id in receivers {
                let Some(handle) = self.state.get(id) else {
                    debug!(conn_id = id, "Receiver already gone");
                    continue;
                };
                match handle.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        if !stalled.contains(&id) {
                            stalled.push(id);
                        }
                    }
                    Err(TrySendError::Closed(_)) => debug!(conn_id = id, "Outbound queue closed"),
                }
            }
        }
        stalled
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use bytes::Bytes;
    use whisper_engine::{EngineConfig, EventEngine};
    use whisper_proto::{
        PacketRegistry, PacketType,
        codec::try_decode_frames,
        messages::{ChatEvent, ExitRequest, InitAccepted, InitRequest, MessageRequest, ValidationFailure},
    };

    use super::*;

    fn run<F, Fut>(f: F)
    where
        F: FnOnce(EngineHandle) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let engine = EventEngine::with_config(EngineConfig {
            handle_signals: false,
        })
        .unwrap();
        if let Some(e) = engine.run_main(f) {
            panic!("engine failed: {e}");
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        _timer_rx: mpsc::Receiver<InboundEvent>,
    }

    struct Peer {
        id: ConnId,
        rx: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    }

    impl Peer {
        fn received(&mut self) -> Vec<PacketV1> {
            let registry = PacketRegistry::standard();
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                let (packets, used) = try_decode_frames(&registry, &frame).unwrap();
                assert_eq!(used, frame.len());
                out.extend(packets.into_iter().filter_map(|p| p.as_v1().cloned()));
            }
            out
        }

        /// True once the dispatcher let go of the queue and it is drained.
        fn released(&mut self) -> bool {
            matches!(self.rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected))
        }
    }

    impl Harness {
        fn new(engine: EngineHandle) -> Self {
            let (tx, rx) = mpsc::channel(16);
            Self {
                dispatcher: Dispatcher::new(
                    Arc::new(HandlerRegistry::standard()),
                    engine,
                    tx,
                    Duration::from_secs(30),
                ),
                _timer_rx: rx,
            }
        }

        fn connect(&mut self, id: ConnId) -> Peer {
            self.connect_with_queue(id, 64)
        }

        fn connect_with_queue(&mut self, id: ConnId, capacity: usize) -> Peer {
            let (tx, rx) = mpsc::channel(capacity);
            let cancel = CancellationToken::new();
            self.dispatcher.handle_event(InboundEvent::Connected {
                conn_id: id,
                peer: SocketAddr::from(([127, 0, 0, 1], 40000 + id as u16)),
                outbound: tx,
                cancel: cancel.clone(),
            });
            Peer { id, rx, cancel }
        }

        fn send<M: whisper_proto::messages::Message>(&mut self, peer: &Peer, msg: &M) {
            let packet = PacketV1::request(msg).unwrap().into();
            self.dispatcher.handle_event(InboundEvent::Packet {
                conn_id: peer.id,
                packet,
            });
        }

        fn join(&mut self, id: ConnId, name: &str) -> Peer {
            let mut peer = self.connect(id);
            self.send(
                &peer,
                &InitRequest {
                    username: name.into(),
                },
            );
            let got = peer.received();
            assert_eq!(got[0].status, Status::Success, "{name} rejected");
            peer
        }
    }

    fn event(p: &PacketV1) -> ChatEvent {
        assert_eq!(p.status, Status::Success);
        p.content::<ChatEvent>().unwrap()
    }

    #[test]
    fn hello_acks_then_sends_snapshot() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut alice = h.connect(1);
            h.send(&alice, &InitRequest { username: " alice ".into() });

            let got = alice.received();
            assert_eq!(got.len(), 2);
            let ack: InitAccepted = got[0].content()?;
            assert_eq!(ack.username, "alice");
            assert_eq!(ack.key.len(), 8);
            assert_eq!(
                event(&got[1]),
                ChatEvent::ChatInfo {
                    users: vec!["alice".into()]
                }
            );

            let mut bob = h.connect(2);
            h.send(&bob, &InitRequest { username: "bob".into() });
            assert_eq!(
                alice.received().iter().map(event).collect::<Vec<_>>(),
                vec![ChatEvent::UserJoin { user: "bob".into() }]
            );
            let got = bob.received();
            assert_eq!(
                event(&got[1]),
                ChatEvent::ChatInfo {
                    users: vec!["alice".into(), "bob".into()]
                }
            );
            Ok(())
        });
    }

    #[test]
    fn message_fans_out_to_everyone_but_the_sender() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut peers = Vec::new();
            for id in 1..=4 {
                peers.push(h.join(id, &format!("user{id}")));
            }
            for p in &mut peers {
                p.received();
            }
            // Unauthenticated connections never hear chat traffic.
            let mut lurker = h.connect(9);

            h.send(&peers[0], &MessageRequest { text: "hello".into() });

            assert!(peers[0].received().is_empty());
            for p in &mut peers[1..] {
                let got = p.received();
                assert_eq!(got.len(), 1);
                assert_eq!(
                    event(&got[0]),
                    ChatEvent::Message {
                        user: "user1".into(),
                        text: "hello".into()
                    }
                );
            }
            assert!(lurker.received().is_empty());
            Ok(())
        });
    }

    #[test]
    fn duplicate_username_is_rejected_case_insensitively() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut alice = h.join(1, "alice");
            let mut imposter = h.connect(2);
            h.send(&imposter, &InitRequest { username: "ALICE".into() });

            let got = imposter.received();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].packet_type, PacketType::Init);
            assert_eq!(got[0].status, Status::ValidationError);
            let failure: ValidationFailure = got[0].decode_content()?;
            assert_eq!(failure.field, "username");

            assert!(alice.received().is_empty());
            let state = h.dispatcher.state();
            assert!(state.get(1).is_some_and(|c| c.is_authenticated()));
            assert!(state.get(2).is_some_and(|c| !c.is_serving()));
            Ok(())
        });
    }

    #[test]
    fn rename_is_announced() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let alice = h.join(1, "alice");
            let mut bob = h.join(2, "bob");
            bob.received();

            h.send(&alice, &InitRequest { username: "alicia".into() });
            assert_eq!(
                bob.received().iter().map(event).collect::<Vec<_>>(),
                vec![ChatEvent::UserRename {
                    old: "alice".into(),
                    new: "alicia".into()
                }]
            );
            assert_eq!(h.dispatcher.state().usernames(), vec!["alicia", "bob"]);
            Ok(())
        });
    }

    #[test]
    fn exit_closes_and_notifies_the_rest() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut alice = h.join(1, "alice");
            let mut bob = h.join(2, "bob");
            alice.received();

            h.send(&bob, &ExitRequest::default());

            let got = bob.received();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].content::<ExitNotice>()?.reason, None);
            // Closed gracefully: the writer flushes the ack first.
            assert!(bob.released());
            assert!(!bob.cancel.is_cancelled());
            assert!(!h.dispatcher.state().contains(2));

            assert_eq!(
                alice.received().iter().map(event).collect::<Vec<_>>(),
                vec![ChatEvent::UserExit {
                    user: "bob".into(),
                    reason: None
                }]
            );

            // The reader's own disconnect arrives afterwards and is ignored.
            h.dispatcher
                .handle_event(InboundEvent::Disconnected {
                    conn_id: 2,
                    reason: "eof".into(),
                });
            assert!(alice.received().is_empty());
            Ok(())
        });
    }

    #[test]
    fn handshake_expiry_closes_silent_connections_only() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut silent = h.connect(1);
            let mut alice = h.join(2, "alice");

            for id in [1, 2] {
                h.dispatcher
                    .handle_event(InboundEvent::HandshakeExpired { conn_id: id });
            }

            let got = silent.received();
            assert_eq!(
                got[0].content::<ExitNotice>()?.reason,
                Some(ExitReason::HandshakeTimeout)
            );
            assert!(silent.released());
            assert!(!h.dispatcher.state().contains(1));

            assert!(alice.received().is_empty());
            assert!(!alice.cancel.is_cancelled());
            assert!(h.dispatcher.state().contains(2));
            Ok(())
        });
    }

    #[test]
    fn undecodable_payload_drops_sender_with_force_exit() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut alice = h.join(1, "alice");
            let mut bob = h.join(2, "bob");
            alice.received();

            let garbage = PacketV1::new(PacketType::Init, Status::Success, vec![0xFF])?;
            h.dispatcher.handle_event(InboundEvent::Packet {
                conn_id: bob.id,
                packet: garbage.into(),
            });

            assert!(bob.cancel.is_cancelled());
            assert!(!h.dispatcher.state().contains(2));
            assert!(bob.received().is_empty());
            assert_eq!(
                alice.received().iter().map(event).collect::<Vec<_>>(),
                vec![ChatEvent::UserExit {
                    user: "bob".into(),
                    reason: Some(ExitReason::ForceExit)
                }]
            );
            Ok(())
        });
    }

    #[test]
    fn full_outbound_queue_drops_only_that_peer() {
        run(|engine| async move {
            let mut h = Harness::new(engine);
            let mut alice = h.join(1, "alice");
            // Room for the ack, the snapshot and one join notice.
            let mut slow = h.connect_with_queue(2, 3);
            h.send(&slow, &InitRequest { username: "slow".into() });
            let mut carol = h.join(3, "carol");
            alice.received();

            for n in 0..3 {
                h.send(&alice, &MessageRequest { text: format!("line {n}") });
            }

            assert!(slow.cancel.is_cancelled());
            assert!(!h.dispatcher.state().contains(2));
            let carol_saw = carol.received().iter().map(event).collect::<Vec<_>>();
            assert_eq!(carol_saw.len(), 4);
            assert_eq!(
                carol_saw[1],
                ChatEvent::UserExit {
                    user: "slow".into(),
                    reason: Some(ExitReason::ForceExit)
                }
            );
            assert!(alice.received().iter().map(event).any(|e| e
                == ChatEvent::UserExit {
                    user: "slow".into(),
                    reason: Some(ExitReason::ForceExit)
                }));

            // Aborted, so whatever was queued is abandoned.
            assert_eq!(slow.received().len(), 3);
            assert!(slow.released());

            // Everyone else keeps being served.
            h.join(4, "dave");
            assert_eq!(
                carol.received().iter().map(event).collect::<Vec<_>>(),
                vec![ChatEvent::UserJoin { user: "dave".into() }]
            );
            assert_eq!(h.dispatcher.state().usernames(), vec!["alice", "carol", "dave"]);
            Ok(())
        });
    }
}
