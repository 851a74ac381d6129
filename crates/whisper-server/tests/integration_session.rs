use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use whisper_engine::{EngineConfig, EngineHandle, EventEngine, StopReason};
use whisper_proto::{
    Packet, PacketRegistry, PacketType, PacketV1, Status,
    codec::{read_packet, write_packet},
    messages::{
        ChatEvent, ExitNotice, ExitReason, InitAccepted, InitRequest, Message, MessageRequest,
        ValidationFailure,
    },
};
use whisper_server::{ChatServer, ServerConfig};

struct TestServer {
    addr: SocketAddr,
    engine: EngineHandle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.engine.stop_main(StopReason::Requested);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn spawn_test_server(handshake_timeout: Duration) -> anyhow::Result<TestServer> {
    spawn_server_with(ServerConfig {
        bind: "127.0.0.1:0".parse()?,
        handshake_timeout,
        ..ServerConfig::default()
    })
}

fn spawn_server_with(config: ServerConfig) -> anyhow::Result<TestServer> {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = thread::spawn(move || {
        let engine = EventEngine::with_config(EngineConfig {
            handle_signals: false,
        })
        .unwrap();
        let mut server = ChatServer::new(config);
        let addr = server.start(&engine).unwrap();

        // Reported from inside `main` so the engine is already running.
        let err = engine.run_main(|handle| {
            tx.send((addr, handle.clone())).unwrap();
            server.serve(handle)
        });
        assert!(err.is_none(), "server failed: {err:?}");
    });

    let (addr, engine) = rx.recv_timeout(Duration::from_secs(5))?;
    Ok(TestServer {
        addr,
        engine,
        thread: Some(thread),
    })
}

struct TestClient {
    stream: TcpStream,
    registry: PacketRegistry,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            registry: PacketRegistry::standard(),
        })
    }

    async fn send<M: Message>(&mut self, msg: &M) -> anyhow::Result<()> {
        let packet = Packet::from(PacketV1::request(msg)?);
        write_packet(&mut self.stream, &packet).await?;
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<PacketV1> {
        let packet = timeout(
            Duration::from_secs(2),
            read_packet(&self.registry, &mut self.stream),
        )
        .await??;
        match packet {
            Packet::V1(p) => Ok(p),
        }
    }

    async fn recv_event(&mut self) -> anyhow::Result<ChatEvent> {
        let p = self.recv().await?;
        assert_eq!(p.status, Status::Success);
        Ok(p.content()?)
    }

    /// True if nothing arrives (and the peer stays open) for `window`.
    async fn stays_quiet(&mut self, window: Duration) -> bool {
        timeout(window, read_packet(&self.registry, &mut self.stream))
            .await
            .is_err()
    }

    async fn expect_closed(&mut self) -> anyhow::Result<()> {
        let res = timeout(
            Duration::from_secs(2),
            read_packet(&self.registry, &mut self.stream),
        )
        .await?;
        match res {
            Err(e) if e.is_connection_closed() => Ok(()),
            other => anyhow::bail!("expected EOF, got {other:?}"),
        }
    }

    async fn join(&mut self, name: &str) -> anyhow::Result<InitAccepted> {
        self.send(&InitRequest {
            username: name.into(),
        })
        .await?;
        let ack: InitAccepted = self.recv().await?.content()?;
        // chat-info snapshot
        self.recv_event().await?;
        Ok(ack)
    }
}

#[tokio::test]
async fn silent_connection_is_closed_after_handshake_timeout() -> anyhow::Result<()> {
    let server = spawn_test_server(Duration::from_millis(200))?;
    let mut client = TestClient::connect(server.addr).await?;

    let notice = client.recv().await?;
    assert_eq!(notice.packet_type, PacketType::Exit);
    assert_eq!(
        notice.content::<ExitNotice>()?.reason,
        Some(ExitReason::HandshakeTimeout)
    );
    client.expect_closed().await?;
    Ok(())
}

#[tokio::test]
async fn init_before_deadline_keeps_connection_open() -> anyhow::Result<()> {
    let server = spawn_test_server(Duration::from_millis(400))?;
    let mut client = TestClient::connect(server.addr).await?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let ack = client.join("early_bird").await?;
    assert_eq!(ack.username, "early_bird");

    assert!(client.stays_quiet(Duration::from_millis(600)).await);
    Ok(())
}

#[tokio::test]
async fn duplicate_username_gets_validation_error() -> anyhow::Result<()> {
    let server = spawn_test_server(Duration::from_secs(5))?;
    let mut alice = TestClient::connect(server.addr).await?;
    alice.join("alice").await?;

    let mut second = TestClient::connect(server.addr).await?;
    second
        .send(&InitRequest {
            username: "Alice".into(),
        })
        .await?;
    let reply = second.recv().await?;
    assert_eq!(reply.packet_type, PacketType::Init);
    assert_eq!(reply.status, Status::ValidationError);
    let failure: ValidationFailure = reply.decode_content()?;
    assert_eq!(failure.field, "username");

    // The first claimant is untouched and the loser may retry.
    assert!(alice.stays_quiet(Duration::from_millis(200)).await);
    let ack = second.join("alice2").await?;
    assert_eq!(ack.username, "alice2");
    assert_eq!(
        alice.recv_event().await?,
        ChatEvent::UserJoin {
            user: "alice2".into()
        }
    );
    Ok(())
}

#[tokio::test]
async fn protocol_violation_drops_only_the_offender() -> anyhow::Result<()> {
    let server = spawn_test_server(Duration::from_secs(5))?;
    let mut alice = TestClient::connect(server.addr).await?;
    alice.join("alice").await?;
    let mut mallory = TestClient::connect(server.addr).await?;
    mallory.join("mallory").await?;
    alice.recv_event().await?;

    // Status byte with the reserved low nibble set.
    mallory.stream.write_all(&[1, 2, 0, 0, 0x01]).await?;
    mallory.expect_closed().await?;

    assert_eq!(
        alice.recv_event().await?,
        ChatEvent::UserExit {
            user: "mallory".into(),
            reason: None
        }
    );

    alice
        .send(&MessageRequest {
            text: "still here".into(),
        })
        .await?;
    assert!(alice.stays_quiet(Duration::from_millis(200)).await);
    Ok(())
}

#[tokio::test]
async fn dropped_socket_announces_exit() -> anyhow::Result<()> {
    let server = spawn_test_server(Duration::from_secs(5))?;
    let mut alice = TestClient::connect(server.addr).await?;
    alice.join("alice").await?;
    let mut bob = TestClient::connect(server.addr).await?;
    bob.join("bob").await?;
    alice.recv_event().await?;

    drop(bob);
    assert_eq!(
        alice.recv_event().await?,
        ChatEvent::UserExit {
            user: "bob".into(),
            reason: None
        }
    );
    Ok(())
}

#[tokio::test]
async fn peer_that_stops_reading_does_not_stall_others() -> anyhow::Result<()> {
    let server = spawn_server_with(ServerConfig {
        bind: "127.0.0.1:0".parse()?,
        outbound_queue: 8,
        ..ServerConfig::default()
    })?;
    let mut alice = TestClient::connect(server.addr).await?;
    alice.join("alice").await?;
    let mut bob = TestClient::connect(server.addr).await?;
    bob.join("bob").await?;
    alice.recv_event().await?;

    // bob never reads again; his socket buffers and then his queue fill up.
    let text = "x".repeat(60_000);
    for _ in 0..600 {
        alice.send(&MessageRequest { text: text.clone() }).await?;
    }
    assert_eq!(
        alice.recv_event().await?,
        ChatEvent::UserExit {
            user: "bob".into(),
            reason: Some(ExitReason::ForceExit)
        }
    );

    let mut carol = TestClient::connect(server.addr).await?;
    let ack = carol.join("carol").await?;
    assert_eq!(ack.username, "carol");
    assert_eq!(
        alice.recv_event().await?,
        ChatEvent::UserJoin {
            user: "carol".into()
        }
    );
    drop(bob);
    Ok(())
}

#[test]
fn second_bind_on_same_port_is_address_in_use() -> anyhow::Result<()> {
    let engine = EventEngine::with_config(EngineConfig {
        handle_signals: false,
    })?;
    let mut first = ChatServer::new(ServerConfig {
        bind: "127.0.0.1:0".parse()?,
        ..ServerConfig::default()
    });
    let addr = first.start(&engine)?;
    assert!(matches!(
        first.start(&engine),
        Err(whisper_server::ServerError::AlreadyServing)
    ));

    let mut second = ChatServer::new(ServerConfig {
        bind: addr,
        ..ServerConfig::default()
    });
    assert!(matches!(
        second.start(&engine),
        Err(whisper_server::ServerError::AddressInUse(a)) if a == addr
    ));
    Ok(())
}

