use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::packet::PacketType;

/// A typed payload bound to exactly one packet type.
///
/// Several messages may share a type (a request and its response do);
/// [`PacketV1::content`](crate::PacketV1::content) uses the binding to reject
/// packets decoded as the wrong kind.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    fn packet_type() -> PacketType;
}

macro_rules! bind_messages {
    ($($ty:ty => $packet_type:ident),+ $(,)?) => {
        $(
            impl Message for $ty {
                fn packet_type() -> PacketType {
                    PacketType::$packet_type
                }
            }
        )+
    };
}

bind_messages! {
    InitRequest => Init,
    InitAccepted => Init,
    ExitRequest => Exit,
    ExitNotice => Exit,
    MessageRequest => Message,
    ChatEvent => Message,
}

/// Client hello, and later a rename.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitAccepted {
    pub username: String,
    /// Session key issued for this handshake.
    pub key: String,
}

/// Body of any `ValidationError` response, whatever its packet type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub message: String,
    pub field: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    SelfExit,
    ForceExit,
    HandshakeTimeout,
}

/// An empty EXIT payload decodes as `reason: None`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitRequest {
    pub reason: Option<ExitReason>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    pub reason: Option<ExitReason>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageRequest {
    pub text: String,
}

/// Everything the server pushes on a MESSAGE packet with `Success` status.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message {
        user: String,
        text: String,
    },
    UserJoin {
        user: String,
    },
    UserExit {
        user: String,
        reason: Option<ExitReason>,
    },
    UserRename {
        old: String,
        new: String,
    },
    ChatInfo {
        users: Vec<String>,
    },
}

impl ChatEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::Message { .. } => "message",
            ChatEvent::UserJoin { .. } => "user-join",
            ChatEvent::UserExit { .. } => "user-exit",
            ChatEvent::UserRename { .. } => "user-rename",
            ChatEvent::ChatInfo { .. } => "chat-info",
        }
    }
}
