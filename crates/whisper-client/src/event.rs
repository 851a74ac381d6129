use whisper_proto::{
    Packet, PacketV1, ProtoError,
    messages::{ChatEvent, ExitReason, ExitRequest, InitRequest, MessageRequest},
};

/// Outbound content the GUI asks the client to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Join, or rename once joined.
    Init { username: String },
    Message { text: String },
    Exit { reason: Option<ExitReason> },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::Message { .. } => "message",
            Request::Exit { .. } => "exit",
        }
    }

    pub fn to_packet(&self) -> Result<Packet, ProtoError> {
        let packet = match self {
            Request::Init { username } => PacketV1::request(&InitRequest {
                username: username.clone(),
            })?,
            Request::Message { text } => PacketV1::request(&MessageRequest { text: text.clone() })?,
            Request::Exit { reason } => PacketV1::request(&ExitRequest { reason: *reason })?,
        };
        Ok(packet.into())
    }
}

/// Everything the GUI is told about, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Accepted { username: String, key: String },
    /// The server refused a request; `field` names the offending input.
    Rejected { message: String, field: String },
    Chat(ChatEvent),
    /// The server acknowledged our EXIT or closed us out.
    Exited { reason: Option<ExitReason> },
    Disconnected { reason: String },
}
