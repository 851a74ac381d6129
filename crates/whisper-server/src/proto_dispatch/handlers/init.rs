use rand::{Rng, distr::Alphanumeric};
use tracing::info;
use whisper_proto::{
    PacketType, PacketV1, Status,
    messages::{ChatEvent, InitAccepted, InitRequest},
};

use super::{HandlerContext, RequestHandler, Response, broadcast, chat_event};
use crate::proto_dispatch::error::{HandlerError, HandlerResult};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 15;
pub const KEY_LEN: usize = 8;

/// Handshake (first INIT) and rename (any later INIT).
pub struct InitHandler;

impl RequestHandler for InitHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::Init
    }

    fn handle(&self, packet: &PacketV1, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let req: InitRequest = packet.content()?;
        let username = validate_username(&req.username)?;

        if ctx.state.username_taken(&username, ctx.conn_id) {
            return Err(HandlerError::validation(
                "username",
                format!("username '{username}' is already taken"),
            ));
        }

        let conn = ctx
            .state
            .get_mut(ctx.conn_id)
            .ok_or(HandlerError::UnknownConnection(ctx.conn_id))?;

        // Winning the race against the handshake timer.
        if let Some(timer) = conn.take_timeout() {
            timer.abort();
        }

        let previous = if conn.serve { conn.username.clone() } else { None };
        let key = generate_key();
        conn.username = Some(username.clone());
        conn.key = Some(key.clone());
        conn.serve = true;
        let peer = conn.address();

        let mut out = vec![Response::to(
            ctx.conn_id,
            PacketV1::response(
                Status::Success,
                &InitAccepted {
                    username: username.clone(),
                    key,
                },
            )?,
        )];

        match previous {
            None => {
                info!(conn_id = ctx.conn_id, %peer, %username, "User joined");
                broadcast(
                    ctx,
                    chat_event(&ChatEvent::UserJoin {
                        user: username.clone(),
                    })?,
                    &mut out,
                );
                out.push(Response::to(
                    ctx.conn_id,
                    chat_event(&ChatEvent::ChatInfo {
                        users: ctx.state.usernames(),
                    })?,
                ));
            }
            Some(old) if old != username => {
                info!(conn_id = ctx.conn_id, %old, new = %username, "User renamed");
                broadcast(
                    ctx,
                    chat_event(&ChatEvent::UserRename { old, new: username })?,
                    &mut out,
                );
            }
            Some(_) => {}
        }

        Ok(out)
    }
}

/// Trims `raw` and checks length and charset.
pub fn validate_username(raw: &str) -> Result<String, HandlerError> {
    let username = raw.trim();

    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(HandlerError::validation(
            "username",
            format!(
                "username should have length between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN}"
            ),
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@'))
    {
        return Err(HandlerError::validation(
            "username",
            "username must consist of alphanumeric characters and '_', '-', '@' symbols only",
        ));
    }

    Ok(username.to_owned())
}

fn generate_key() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(KEY_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert_eq!(validate_username("a_b-c@d").unwrap(), "a_b-c@d");
        assert!(validate_username("ab").unwrap_err().is_validation());
        assert!(validate_username("a".repeat(16).as_str()).is_err());
        assert!(validate_username("a".repeat(15).as_str()).is_ok());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("héllo").is_err());
    }

    #[test]
    fn keys_are_alphanumeric() {
        let key = generate_key();
        assert_eq!(key.len(), KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
