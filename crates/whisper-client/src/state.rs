use std::collections::BTreeSet;

use whisper_proto::messages::ChatEvent;

/// Client-side view of the session.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub username: Option<String>,
    pub key: Option<String>,
    /// Everyone else currently in the chat.
    pub roster: BTreeSet<String>,
    pub exited: bool,
}

impl ClientState {
    pub fn is_joined(&self) -> bool {
        self.username.is_some() && !self.exited
    }

    /// Folds a server notice into the roster.
    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::ChatInfo { users } => {
                self.roster = users
                    .iter()
                    .filter(|u| Some(u.as_str()) != self.username.as_deref())
                    .cloned()
                    .collect();
            }
            ChatEvent::UserJoin { user } => {
                self.roster.insert(user.clone());
            }
            ChatEvent::UserExit { user, .. } => {
                self.roster.remove(user);
            }
            ChatEvent::UserRename { old, new } => {
                self.roster.remove(old);
                self.roster.insert(new.clone());
            }
            ChatEvent::Message { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_follows_notices() {
        let mut state = ClientState {
            username: Some("alice".into()),
            ..ClientState::default()
        };
        state.apply(&ChatEvent::ChatInfo {
            users: vec!["alice".into(), "bob".into()],
        });
        state.apply(&ChatEvent::UserJoin { user: "carol".into() });
        state.apply(&ChatEvent::UserRename {
            old: "bob".into(),
            new: "robert".into(),
        });
        state.apply(&ChatEvent::UserExit {
            user: "carol".into(),
            reason: None,
        });
        assert_eq!(state.roster.iter().collect::<Vec<_>>(), vec!["robert"]);
    }
}
