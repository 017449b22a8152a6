//! Client-side view of the room, kept in sync by applying server events.

use crate::error::AppError;
use crate::protocol::events::{RosterEntry, ServerEvent};
use crate::room::code::{ParticipantId, RoomCode};
use crate::room::session::ADMIN_LABEL;
use crate::room::transmission::TransmissionSummary;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    pub in_room: bool,
    pub room_code: Option<RoomCode>,
    pub self_id: Option<ParticipantId>,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub admin_id: Option<ParticipantId>,
    /// Participants, admin excluded
    pub users: Vec<RosterEntry>,
    /// Whether this client is blocked
    pub blocked: bool,
    pub blocked_names: HashSet<String>,
    /// Active sessions, source -> target
    pub talking: HashMap<ParticipantId, ParticipantId>,
    pub logs: Vec<TransmissionSummary>,
    /// Last `error` event as (code, message)
    pub last_error: Option<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RoomMirror {
    view: RoomView,
}

impl RoomMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> &RoomView {
        &self.view
    }

    /// Back to the pre-join state.
    pub fn reset(&mut self) {
        self.view = RoomView::default();
    }

    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::RoomCreated {
                room_code,
                display_name,
                participant_id,
            } => {
                self.reset();
                self.view.in_room = true;
                self.view.is_admin = true;
                self.view.room_code = Some(*room_code);
                self.view.display_name = Some(display_name.clone());
                self.view.self_id = Some(participant_id.clone());
                self.view.admin_id = Some(participant_id.clone());
            }
            ServerEvent::RoomJoined {
                room_code,
                display_name,
                participant_id,
                admin_id,
            } => {
                self.reset();
                self.view.in_room = true;
                self.view.room_code = Some(*room_code);
                self.view.display_name = Some(display_name.clone());
                self.view.self_id = Some(participant_id.clone());
                self.view.admin_id = Some(admin_id.clone());
            }
            ServerEvent::UsersUpdate { users } => {
                self.view.users = users.clone();
                let present: HashSet<&str> = users
                    .iter()
                    .map(|u| u.id.as_str())
                    .chain(self.view.admin_id.as_deref())
                    .collect();
                self.view
                    .talking
                    .retain(|source, target| present.contains(source.as_str()) && present.contains(target.as_str()));
            }
            ServerEvent::UserBlocked { display_name } => {
                self.view.blocked_names.insert(display_name.clone());
                if self.is_self_name(display_name) {
                    self.view.blocked = true;
                }
            }
            ServerEvent::UserUnblocked { display_name } => {
                self.view.blocked_names.remove(display_name);
                if self.is_self_name(display_name) {
                    self.view.blocked = false;
                }
            }
            ServerEvent::UserTalking {
                user_id,
                target_user_id,
                is_talking,
            } => {
                if *is_talking {
                    self.view.talking.insert(user_id.clone(), target_user_id.clone());
                } else {
                    self.view.talking.remove(user_id);
                }
            }
            ServerEvent::LogsUpdate { room_code, logs } => {
                if self.view.room_code == Some(*room_code) {
                    self.view.logs = logs.clone();
                }
            }
            ServerEvent::RoomClosed { reason } => {
                debug!(reason = %reason, "Room closed");
                self.reset();
            }
            ServerEvent::UserLeft { user_id } => {
                self.view.users.retain(|u| &u.id != user_id);
                self.view
                    .talking
                    .retain(|source, target| source != user_id && target.as_str() != user_id.as_str());
            }
            ServerEvent::Error { code, message } => {
                if code == "room_not_found" || code == "connection_failed" {
                    self.reset();
                }
                self.view.last_error = Some((code.clone(), message.clone()));
            }
            ServerEvent::Pong { .. } => {}
        }
    }

    /// Local failures; fatal ones drop the room view.
    pub fn apply_failure(&mut self, err: &AppError) {
        if err.is_fatal() {
            self.reset();
        }
        self.view.last_error = Some((err.code().to_string(), err.to_string()));
    }

    /// Name recorded in transmissions for a member: "Admin" for the admin.
    pub fn label_for(&self, id: &str) -> Option<String> {
        if self.view.admin_id.as_deref() == Some(id) {
            return Some(ADMIN_LABEL.to_string());
        }
        self.view
            .users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.name.clone())
    }

    pub fn self_label(&self) -> Option<String> {
        self.view.self_id.as_deref().and_then(|id| {
            if self.view.is_admin {
                Some(ADMIN_LABEL.to_string())
            } else {
                self.view.display_name.clone().or_else(|| self.label_for(id))
            }
        })
    }

    /// Who is currently talking to this client, if anyone.
    pub fn incoming_talker(&self) -> Option<&ParticipantId> {
        let me = self.view.self_id.as_ref()?;
        self.view
            .talking
            .iter()
            .find(|(_, target)| *target == me)
            .map(|(source, _)| source)
    }

    fn is_self_name(&self, name: &str) -> bool {
        !self.view.is_admin && self.view.display_name.as_deref() == Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined_as_alice() -> RoomMirror {
        let mut mirror = RoomMirror::new();
        mirror.apply(&ServerEvent::RoomJoined {
            room_code: RoomCode::parse("4821").unwrap(),
            display_name: "Alice".to_string(),
            participant_id: "alice".to_string(),
            admin_id: "admin".to_string(),
        });
        mirror.apply(&ServerEvent::UsersUpdate {
            users: vec![
                RosterEntry { id: "alice".to_string(), name: "Alice".to_string() },
                RosterEntry { id: "bob".to_string(), name: "Bob".to_string() },
            ],
        });
        mirror
    }

    #[test]
    fn test_join_and_labels() {
        let mirror = joined_as_alice();
        assert!(mirror.view().in_room);
        assert!(!mirror.view().is_admin);
        assert_eq!(mirror.label_for("admin"), Some("Admin".to_string()));
        assert_eq!(mirror.label_for("bob"), Some("Bob".to_string()));
        assert_eq!(mirror.self_label(), Some("Alice".to_string()));
    }

    #[test]
    fn test_block_flag_tracks_own_name_only() {
        let mut mirror = joined_as_alice();
        mirror.apply(&ServerEvent::UserBlocked { display_name: "Bob".to_string() });
        assert!(!mirror.view().blocked);
        mirror.apply(&ServerEvent::UserBlocked { display_name: "Alice".to_string() });
        assert!(mirror.view().blocked);
        mirror.apply(&ServerEvent::UserUnblocked { display_name: "Alice".to_string() });
        assert!(!mirror.view().blocked);
        assert!(mirror.view().blocked_names.contains("Bob"));
    }

    #[test]
    fn test_talk_indicators() {
        let mut mirror = joined_as_alice();
        mirror.apply(&ServerEvent::UserTalking {
            user_id: "admin".to_string(),
            target_user_id: "alice".to_string(),
            is_talking: true,
        });
        assert_eq!(mirror.incoming_talker(), Some(&"admin".to_string()));

        mirror.apply(&ServerEvent::UserTalking {
            user_id: "admin".to_string(),
            target_user_id: "alice".to_string(),
            is_talking: false,
        });
        assert_eq!(mirror.incoming_talker(), None);

        mirror.apply(&ServerEvent::UserTalking {
            user_id: "bob".to_string(),
            target_user_id: "admin".to_string(),
            is_talking: true,
        });
        mirror.apply(&ServerEvent::UserLeft { user_id: "bob".to_string() });
        assert!(mirror.view().talking.is_empty());
        assert_eq!(mirror.view().users.len(), 1);
    }

    #[test]
    fn test_room_closed_and_fatal_errors_reset() {
        let mut mirror = joined_as_alice();
        mirror.apply(&ServerEvent::RoomClosed { reason: "Admin closed the room".to_string() });
        assert_eq!(mirror.view(), &RoomView::default());

        let mut mirror = joined_as_alice();
        mirror.apply(&ServerEvent::Error {
            code: "already_talking".to_string(),
            message: "busy".to_string(),
        });
        assert!(mirror.view().in_room);

        mirror.apply_failure(&AppError::ConnectionFailed("gave up".to_string()));
        assert!(!mirror.view().in_room);
        assert_eq!(mirror.view().last_error.as_ref().unwrap().0, "connection_failed");
    }

    #[test]
    fn test_admin_view() {
        let mut mirror = RoomMirror::new();
        mirror.apply(&ServerEvent::RoomCreated {
            room_code: RoomCode::parse("4821").unwrap(),
            display_name: "Boss".to_string(),
            participant_id: "admin".to_string(),
        });
        assert!(mirror.view().is_admin);
        assert_eq!(mirror.self_label(), Some("Admin".to_string()));
        mirror.apply(&ServerEvent::UserBlocked { display_name: "Boss".to_string() });
        assert!(!mirror.view().blocked);
    }
}
