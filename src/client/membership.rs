//! Remembered room membership.
//!
//! After a reconnect the client puts the user back where they were. The
//! membership is learned from `room-created` / `room-joined`, forgotten on
//! `room-closed` or an explicit leave, and optionally persisted as JSON so
//! it also survives an app restart.

use crate::error::AppResult;
use crate::protocol::events::{ClientEvent, ServerEvent};
use crate::room::code::{ParticipantId, RoomCode};
use crate::room::session::Role;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub room_code: RoomCode,
    pub display_name: String,
    pub participant_id: ParticipantId,
    pub role: Role,
}

impl Membership {
    /// Membership implied by a server event, if any.
    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::RoomCreated {
                room_code,
                display_name,
                participant_id,
            } => Some(Self {
                room_code: *room_code,
                display_name: display_name.clone(),
                participant_id: participant_id.clone(),
                role: Role::Admin,
            }),
            ServerEvent::RoomJoined {
                room_code,
                display_name,
                participant_id,
                ..
            } => Some(Self {
                room_code: *room_code,
                display_name: display_name.clone(),
                participant_id: participant_id.clone(),
                role: Role::Participant,
            }),
            _ => None,
        }
    }

    /// Whether a server event ends the membership.
    pub fn ended_by(event: &ServerEvent) -> bool {
        match event {
            ServerEvent::RoomClosed { .. } => true,
            ServerEvent::Error { code, .. } => code == "room_not_found",
            _ => false,
        }
    }

    /// The request that restores this membership on a fresh connection.
    pub fn resume_event(&self) -> ClientEvent {
        match self.role {
            Role::Admin => ClientEvent::CreateRoom {
                display_name: self.display_name.clone(),
                participant_id: Some(self.participant_id.clone()),
                resume_code: Some(self.room_code),
            },
            Role::Participant => ClientEvent::JoinRoom {
                room_code: self.room_code,
                display_name: self.display_name.clone(),
                participant_id: Some(self.participant_id.clone()),
            },
        }
    }
}

/// JSON file holding the last membership.
#[derive(Debug, Clone)]
pub struct MembershipStore {
    path: PathBuf,
}

impl MembershipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> AppResult<Option<Membership>> {
        match fs::read_to_string(&self.path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, membership: &Membership) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(membership)?)?;
        debug!(path = %self.path.display(), room = %membership.room_code, "Membership saved");
        Ok(())
    }

    pub fn clear(&self) -> AppResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load, treating an unreadable file as no membership.
    pub fn load_or_forget(&self) -> Option<Membership> {
        self.load().unwrap_or_else(|e| {
            warn!(error = %e, path = %self.path.display(), "Discarding unreadable membership file");
            None
        })
    }
}
