//! JSON control events.
//!
//! Text frames on the relay socket carry exactly one event, internally tagged
//! with its kebab-case name: `{"type": "join-room", "room_code": "4821", ...}`.

use crate::error::AppError;
use crate::room::code::{ParticipantId, RoomCode};
use crate::room::transmission::TransmissionSummary;
use serde::{Deserialize, Serialize};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Open a new room with the caller as admin
    CreateRoom {
        display_name: String,
        /// Persisted handle from an earlier session
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
        /// Code to reclaim after a reconnect
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_code: Option<RoomCode>,
    },

    JoinRoom {
        room_code: RoomCode,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
    },

    LeaveRoom,

    /// Admin only
    ToggleBlockUser {
        room_code: RoomCode,
        display_name: String,
    },

    StartTalking {
        room_code: RoomCode,
        target_id: ParticipantId,
    },

    StopTalking {
        room_code: RoomCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<ParticipantId>,
    },

    FetchLogs {
        room_code: RoomCode,
    },

    Ping {
        timestamp: u64,
    },
}

/// One roster entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub name: String,
}

/// Events sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    RoomCreated {
        room_code: RoomCode,
        display_name: String,
        participant_id: ParticipantId,
    },

    RoomJoined {
        room_code: RoomCode,
        display_name: String,
        participant_id: ParticipantId,
        /// Default talk target
        admin_id: ParticipantId,
    },

    /// Participants in join order; the admin is not listed
    UsersUpdate {
        users: Vec<RosterEntry>,
    },

    UserBlocked {
        display_name: String,
    },

    UserUnblocked {
        display_name: String,
    },

    UserTalking {
        user_id: ParticipantId,
        target_user_id: ParticipantId,
        is_talking: bool,
    },

    LogsUpdate {
        room_code: RoomCode,
        logs: Vec<TransmissionSummary>,
    },

    RoomClosed {
        reason: String,
    },

    UserLeft {
        user_id: ParticipantId,
    },

    Error {
        code: String,
        message: String,
    },

    Pong {
        timestamp: u64,
    },
}

impl From<&AppError> for ServerEvent {
    fn from(err: &AppError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
