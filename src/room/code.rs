//! Room codes and identifiers.
//!
//! A room code is exactly four ASCII digits. Parsing is the only way to build
//! one, so every `RoomCode` in the program is already validated and malformed
//! input fails fast without touching the registry.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Number of distinct four-digit codes.
pub const CODE_SPACE: u16 = 10_000;

/// Stable logical participant handle; survives reconnection.
pub type ParticipantId = String;

/// Ephemeral transport connection identifier; new for every socket.
pub type ConnectionId = String;

/// Generate a fresh participant handle for clients that did not bring one.
pub fn new_participant_id() -> ParticipantId {
    Uuid::new_v4().to_string()
}

/// Generate a fresh connection identifier.
pub fn new_connection_id() -> ConnectionId {
    Uuid::new_v4().to_string()
}

/// A validated four-digit room code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode([u8; 4]);

impl RoomCode {
    /// Parse a user-entered code. Surrounding whitespace is tolerated.
    pub fn parse(input: &str) -> AppResult<Self> {
        let trimmed = input.trim();
        let bytes = trimmed.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(AppError::InvalidRoomCode(input.to_string()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Build a code from its numeric value (`0..10_000`).
    pub fn from_index(index: u16) -> Option<Self> {
        if index >= CODE_SPACE {
            return None;
        }
        let text = format!("{:04}", index);
        let b = text.as_bytes();
        Some(Self([b[0], b[1], b[2], b[3]]))
    }

    /// Draw a uniformly distributed code from v4 UUID entropy.
    pub fn random() -> Self {
        let index = (Uuid::new_v4().as_u128() % CODE_SPACE as u128) as u16;
        // index < CODE_SPACE by construction
        Self::from_index(index).unwrap_or(Self(*b"0000"))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 4]) -> AppResult<Self> {
        if !bytes.iter().all(u8::is_ascii_digit) {
            return Err(AppError::InvalidRoomCode(String::from_utf8_lossy(&bytes).into_owned()));
        }
        Ok(Self(bytes))
    }

    pub fn as_str(&self) -> &str {
        // Only ever holds ASCII digits
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoomCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomCode::parse(s)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RoomCode::parse(&raw).map_err(serde::de::Error::custom)
    }
}
