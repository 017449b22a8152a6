//! Archived transmissions.
//!
//! A `Transmission` is one completed talk session: who spoke, to whom, when,
//! and the captured audio as an opaque blob tagged with its container type.
//! Once appended to a room's log it is never modified.

use crate::room::code::ParticipantId;
use serde::{Deserialize, Serialize};

/// Fixed capture rate for every transmission.
pub const TRANSMISSION_SAMPLE_RATE: u32 = 16_000;

/// How an archived payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// Full WAV file as produced by the session recorder
    Wav,
    /// Bare little-endian PCM16 samples, no header
    RawPcm16,
}

/// Metadata describing a transmission, as carried in the upload envelope.
///
/// The server overwrites both names from its roster, using the uploading
/// connection and `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionMeta {
    pub room_code: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub target_id: ParticipantId,
    /// Capture start, milliseconds since the Unix epoch
    pub timestamp: i64,
    pub sample_rate: u32,
    pub container_type: ContainerType,
}

/// One archived talk session.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub sender_name: String,
    pub receiver_name: String,
    /// Handle the session was addressed to
    pub target_id: ParticipantId,
    pub timestamp: i64,
    pub sample_rate: u32,
    pub container_type: ContainerType,
    pub payload: Vec<u8>,
}

/// A log entry without its audio, sent in `logs-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionSummary {
    pub index: usize,
    pub sender_name: String,
    pub receiver_name: String,
    pub timestamp: i64,
    pub sample_rate: u32,
    pub container_type: ContainerType,
    pub byte_len: usize,
}

impl Transmission {
    pub fn from_meta(meta: TransmissionMeta, payload: Vec<u8>) -> Self {
        Self {
            sender_name: meta.sender_name,
            receiver_name: meta.receiver_name,
            target_id: meta.target_id,
            timestamp: meta.timestamp,
            sample_rate: meta.sample_rate,
            container_type: meta.container_type,
            payload,
        }
    }

    pub fn meta(&self, room_code: &str) -> TransmissionMeta {
        TransmissionMeta {
            room_code: room_code.to_string(),
            sender_name: self.sender_name.clone(),
            receiver_name: self.receiver_name.clone(),
            target_id: self.target_id.clone(),
            timestamp: self.timestamp,
            sample_rate: self.sample_rate,
            container_type: self.container_type,
        }
    }

    pub fn summary(&self, index: usize) -> TransmissionSummary {
        TransmissionSummary {
            index,
            sender_name: self.sender_name.clone(),
            receiver_name: self.receiver_name.clone(),
            timestamp: self.timestamp,
            sample_rate: self.sample_rate,
            container_type: self.container_type,
            byte_len: self.payload.len(),
        }
    }
}
