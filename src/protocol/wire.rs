//! Binary envelopes.
//!
//! Audio frames and transmission uploads travel as binary WebSocket messages.
//! Every envelope starts with a one-byte kind tag; all integers are
//! little-endian.
//!
//! ```text
//! 0x01 audio-data        | u8 len | sender id | u8 len | target id | 4-byte room code | PCM16 LE ...
//! 0x02 log-transmission  | u32 meta len | JSON TransmissionMeta | payload ...
//! ```

use crate::error::{AppError, AppResult};
use crate::room::code::{ParticipantId, RoomCode};
use crate::room::transmission::TransmissionMeta;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub const KIND_AUDIO: u8 = 0x01;
pub const KIND_TRANSMISSION: u8 = 0x02;

/// One live frame of PCM16 audio plus its routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sender_id: ParticipantId,
    pub target_id: ParticipantId,
    pub room_code: RoomCode,
    pub samples: Vec<i16>,
}

/// Any decoded binary message.
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryMessage {
    Audio(AudioFrame),
    Transmission {
        meta: TransmissionMeta,
        payload: Vec<u8>,
    },
}

impl AudioFrame {
    pub fn encode(&self) -> AppResult<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + 2 + self.sender_id.len() + self.target_id.len() + 4 + self.samples.len() * 2);
        out.push(KIND_AUDIO);
        write_short_str(&mut out, &self.sender_id)?;
        write_short_str(&mut out, &self.target_id)?;
        out.extend_from_slice(self.room_code.as_bytes());
        for sample in &self.samples {
            out.write_i16::<LittleEndian>(*sample)?;
        }
        Ok(out)
    }
}

/// Encode a transmission upload envelope.
pub fn encode_transmission(meta: &TransmissionMeta, payload: &[u8]) -> AppResult<Vec<u8>> {
    let meta_json = serde_json::to_vec(meta)?;
    let meta_len = u32::try_from(meta_json.len())
        .map_err(|_| AppError::BadRequest("Transmission metadata too large".to_string()))?;

    let mut out = Vec::with_capacity(1 + 4 + meta_json.len() + payload.len());
    out.push(KIND_TRANSMISSION);
    out.write_u32::<LittleEndian>(meta_len)?;
    out.extend_from_slice(&meta_json);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode any binary envelope.
pub fn decode(data: &[u8]) -> AppResult<BinaryMessage> {
    let mut cursor = Cursor::new(data);
    let kind = cursor.read_u8().map_err(|_| truncated("kind"))?;

    match kind {
        KIND_AUDIO => {
            let sender_id = read_short_str(&mut cursor, "sender id")?;
            let target_id = read_short_str(&mut cursor, "target id")?;

            let mut code = [0u8; 4];
            cursor.read_exact(&mut code).map_err(|_| truncated("room code"))?;
            let room_code = RoomCode::from_bytes(code)?;

            let remaining = data.len() - cursor.position() as usize;
            if remaining % 2 != 0 {
                return Err(AppError::BadRequest(
                    "Audio payload length must be even for 16-bit samples".to_string(),
                ));
            }

            let mut samples = Vec::with_capacity(remaining / 2);
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push(sample);
            }

            Ok(BinaryMessage::Audio(AudioFrame {
                sender_id,
                target_id,
                room_code,
                samples,
            }))
        }
        KIND_TRANSMISSION => {
            let meta_len = cursor.read_u32::<LittleEndian>().map_err(|_| truncated("metadata length"))? as usize;
            let start = cursor.position() as usize;
            let end = start
                .checked_add(meta_len)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| truncated("metadata"))?;

            let meta: TransmissionMeta = serde_json::from_slice(&data[start..end])?;
            Ok(BinaryMessage::Transmission {
                meta,
                payload: data[end..].to_vec(),
            })
        }
        other => Err(AppError::BadRequest(format!("Unknown binary message kind 0x{:02x}", other))),
    }
}

fn write_short_str(out: &mut Vec<u8>, value: &str) -> AppResult<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| AppError::BadRequest(format!("Identifier too long: {} bytes", value.len())))?;
    out.push(len);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_short_str(cursor: &mut Cursor<&[u8]>, what: &str) -> AppResult<String> {
    let len = cursor.read_u8().map_err(|_| truncated(what))? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|_| truncated(what))?;
    String::from_utf8(buf).map_err(|_| AppError::BadRequest(format!("{} is not UTF-8", what)))
}

fn truncated(what: &str) -> AppError {
    AppError::BadRequest(format!("Truncated binary message: missing {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::transmission::ContainerType;

    fn frame() -> AudioFrame {
        AudioFrame {
            sender_id: "alice-handle".to_string(),
            target_id: "admin-handle".to_string(),
            room_code: RoomCode::parse("4821").unwrap(),
            samples: vec![0, 1, -1, i16::MAX, i16::MIN],
        }
    }

    #[test]
    fn test_audio_frame_layout() {
        let bytes = frame().encode().unwrap();
        assert_eq!(bytes[0], KIND_AUDIO);
        assert_eq!(bytes[1] as usize, "alice-handle".len());
        // kind + len + sender + len + target + code + 5 samples
        assert_eq!(bytes.len(), 1 + 1 + 12 + 1 + 12 + 4 + 10);
        assert_eq!(&bytes[27..31], b"4821");
        assert_eq!(decode(&bytes).unwrap(), BinaryMessage::Audio(frame()));
    }

    #[test]
    fn test_transmission_envelope() {
        let meta = TransmissionMeta {
            room_code: "4821".to_string(),
            sender_name: "Alice".to_string(),
            receiver_name: "Admin".to_string(),
            target_id: "admin-handle".to_string(),
            timestamp: 1_700_000_000_000,
            sample_rate: 16_000,
            container_type: ContainerType::Wav,
        };
        let bytes = encode_transmission(&meta, b"RIFF....").unwrap();
        match decode(&bytes).unwrap() {
            BinaryMessage::Transmission { meta: decoded, payload } => {
                assert_eq!(decoded, meta);
                assert_eq!(payload, b"RIFF....");
            }
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_envelopes_are_rejected() {
        let bytes = frame().encode().unwrap();
        assert!(decode(&[]).is_err());
        assert!(decode(&bytes[..10]).is_err());
        // Odd payload length
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());

        let mut bad_meta = vec![KIND_TRANSMISSION];
        bad_meta.extend_from_slice(&100u32.to_le_bytes());
        bad_meta.extend_from_slice(b"{}");
        assert!(decode(&bad_meta).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(decode(&[0x7f, 0, 0]), Err(AppError::BadRequest(_))));
    }
}
