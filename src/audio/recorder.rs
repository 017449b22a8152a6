//! Session recording for the archive.
//!
//! While a talk session is active every captured frame is appended here as
//! well as being sent live. When the session ends the whole buffer is
//! encoded as one WAV blob and wrapped in a [`Transmission`].

use crate::error::{AppError, AppResult};
use crate::room::transmission::{ContainerType, Transmission};
use std::io::Cursor;
use tracing::debug;

#[derive(Debug)]
pub struct SessionRecorder {
    sample_rate: u32,
    samples: Vec<i16>,
}

impl SessionRecorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
        }
    }

    pub fn append(&mut self, frame: &[i16]) {
        self.samples.extend_from_slice(frame);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }

    /// Drop anything buffered, e.g. when a new session begins.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Encode the buffered session and start a fresh buffer.
    ///
    /// `sender_name` and `receiver_name` are the caller's view of the roster;
    /// the server replaces them from its own roster using `target_id`.
    pub fn finish(
        &mut self,
        sender_name: &str,
        receiver_name: &str,
        target_id: &str,
        timestamp: i64,
    ) -> AppResult<Transmission> {
        let duration_ms = self.duration_ms();
        let samples = std::mem::take(&mut self.samples);
        debug!(
            samples = samples.len(),
            duration_ms,
            sender = %sender_name,
            receiver = %receiver_name,
            "Finishing session recording"
        );

        Ok(Transmission {
            sender_name: sender_name.to_string(),
            receiver_name: receiver_name.to_string(),
            target_id: target_id.to_string(),
            timestamp,
            sample_rate: self.sample_rate,
            container_type: ContainerType::Wav,
            payload: encode_wav(samples, self.sample_rate)?,
        })
    }
}

/// Mono PCM16 WAV blob via the `wav` crate.
pub fn encode_wav(samples: Vec<i16>, sample_rate: u32) -> AppResult<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut out = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut out)
        .map_err(|e| AppError::ArchiveConversionError(format!("failed to encode session: {}", e)))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::exporter::decode_payload;

    #[test]
    fn test_finish_produces_decodable_transmission() {
        let mut recorder = SessionRecorder::new(16_000);
        recorder.append(&[1, 2, 3]);
        recorder.append(&[-4, -5]);
        assert_eq!(recorder.len(), 5);

        let t = recorder
            .finish("Alice", "Admin", "admin", 1_700_000_000_000)
            .unwrap();
        assert_eq!(t.container_type, ContainerType::Wav);
        assert_eq!(t.receiver_name, "Admin");
        assert_eq!(t.target_id, "admin");
        assert_eq!(decode_payload(&t).unwrap(), vec![1, 2, 3, -4, -5]);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_duration() {
        let mut recorder = SessionRecorder::new(16_000);
        recorder.append(&vec![0; 16_000]);
        assert_eq!(recorder.duration_ms(), 1000);
        recorder.reset();
        assert_eq!(recorder.duration_ms(), 0);
    }
}
