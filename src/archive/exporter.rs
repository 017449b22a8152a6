//! # Archive Export
//!
//! Turns logged transmissions into downloadable WAV files.
//!
//! ## Pipeline:
//! 1. **Decode** the stored payload to PCM16 samples (`wav` crate for WAV
//!    blobs, plain little-endian for raw PCM)
//! 2. **Re-encode** through the canonical 44-byte container
//! 3. **Bundle** (batch only) into a tar archive with one file per
//!    transmission
//!
//! A transmission that fails to decode is logged and skipped; the rest of
//! the batch still exports.

use crate::audio::codec::{build_container, pcm16_from_le_bytes};
use crate::error::{AppError, AppResult};
use crate::room::transmission::{ContainerType, Transmission};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who the batch is for; decides the directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    /// `YYYY-MM-DD/<sender>/<file>`
    Admin,
    /// Flat list of files
    #[default]
    Participant,
}

/// Result of a batch export.
#[derive(Debug)]
pub struct BatchExport {
    /// Tar archive bytes
    pub archive: Vec<u8>,
    /// Paths of the files inside the archive, in log order
    pub entries: Vec<String>,
    /// Log index and reason for every skipped transmission
    pub failures: Vec<(usize, AppError)>,
}

/// Decode a stored payload to PCM16 samples.
pub fn decode_payload(transmission: &Transmission) -> AppResult<Vec<i16>> {
    match transmission.container_type {
        ContainerType::RawPcm16 => pcm16_from_le_bytes(&transmission.payload),
        ContainerType::Wav => {
            let mut reader = Cursor::new(&transmission.payload);
            let (header, data) = wav::read(&mut reader)
                .map_err(|e| AppError::ArchiveConversionError(format!("unreadable WAV payload: {}", e)))?;

            if header.channel_count != 1 {
                return Err(AppError::ArchiveConversionError(format!(
                    "expected mono, found {} channels",
                    header.channel_count
                )));
            }
            if header.sampling_rate != transmission.sample_rate {
                return Err(AppError::ArchiveConversionError(format!(
                    "payload rate {} Hz does not match recorded rate {} Hz",
                    header.sampling_rate, transmission.sample_rate
                )));
            }

            match data {
                wav::BitDepth::Sixteen(samples) => Ok(samples),
                _ => Err(AppError::ArchiveConversionError(format!(
                    "expected 16-bit samples, found {} bits",
                    header.bits_per_sample
                ))),
            }
        }
    }
}

/// Convert one transmission into a canonical WAV file.
pub fn export_single(transmission: &Transmission) -> AppResult<Vec<u8>> {
    let samples = decode_payload(transmission)?;
    build_container(&samples, transmission.sample_rate)
}

/// `HH-MM-SS_<sender>_to_<receiver>.wav`, in UTC.
pub fn file_name(transmission: &Transmission) -> AppResult<String> {
    let at = timestamp(transmission)?;
    Ok(format!(
        "{}_{}_to_{}.wav",
        at.format("%H-%M-%S"),
        sanitize(&transmission.sender_name),
        sanitize(&transmission.receiver_name)
    ))
}

/// Archive path for a transmission under the given perspective.
pub fn entry_path(transmission: &Transmission, perspective: Perspective) -> AppResult<String> {
    let name = file_name(transmission)?;
    Ok(match perspective {
        Perspective::Participant => name,
        Perspective::Admin => format!(
            "{}/{}/{}",
            timestamp(transmission)?.format("%Y-%m-%d"),
            sanitize(&transmission.sender_name),
            name
        ),
    })
}

/// Export every transmission into one tar archive, skipping failures.
pub fn export_batch(log: &[Transmission], perspective: Perspective) -> AppResult<BatchExport> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut entries = Vec::with_capacity(log.len());
    let mut failures = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, transmission) in log.iter().enumerate() {
        let prepared = entry_path(transmission, perspective)
            .and_then(|path| export_single(transmission).map(|wav| (path, wav)));

        let (path, wav) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(index, error = %e, "Skipping transmission in batch export");
                failures.push((index, e));
                continue;
            }
        };

        let path = dedupe(&mut seen, path);

        let mut header = tar::Header::new_gnu();
        header.set_size(wav.len() as u64);
        header.set_mode(0o644);
        header.set_mtime((transmission.timestamp.max(0) / 1000) as u64);
        header.set_cksum();
        builder.append_data(&mut header, &path, wav.as_slice())?;

        debug!(index, path = %path, "Added transmission to batch export");
        entries.push(path);
    }

    let archive = builder.into_inner()?;
    info!(
        exported = entries.len(),
        skipped = failures.len(),
        bytes = archive.len(),
        "Batch export finished"
    );

    Ok(BatchExport {
        archive,
        entries,
        failures,
    })
}

/// Run a batch export off the async runtime, bounded by `limit`.
pub async fn export_batch_within(
    log: Vec<Transmission>,
    perspective: Perspective,
    limit: Duration,
) -> AppResult<BatchExport> {
    let task = tokio::task::spawn_blocking(move || export_batch(&log, perspective));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(AppError::Internal(format!("Export task failed: {}", join_error))),
        Err(_) => Err(AppError::ArchiveConversionError(format!(
            "export did not finish within {} ms",
            limit.as_millis()
        ))),
    }
}

fn timestamp(transmission: &Transmission) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(transmission.timestamp).ok_or_else(|| {
        AppError::ArchiveConversionError(format!("timestamp {} out of range", transmission.timestamp))
    })
}

/// Path separators and control characters become `_`.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn dedupe(seen: &mut HashMap<String, usize>, path: String) -> String {
    let count = seen.entry(path.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        return path;
    }
    let suffix = *count - 1;
    match path.strip_suffix(".wav") {
        Some(stem) => format!("{}-{}.wav", stem, suffix),
        None => format!("{}-{}", path, suffix),
    }
}
