//! Transmission archive export: single WAV downloads and tar batches.

pub mod exporter;

pub use exporter::{decode_payload, export_batch, export_batch_within, export_single, BatchExport, Perspective};
