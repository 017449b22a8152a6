//! # Relay Protocol
//!
//! Everything that crosses the wire between clients and the relay.
//!
//! ## Message Format:
//! - **Text frames**: JSON control events (`events`), tagged by kebab-case name
//! - **Binary frames**: audio frames and transmission uploads (`wire`)

pub mod events;   // JSON control events
pub mod wire;     // Binary envelopes for audio and uploads

pub use events::{ClientEvent, RosterEntry, ServerEvent};
pub use wire::{AudioFrame, BinaryMessage};
