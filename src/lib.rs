//! # ptt-relay
//!
//! Push-to-talk relay: one admin and many participants per four-digit room,
//! half-duplex talk sessions, and an archive of finished transmissions.
//!
//! ## Crate Layout:
//! - **Server side**: `room`, `websocket`, `handlers`, `health`, `middleware`, `state`
//! - **Client side**: `client`, `audio`
//! - **Shared**: `protocol`, `archive`, `config`, `error`

pub mod archive;     // WAV and tar export of the transmission log
pub mod audio;       // Codec, capture/playback pipeline, session recorder
pub mod client;      // Reconnecting connection manager and room mirror
pub mod config;      // Configuration management (config.rs)
pub mod error;       // Error handling types (error.rs)
pub mod handlers;    // HTTP request handlers (handlers/ directory)
pub mod health;      // Health check endpoints (health.rs)
pub mod middleware;  // Request logging and metrics
pub mod protocol;    // JSON events and binary envelopes
pub mod room;        // Rooms, talk arbitration and the registry
pub mod state;       // Application state management (state.rs)
pub mod websocket;   // Relay WebSocket actor and connection hub
