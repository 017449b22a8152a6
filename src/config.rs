//! # Configuration Management
//!
//! This module handles loading and managing relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_RECONNECT__MAX_ATTEMPTS`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main configuration that contains all settings.
///
/// The same struct configures the relay server and the client library; a
/// client simply ignores the `server` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rooms: RoomsConfig,
    pub audio: AudioConfig,
    pub reconnect: ReconnectConfig,
    pub archive: ArchiveConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Room registry limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Upper bound on simultaneously live rooms (at most 10 000 codes exist)
    pub max_rooms: usize,
    /// Longest accepted display name, in characters
    pub max_display_name_len: usize,
}

/// Live audio format and queueing.
///
/// ## Fields:
/// - `sample_rate`: capture and playback rate; fixed at 16 kHz mono by the protocol
/// - `frame_samples`: samples per live frame (1024 = 64ms at 16 kHz)
/// - `queue_capacity`: frames the capture callback may enqueue before dropping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub queue_capacity: usize,
}

/// Client reconnection policy.
///
/// Delay before attempt `n` is `min(base_delay_ms * 2^n, max_delay_ms)`;
/// after `max_attempts` failures the client gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub connect_timeout_ms: u64,
}

/// Archive export limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Upper bound on a single export request
    pub export_timeout_ms: u64,
}

impl ReconnectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ArchiveConfig {
    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            rooms: RoomsConfig {
                max_rooms: 10_000,
                max_display_name_len: 32,
            },
            audio: AudioConfig {
                sample_rate: 16_000,
                frame_samples: 1024,
                queue_capacity: 8,
            },
            reconnect: ReconnectConfig {
                base_delay_ms: 1_000,
                max_delay_ms: 30_000,
                max_attempts: 5,
                connect_timeout_ms: 10_000,
            },
            archive: ArchiveConfig {
                export_timeout_ms: 30_000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_RECONNECT__MAX_ATTEMPTS=8`: Allow more reconnect attempts
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections because field names contain single ones
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Room limits are positive and fit the 4-digit code space
    /// - Audio frames are non-empty and the queue can hold at least one frame
    /// - Reconnect delays are positive and the cap is not below the base
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.rooms.max_rooms == 0 || self.rooms.max_rooms > 10_000 {
            return Err(anyhow::anyhow!("Max rooms must be between 1 and 10000"));
        }

        if self.rooms.max_display_name_len == 0 {
            return Err(anyhow::anyhow!("Max display name length must be greater than 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.frame_samples == 0 {
            return Err(anyhow::anyhow!("Frame size must be greater than 0"));
        }

        if self.audio.queue_capacity == 0 {
            return Err(anyhow::anyhow!("Frame queue capacity must be greater than 0"));
        }

        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(anyhow::anyhow!("Reconnect delays must be positive and max_delay_ms >= base_delay_ms"));
        }

        if self.reconnect.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be greater than 0"));
        }

        if self.archive.export_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Export timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used by `PUT /api/v1/config`).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched. For example,
    /// `{"reconnect": {"max_attempts": 8}}` changes just the attempt cap.
    /// The result is validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)?;
            }
        }

        if let Some(rooms) = partial.get("rooms") {
            if let Some(max) = rooms.get("max_rooms").and_then(|v| v.as_u64()) {
                self.rooms.max_rooms = max as usize;
            }
            if let Some(len) = rooms.get("max_display_name_len").and_then(|v| v.as_u64()) {
                self.rooms.max_display_name_len = len as usize;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(capacity) = audio.get("queue_capacity").and_then(|v| v.as_u64()) {
                self.audio.queue_capacity = capacity as usize;
            }
        }

        if let Some(reconnect) = partial.get("reconnect") {
            if let Some(base) = reconnect.get("base_delay_ms").and_then(|v| v.as_u64()) {
                self.reconnect.base_delay_ms = base;
            }
            if let Some(max) = reconnect.get("max_delay_ms").and_then(|v| v.as_u64()) {
                self.reconnect.max_delay_ms = max;
            }
            if let Some(attempts) = reconnect.get("max_attempts").and_then(|v| v.as_u64()) {
                self.reconnect.max_attempts = u32::try_from(attempts)?;
            }
            if let Some(timeout) = reconnect.get("connect_timeout_ms").and_then(|v| v.as_u64()) {
                self.reconnect.connect_timeout_ms = timeout;
            }
        }

        if let Some(archive) = partial.get("archive") {
            if let Some(timeout) = archive.get("export_timeout_ms").and_then(|v| v.as_u64()) {
                self.archive.export_timeout_ms = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }
}
