//! # Error Handling
//!
//! This module defines the relay's error taxonomy and how each error is turned
//! into either an HTTP response (for the REST surface) or an `error` event
//! (for the WebSocket surface).
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one failure the protocol knows about
//! - **Data**: Variants carry the offending value so messages stay specific
//! - **Pattern matching**: `match` maps each variant to a status code and wire code
//!
//! ### Traits for Error Conversion
//! - **From trait**: `?` converts library errors into `AppError` automatically
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings
//!
//! ## Propagation rule:
//! Errors are always reported to the originating connection only. Nothing in
//! this module broadcasts.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Every failure the relay can report.
///
/// ## Error Categories:
/// - **Room lifecycle**: `RoomNotFound`, `InvalidRoomCode`, `RoomCreationError`, `NameRejected`
/// - **Talk arbitration**: `BlockedSender`, `NoTarget`, `AlreadyTalking`, `NotAdmin`, `NotInRoom`
/// - **Client side**: `MicrophoneUnavailable`, `ConnectionFailed`, `NotConnected`
/// - **Archive**: `ArchiveConversionError` (per entry, recoverable)
/// - **Plumbing**: `BadRequest`, `ValidationError`, `ConfigError`, `NotFound`, `Internal`
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Room code does not resolve to a live room
    RoomNotFound(String),

    /// Room code is not exactly four ASCII digits
    InvalidRoomCode(String),

    /// No free room code could be allocated
    RoomCreationError(String),

    /// Display name is empty, too long, or reserved
    NameRejected(String),

    /// Sender's display name is on the room's blocked list
    BlockedSender(String),

    /// No admin present, or the requested target is not in the room
    NoTarget(String),

    /// Source already has an active talk session
    AlreadyTalking(String),

    /// Operation is reserved for the room's admin
    NotAdmin,

    /// Connection is not bound to any room
    NotInRoom,

    /// Capture device denied or absent
    MicrophoneUnavailable(String),

    /// Terminal: reconnection gave up after the attempt cap
    ConnectionFailed(String),

    /// An operation was attempted while the transport is not connected
    NotConnected,

    /// One archived transmission could not be converted
    ArchiveConversionError(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Requested resource was not found
    NotFound(String),

    /// Internal server errors
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, used in `error` events and JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::RoomNotFound(_) => "room_not_found",
            AppError::InvalidRoomCode(_) => "invalid_room_code",
            AppError::RoomCreationError(_) => "room_creation_error",
            AppError::NameRejected(_) => "name_rejected",
            AppError::BlockedSender(_) => "blocked_sender",
            AppError::NoTarget(_) => "no_target",
            AppError::AlreadyTalking(_) => "already_talking",
            AppError::NotAdmin => "not_admin",
            AppError::NotInRoom => "not_in_room",
            AppError::MicrophoneUnavailable(_) => "microphone_unavailable",
            AppError::ConnectionFailed(_) => "connection_failed",
            AppError::NotConnected => "not_connected",
            AppError::ArchiveConversionError(_) => "archive_conversion_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_error",
            AppError::ConfigError(_) => "config_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Fatal errors force the client back to the pre-join state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::ConnectionFailed(_) | AppError::RoomNotFound(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::RoomNotFound(code) => write!(f, "Room {} not found", code),
            AppError::InvalidRoomCode(code) => write!(f, "Invalid room code '{}': expected 4 digits", code),
            AppError::RoomCreationError(msg) => write!(f, "Room creation failed: {}", msg),
            AppError::NameRejected(msg) => write!(f, "Name rejected: {}", msg),
            AppError::BlockedSender(name) => write!(f, "{} is blocked in this room", name),
            AppError::NoTarget(msg) => write!(f, "No target: {}", msg),
            AppError::AlreadyTalking(msg) => write!(f, "Already talking: {}", msg),
            AppError::NotAdmin => write!(f, "Only the room admin may do that"),
            AppError::NotInRoom => write!(f, "Not in a room"),
            AppError::MicrophoneUnavailable(msg) => write!(f, "Microphone unavailable: {}", msg),
            AppError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            AppError::NotConnected => write!(f, "Not connected"),
            AppError::ArchiveConversionError(msg) => write!(f, "Archive conversion error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - Lookup failures → 404
/// - Malformed input and rejected names → 400
/// - Permission and arbitration conflicts → 403 / 409
/// - Everything server-side → 500
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "room_not_found",
///     "message": "Room 4821 not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::RoomNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRoomCode(_)
            | AppError::NameRejected(_)
            | AppError::BadRequest(_)
            | AppError::ValidationError(_)
            | AppError::NoTarget(_) => StatusCode::BAD_REQUEST,
            AppError::BlockedSender(_) | AppError::NotAdmin | AppError::NotInRoom => StatusCode::FORBIDDEN,
            AppError::AlreadyTalking(_) => StatusCode::CONFLICT,
            AppError::ArchiveConversionError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RoomCreationError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MicrophoneUnavailable(_)
            | AppError::ConnectionFailed(_)
            | AppError::NotConnected
            | AppError::ConfigError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.code(),               // Machine-readable error type
                "message": self.to_string(),       // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// When you use `?` with an anyhow::Error, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to BadRequest.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
