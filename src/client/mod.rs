//! # Client Library
//!
//! The pieces a push-to-talk client needs besides its UI and its audio
//! backend.
//!
//! ## Module Organization:
//! - **transport**: `Connector`/`Link` seam and the WebSocket connector
//! - **connection**: Reconnecting connection manager and its handle
//! - **membership**: Remembered room membership for transparent resume
//! - **mirror**: Local room view driven by server events

pub mod connection;
pub mod membership;
pub mod mirror;
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState, Inbound, ReconnectPolicy};
pub use membership::{Membership, MembershipStore};
pub use mirror::{RoomMirror, RoomView};
pub use transport::{ClientMessage, Connector, Link, LinkEvent, WsConnector};
