//! # Rooms
//!
//! Everything the relay knows about live rooms.
//!
//! ## Module Organization:
//! - **code**: Four-digit room codes and participant/connection handles
//! - **transmission**: Archived talk sessions and their log summaries
//! - **arbiter**: Who may talk to whom, one direction at a time
//! - **session**: One room's roster, block list, arbiter and log
//! - **registry**: Code allocation and the live-room map

pub mod arbiter;
pub mod code;
pub mod registry;
pub mod session;
pub mod transmission;

pub use code::{ConnectionId, ParticipantId, RoomCode};
pub use registry::{lock_room, RoomRegistry, SharedRoom};
pub use session::{Dispatch, Member, Room, Roster};
pub use transmission::{ContainerType, Transmission, TransmissionMeta, TransmissionSummary};
