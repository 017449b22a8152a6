//! # Room Registry
//!
//! Maps live room codes to their state and hands out fresh codes.
//!
//! ## Locking:
//! - The code map sits behind one `RwLock`, held only to look up, insert or
//!   remove a room.
//! - Each room has its own `Mutex`, so operations on different rooms never
//!   contend and operations on one room are serialized.
//! - Neither lock is ever held across an `.await`.
//!
//! ## Code allocation:
//! A few random draws first, then a linear scan of the 10,000-code space so
//! creation only fails when the space is genuinely exhausted.

use crate::error::{AppError, AppResult};
use crate::room::code::{new_participant_id, ConnectionId, ParticipantId, RoomCode, CODE_SPACE};
use crate::room::session::{validate_display_name, Dispatch, LeaveOutcome, Member, Role, Room};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{info, warn};

const RANDOM_ATTEMPTS: usize = 16;

pub type SharedRoom = Arc<Mutex<Room>>;

/// Outcome of `create-room`.
#[derive(Debug)]
pub struct Created {
    pub code: RoomCode,
    pub admin_id: ParticipantId,
    pub dispatches: Vec<Dispatch>,
}

#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomCode, SharedRoom>>,
    /// Limits can be changed at runtime through the config endpoint
    max_rooms: AtomicUsize,
    max_name_len: AtomicUsize,
}

/// Lock a room. Room operations never panic mid-update, so a poisoned lock still holds valid state.
pub fn lock_room(room: &SharedRoom) -> MutexGuard<'_, Room> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RoomRegistry {
    pub fn new(max_rooms: usize, max_name_len: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_rooms: AtomicUsize::new(max_rooms.min(CODE_SPACE as usize)),
            max_name_len: AtomicUsize::new(max_name_len),
        }
    }

    pub fn set_limits(&self, max_rooms: usize, max_name_len: usize) {
        self.max_rooms
            .store(max_rooms.min(CODE_SPACE as usize), Ordering::Relaxed);
        self.max_name_len.store(max_name_len, Ordering::Relaxed);
    }

    pub fn max_name_len(&self) -> usize {
        self.max_name_len.load(Ordering::Relaxed)
    }

    fn max_rooms(&self) -> usize {
        self.max_rooms.load(Ordering::Relaxed)
    }

    /// Open a room with the caller as admin.
    ///
    /// ## Resuming:
    /// With `resume_code`, a reconnecting admin gets the same code back:
    /// - the room is still live and theirs: the admin is rebound to the new connection
    /// - the code is free: a fresh room is opened under it
    /// - the code belongs to someone else: a fresh code is allocated
    pub fn create_room(
        &self,
        display_name: &str,
        participant_id: Option<ParticipantId>,
        resume_code: Option<RoomCode>,
        connection_id: &str,
    ) -> AppResult<Created> {
        let name = validate_display_name(display_name, self.max_name_len(), Role::Admin)?;
        let admin_id = participant_id.unwrap_or_else(new_participant_id);

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(code) = resume_code {
            if let Some(existing) = rooms.get(&code).cloned() {
                let mut room = lock_room(&existing);
                if room.is_closed() {
                    // Torn down but not yet removed; the code is free
                    drop(room);
                    rooms.remove(&code);
                } else if room.roster.is_admin(&admin_id) {
                    let dispatches = room.rebind_admin(connection_id);
                    return Ok(Created {
                        code,
                        admin_id,
                        dispatches,
                    });
                } else {
                    warn!(room = %code, "Resume code taken by another admin, allocating a new one");
                }
            }
        }

        let max_rooms = self.max_rooms();
        if rooms.len() >= max_rooms {
            return Err(AppError::RoomCreationError(format!(
                "room limit of {} reached",
                max_rooms
            )));
        }

        let code = match resume_code.filter(|c| !rooms.contains_key(c)) {
            Some(code) => code,
            None => allocate(&rooms)?,
        };

        let (room, dispatches) = Room::create(code, Member::new(&admin_id, &name, connection_id));
        rooms.insert(code, Arc::new(Mutex::new(room)));

        Ok(Created {
            code,
            admin_id,
            dispatches,
        })
    }

    pub fn get(&self, code: &RoomCode) -> AppResult<SharedRoom> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
            .ok_or_else(|| AppError::RoomNotFound(code.to_string()))
    }

    /// Remove a closed room, unless its code already holds a newer room.
    pub fn retire(&self, code: &RoomCode, closed: &SharedRoom) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if rooms.get(code).is_some_and(|current| Arc::ptr_eq(current, closed)) {
            rooms.remove(code);
            info!(room = %code, "Room removed from registry");
        }
    }

    /// Drop a connection from its room, removing the room if the admin left.
    pub fn disconnect(&self, code: &RoomCode, connection_id: &ConnectionId) -> LeaveOutcome {
        let Ok(shared) = self.get(code) else {
            return LeaveOutcome::default();
        };
        let outcome = lock_room(&shared).leave_connection(connection_id);
        if outcome.closed {
            self.retire(code, &shared);
        }
        outcome
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn codes(&self) -> Vec<RoomCode> {
        let mut codes: Vec<RoomCode> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        codes.sort();
        codes
    }
}

fn allocate(rooms: &HashMap<RoomCode, SharedRoom>) -> AppResult<RoomCode> {
    for _ in 0..RANDOM_ATTEMPTS {
        let candidate = RoomCode::random();
        if !rooms.contains_key(&candidate) {
            return Ok(candidate);
        }
    }

    (0..CODE_SPACE)
        .filter_map(RoomCode::from_index)
        .find(|code| !rooms.contains_key(code))
        .ok_or_else(|| AppError::RoomCreationError("all room codes are in use".to_string()))
}
