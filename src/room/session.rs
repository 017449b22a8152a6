//! # Room Session
//!
//! Authoritative state for one room: the admin, the participant roster, the
//! blocked-name set, the talk arbiter and the append-only transmission log.
//!
//! ## Side-effect free:
//! Room operations never touch the network. Each one returns the list of
//! [`Dispatch`]es it wants delivered, and the WebSocket layer delivers them
//! after the room lock is released. That keeps every rule in this file
//! testable with plain unit tests.
//!
//! ## Identity:
//! Members are keyed by their stable `ParticipantId`. The transport
//! `ConnectionId` is just the current delivery address and is rebound when
//! the same handle rejoins after a reconnect.

use crate::error::{AppError, AppResult};
use crate::protocol::events::{RosterEntry, ServerEvent};
use crate::protocol::wire::AudioFrame;
use crate::room::arbiter::{TalkArbiter, TalkChange};
use crate::room::code::{new_participant_id, ConnectionId, ParticipantId, RoomCode};
use crate::room::transmission::{Transmission, TransmissionSummary, TRANSMISSION_SAMPLE_RATE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// How participants see the admin, and the one name they may not take.
pub const ADMIN_LABEL: &str = "Admin";

/// What a member is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Participant,
}

/// One connected member of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: ParticipantId,
    pub display_name: String,
    pub connection_id: ConnectionId,
}

impl Member {
    pub fn new(id: &str, display_name: &str, connection_id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            connection_id: connection_id.to_string(),
        }
    }
}

/// A server event addressed to a set of connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub recipients: Vec<ConnectionId>,
    pub event: ServerEvent,
}

impl Dispatch {
    pub fn to_one(connection_id: &str, event: ServerEvent) -> Self {
        Self {
            recipients: vec![connection_id.to_string()],
            event,
        }
    }
}

/// Result of a member leaving.
#[derive(Debug, Default)]
pub struct LeaveOutcome {
    pub dispatches: Vec<Dispatch>,
    /// The admin left and the room must be removed from the registry
    pub closed: bool,
    /// Connections that no longer belong to the room
    pub evicted: Vec<ConnectionId>,
}

/// Who is in the room and who is blocked.
#[derive(Debug, Clone)]
pub struct Roster {
    admin: Member,
    /// Join order, used for display
    participants: Vec<Member>,
    /// Blocking is keyed by display name, not id
    blocked: HashSet<String>,
}

impl Roster {
    pub fn new(admin: Member) -> Self {
        Self {
            admin,
            participants: Vec::new(),
            blocked: HashSet::new(),
        }
    }

    pub fn admin(&self) -> &Member {
        &self.admin
    }

    pub fn add(&mut self, member: Member) {
        self.participants.push(member);
    }

    pub fn remove(&mut self, id: &str) -> Option<Member> {
        let index = self.participants.iter().position(|m| m.id == id)?;
        Some(self.participants.remove(index))
    }

    pub fn participant(&self, id: &str) -> Option<&Member> {
        self.participants.iter().find(|m| m.id == id)
    }

    fn member_mut(&mut self, id: &str) -> Option<&mut Member> {
        if self.admin.id == id {
            return Some(&mut self.admin);
        }
        self.participants.iter_mut().find(|m| m.id == id)
    }

    pub fn member(&self, id: &str) -> Option<&Member> {
        if self.admin.id == id {
            return Some(&self.admin);
        }
        self.participant(id)
    }

    pub fn member_by_connection(&self, connection_id: &str) -> Option<&Member> {
        if self.admin.connection_id == connection_id {
            return Some(&self.admin);
        }
        self.participants.iter().find(|m| m.connection_id == connection_id)
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admin.id == id
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.member(id).is_some()
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.member(id).map(|m| m.display_name.as_str())
    }

    /// Name used in transmission records: the admin is always "Admin".
    pub fn label(&self, id: &str) -> Option<&str> {
        if self.is_admin(id) {
            return Some(ADMIN_LABEL);
        }
        self.display_name(id)
    }

    pub fn is_blocked(&self, display_name: &str) -> bool {
        self.blocked.contains(display_name)
    }

    /// Flip the blocked flag for a name; returns `true` if it is now blocked.
    pub fn toggle_block(&mut self, display_name: &str) -> bool {
        if self.blocked.remove(display_name) {
            false
        } else {
            self.blocked.insert(display_name.to_string());
            true
        }
    }

    /// Participants (admin excluded) in join order.
    pub fn entries(&self) -> Vec<RosterEntry> {
        self.participants
            .iter()
            .map(|m| RosterEntry {
                id: m.id.clone(),
                name: m.display_name.clone(),
            })
            .collect()
    }

    /// Every connection in the room, admin first.
    pub fn connections(&self) -> Vec<ConnectionId> {
        std::iter::once(&self.admin)
            .chain(self.participants.iter())
            .map(|m| m.connection_id.clone())
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    fn ids_named(&self, display_name: &str) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|m| m.display_name == display_name)
            .map(|m| m.id.clone())
            .collect()
    }
}

/// Trim and check a display name.
pub fn validate_display_name(raw: &str, max_len: usize, role: Role) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::NameRejected("display name is empty".to_string()));
    }
    if name.chars().count() > max_len {
        return Err(AppError::NameRejected(format!(
            "display name longer than {} characters",
            max_len
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(AppError::NameRejected("display name contains control characters".to_string()));
    }
    if role == Role::Participant && name.eq_ignore_ascii_case(ADMIN_LABEL) {
        return Err(AppError::NameRejected(format!("'{}' is reserved", ADMIN_LABEL)));
    }
    Ok(name.to_string())
}

/// State for one live room.
#[derive(Debug)]
pub struct Room {
    pub code: RoomCode,
    pub roster: Roster,
    pub arbiter: TalkArbiter,
    log: Vec<Transmission>,
    pub created_at: DateTime<Utc>,
    /// Set once the admin tears the room down; stale handles see it as gone
    closed: bool,
}

impl Room {
    /// Open a room with `admin` as its coordinator.
    pub fn create(code: RoomCode, admin: Member) -> (Self, Vec<Dispatch>) {
        info!(room = %code, admin = %admin.id, "Room created");
        let created = ServerEvent::RoomCreated {
            room_code: code,
            display_name: admin.display_name.clone(),
            participant_id: admin.id.clone(),
        };
        let admin_conn = admin.connection_id.clone();

        let room = Self {
            code,
            roster: Roster::new(admin),
            arbiter: TalkArbiter::new(),
            log: Vec::new(),
            created_at: Utc::now(),
            closed: false,
        };

        let dispatches = vec![
            Dispatch::to_one(&admin_conn, created),
            Dispatch::to_one(&admin_conn, ServerEvent::UsersUpdate { users: Vec::new() }),
        ];
        (room, dispatches)
    }

    /// Admin reconnected while the room was still live: move it to the new socket.
    pub fn rebind_admin(&mut self, connection_id: &str) -> Vec<Dispatch> {
        self.roster.admin.connection_id = connection_id.to_string();
        info!(room = %self.code, admin = %self.roster.admin.id, "Admin rebound to new connection");

        vec![
            Dispatch::to_one(
                connection_id,
                ServerEvent::RoomCreated {
                    room_code: self.code,
                    display_name: self.roster.admin.display_name.clone(),
                    participant_id: self.roster.admin.id.clone(),
                },
            ),
            Dispatch::to_one(connection_id, ServerEvent::UsersUpdate { users: self.roster.entries() }),
            Dispatch::to_one(connection_id, self.logs_event()),
        ]
    }

    /// Add a participant, or rebind an existing handle to a new connection.
    ///
    /// ## Returns:
    /// The participant's handle and the events to deliver: `room-joined`,
    /// the joiner's blocked state and log snapshot, and a roster broadcast.
    pub fn join(
        &mut self,
        display_name: &str,
        participant_id: Option<ParticipantId>,
        connection_id: &str,
        max_name_len: usize,
    ) -> AppResult<(ParticipantId, Vec<Dispatch>)> {
        self.ensure_open()?;
        let name = validate_display_name(display_name, max_name_len, Role::Participant)?;

        let id = match participant_id {
            Some(id) if self.roster.is_admin(&id) => {
                return Err(AppError::NameRejected("handle belongs to the room admin".to_string()));
            }
            Some(id) if self.roster.participant(&id).is_some() => {
                if let Some(member) = self.roster.member_mut(&id) {
                    debug!(room = %self.code, participant = %id, "Rebinding participant connection");
                    member.connection_id = connection_id.to_string();
                }
                id
            }
            Some(id) => {
                self.roster.add(Member::new(&id, &name, connection_id));
                id
            }
            None => {
                let id = new_participant_id();
                self.roster.add(Member::new(&id, &name, connection_id));
                id
            }
        };

        let current_name = self
            .roster
            .display_name(&id)
            .unwrap_or(name.as_str())
            .to_string();
        info!(room = %self.code, participant = %id, name = %current_name, "Participant joined");

        let mut dispatches = vec![Dispatch::to_one(
            connection_id,
            ServerEvent::RoomJoined {
                room_code: self.code,
                display_name: current_name.clone(),
                participant_id: id.clone(),
                admin_id: self.roster.admin.id.clone(),
            },
        )];

        if self.roster.is_blocked(&current_name) {
            dispatches.push(Dispatch::to_one(
                connection_id,
                ServerEvent::UserBlocked { display_name: current_name },
            ));
        }

        dispatches.push(Dispatch::to_one(connection_id, self.logs_event()));
        dispatches.push(self.broadcast(ServerEvent::UsersUpdate { users: self.roster.entries() }));

        Ok((id, dispatches))
    }

    /// Remove a member. Idempotent; the admin leaving tears the room down.
    pub fn leave(&mut self, participant_id: &str) -> LeaveOutcome {
        if self.roster.is_admin(participant_id) {
            return self.close("Admin closed the room");
        }

        let Some(member) = self.roster.remove(participant_id) else {
            return LeaveOutcome::default();
        };
        info!(room = %self.code, participant = %member.id, "Participant left");

        let changes = self.arbiter.stop_involving(&member.id);
        let mut dispatches = self.talk_dispatches(changes);
        dispatches.push(self.broadcast(ServerEvent::UserLeft { user_id: member.id.clone() }));
        dispatches.push(self.broadcast(ServerEvent::UsersUpdate { users: self.roster.entries() }));

        LeaveOutcome {
            dispatches,
            closed: false,
            evicted: vec![member.connection_id],
        }
    }

    /// A transport connection went away. Stale connections (already rebound) are ignored.
    pub fn leave_connection(&mut self, connection_id: &str) -> LeaveOutcome {
        match self.roster.member_by_connection(connection_id) {
            Some(member) => {
                let id = member.id.clone();
                self.leave(&id)
            }
            None => LeaveOutcome::default(),
        }
    }

    /// Tear the room down, notifying every participant.
    pub fn close(&mut self, reason: &str) -> LeaveOutcome {
        info!(room = %self.code, reason = %reason, "Room closed");
        self.closed = true;
        self.arbiter.clear();

        let participants: Vec<ConnectionId> = self
            .roster
            .participants
            .drain(..)
            .map(|m| m.connection_id)
            .collect();

        let mut evicted = participants.clone();
        evicted.push(self.roster.admin.connection_id.clone());

        let dispatches = if participants.is_empty() {
            Vec::new()
        } else {
            vec![Dispatch {
                recipients: participants,
                event: ServerEvent::RoomClosed { reason: reason.to_string() },
            }]
        };

        LeaveOutcome {
            dispatches,
            closed: true,
            evicted,
        }
    }

    /// Admin-only: flip the blocked flag of a display name.
    pub fn toggle_block(&mut self, requester_id: &str, display_name: &str) -> AppResult<Vec<Dispatch>> {
        if !self.roster.is_admin(requester_id) {
            return Err(AppError::NotAdmin);
        }

        let name = display_name.trim();
        let now_blocked = self.roster.toggle_block(name);
        info!(room = %self.code, name = %name, blocked = now_blocked, "Block toggled");

        let mut dispatches = Vec::new();
        if now_blocked {
            let changes: Vec<TalkChange> = self
                .roster
                .ids_named(name)
                .iter()
                .filter_map(|id| self.arbiter.stop_talking(id))
                .collect();
            dispatches.extend(self.talk_dispatches(changes));
            dispatches.push(self.broadcast(ServerEvent::UserBlocked { display_name: name.to_string() }));
        } else {
            dispatches.push(self.broadcast(ServerEvent::UserUnblocked { display_name: name.to_string() }));
        }

        Ok(dispatches)
    }

    /// Ask the arbiter to activate `source -> target`; broadcast on success.
    pub fn start_talking(&mut self, source_id: &str, target_id: &str) -> AppResult<Vec<Dispatch>> {
        self.ensure_open()?;
        let change = self.arbiter.start_talking(&self.roster, source_id, target_id)?;
        Ok(self.talk_dispatches(vec![change]))
    }

    /// End the source's session. Idempotent.
    pub fn stop_talking(&mut self, source_id: &str) -> Vec<Dispatch> {
        let changes = self.arbiter.stop_talking(source_id).into_iter().collect();
        self.talk_dispatches(changes)
    }

    /// Gate a live frame. Returns the target's connection when the frame may be relayed.
    pub fn relay_target(&self, sender_connection: &str, frame: &AudioFrame) -> Option<ConnectionId> {
        let sender = self.roster.member_by_connection(sender_connection)?;
        if sender.id != frame.sender_id || frame.room_code != self.code {
            return None;
        }
        if self.roster.is_blocked(&sender.display_name) {
            return None;
        }
        if !self.arbiter.may_relay(&frame.sender_id, &frame.target_id) {
            return None;
        }
        self.roster
            .member(&frame.target_id)
            .map(|target| target.connection_id.clone())
    }

    /// Append a completed transmission uploaded by a member.
    ///
    /// Only the payload, timestamp and container type are taken from the
    /// upload. Both names come from the roster: the sender is whoever owns
    /// `sender_connection`, the receiver is `transmission.target_id`.
    ///
    /// ## Rejections:
    /// - **NotInRoom**: the connection is not a member
    /// - **BlockedSender**: the uploader's name is blocked
    /// - **BadRequest**: the sample rate is not the fixed capture rate
    /// - **NoTarget**: the target is gone, is the uploader, or is another
    ///   participant when the uploader is not the admin
    pub fn append_transmission(
        &mut self,
        sender_connection: &str,
        mut transmission: Transmission,
    ) -> AppResult<Vec<Dispatch>> {
        self.ensure_open()?;
        let uploader = self
            .roster
            .member_by_connection(sender_connection)
            .ok_or(AppError::NotInRoom)?;

        if self.roster.is_blocked(&uploader.display_name) {
            return Err(AppError::BlockedSender(uploader.display_name.clone()));
        }
        if transmission.sample_rate != TRANSMISSION_SAMPLE_RATE {
            return Err(AppError::BadRequest(format!(
                "transmissions are recorded at {} Hz, not {} Hz",
                TRANSMISSION_SAMPLE_RATE, transmission.sample_rate
            )));
        }

        let target_id = transmission.target_id.as_str();
        let allowed_pair = uploader.id != target_id
            && (self.roster.is_admin(&uploader.id) || self.roster.is_admin(target_id));
        let receiver_name = self
            .roster
            .label(target_id)
            .filter(|_| allowed_pair)
            .ok_or_else(|| AppError::NoTarget(format!("{} is not a valid receiver", target_id)))?;
        let sender_name = self.roster.label(&uploader.id).unwrap_or(uploader.display_name.as_str());

        transmission.sender_name = sender_name.to_string();
        transmission.receiver_name = receiver_name.to_string();

        info!(
            room = %self.code,
            sender = %transmission.sender_name,
            receiver = %transmission.receiver_name,
            bytes = transmission.payload.len(),
            "Transmission logged"
        );
        self.log.push(transmission);

        Ok(vec![self.broadcast(self.logs_event())])
    }

    /// Snapshot of the transmission log, oldest first.
    pub fn fetch_log(&self) -> Vec<Transmission> {
        self.log.clone()
    }

    pub fn transmission(&self, index: usize) -> Option<&Transmission> {
        self.log.get(index)
    }

    pub fn summaries(&self) -> Vec<TransmissionSummary> {
        self.log
            .iter()
            .enumerate()
            .map(|(index, t)| t.summary(index))
            .collect()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn logs_event(&self) -> ServerEvent {
        ServerEvent::LogsUpdate {
            room_code: self.code,
            logs: self.summaries(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::RoomNotFound(self.code.to_string()));
        }
        Ok(())
    }

    fn broadcast(&self, event: ServerEvent) -> Dispatch {
        Dispatch {
            recipients: self.roster.connections(),
            event,
        }
    }

    fn talk_dispatches(&self, changes: Vec<TalkChange>) -> Vec<Dispatch> {
        changes
            .into_iter()
            .map(|change| {
                self.broadcast(ServerEvent::UserTalking {
                    user_id: change.source_id,
                    target_user_id: change.target_id,
                    is_talking: change.is_talking,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::transmission::ContainerType;

    fn room() -> Room {
        let (room, _) = Room::create(RoomCode::parse("4821").unwrap(), Member::new("admin", "Boss", "c-admin"));
        room
    }

    fn events_for<'a>(dispatches: &'a [Dispatch], conn: &str) -> Vec<&'a ServerEvent> {
        dispatches
            .iter()
            .filter(|d| d.recipients.iter().any(|r| r == conn))
            .map(|d| &d.event)
            .collect()
    }

    #[test]
    fn test_join_broadcasts_roster_to_everyone() {
        let mut room = room();
        let (id, dispatches) = room.join("Alice", None, "c-alice", 32).unwrap();

        let admin_events = events_for(&dispatches, "c-admin");
        assert_eq!(
            admin_events,
            vec![&ServerEvent::UsersUpdate {
                users: vec![RosterEntry { id: id.clone(), name: "Alice".to_string() }]
            }]
        );

        let alice_events = events_for(&dispatches, "c-alice");
        assert!(matches!(
            alice_events[0],
            ServerEvent::RoomJoined { admin_id, .. } if admin_id == "admin"
        ));
        assert!(alice_events.iter().any(|e| matches!(e, ServerEvent::LogsUpdate { .. })));
    }

    #[test]
    fn test_rejoin_with_same_handle_rebinds() {
        let mut room = room();
        let (id, _) = room.join("Alice", Some("alice".to_string()), "c-1", 32).unwrap();
        let (again, _) = room.join("Alice", Some(id.clone()), "c-2", 32).unwrap();

        assert_eq!(id, again);
        assert_eq!(room.roster.participant_count(), 1);
        assert_eq!(room.roster.participant("alice").unwrap().connection_id, "c-2");

        // The stale socket closing must not evict the rebound member
        let outcome = room.leave_connection("c-1");
        assert!(outcome.dispatches.is_empty());
        assert_eq!(room.roster.participant_count(), 1);
    }

    #[test]
    fn test_name_validation() {
        let mut room = room();
        assert!(matches!(room.join("   ", None, "c", 32), Err(AppError::NameRejected(_))));
        assert!(matches!(room.join("admin", None, "c", 32), Err(AppError::NameRejected(_))));
        assert!(matches!(room.join(&"x".repeat(33), None, "c", 32), Err(AppError::NameRejected(_))));
        assert!(matches!(
            room.join("Mallory", Some("admin".to_string()), "c", 32),
            Err(AppError::NameRejected(_))
        ));
        assert_eq!(room.roster.participant_count(), 0);
    }

    #[test]
    fn test_leave_is_idempotent_and_stops_talk() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        room.join("Bob", Some("bob".to_string()), "c-bob", 32).unwrap();
        room.start_talking("admin", "alice").unwrap();

        let outcome = room.leave("alice");
        assert!(!outcome.closed);
        assert!(outcome.dispatches.iter().any(|d| d.event
            == ServerEvent::UserTalking {
                user_id: "admin".to_string(),
                target_user_id: "alice".to_string(),
                is_talking: false
            }));
        assert_eq!(room.arbiter.active_count(), 0);

        let again = room.leave("alice");
        assert!(again.dispatches.is_empty());
    }

    #[test]
    fn test_admin_leave_closes_room_and_evicts_everyone() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        room.join("Bob", Some("bob".to_string()), "c-bob", 32).unwrap();

        let outcome = room.leave("admin");
        assert!(outcome.closed);
        assert_eq!(outcome.evicted.len(), 3);
        assert_eq!(outcome.dispatches.len(), 1);
        assert_eq!(outcome.dispatches[0].recipients, vec!["c-alice".to_string(), "c-bob".to_string()]);
        assert!(matches!(outcome.dispatches[0].event, ServerEvent::RoomClosed { .. }));
        assert_eq!(room.roster.participant_count(), 0);
    }

    #[test]
    fn test_only_admin_toggles_block() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        assert_eq!(room.toggle_block("alice", "Alice"), Err(AppError::NotAdmin));

        let dispatches = room.toggle_block("admin", "Alice").unwrap();
        let alice_events = events_for(&dispatches, "c-alice");
        assert_eq!(alice_events, vec![&ServerEvent::UserBlocked { display_name: "Alice".to_string() }]);
    }

    #[test]
    fn test_blocking_ends_active_session() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        room.start_talking("alice", "admin").unwrap();

        let dispatches = room.toggle_block("admin", "Alice").unwrap();
        assert!(matches!(dispatches[0].event, ServerEvent::UserTalking { is_talking: false, .. }));
        assert!(!room.arbiter.may_relay("alice", "admin"));
    }

    #[test]
    fn test_relay_gate() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        let frame = AudioFrame {
            sender_id: "alice".to_string(),
            target_id: "admin".to_string(),
            room_code: room.code,
            samples: vec![0; 1024],
        };

        // Before Active: dropped
        assert_eq!(room.relay_target("c-alice", &frame), None);

        room.start_talking("alice", "admin").unwrap();
        assert_eq!(room.relay_target("c-alice", &frame), Some("c-admin".to_string()));
        // Spoofed sender connection
        assert_eq!(room.relay_target("c-admin", &frame), None);

        room.stop_talking("alice");
        assert_eq!(room.relay_target("c-alice", &frame), None);
    }

    #[test]
    fn test_transmission_log_is_append_only_and_requires_membership() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        let t = Transmission {
            sender_name: "Alice".to_string(),
            receiver_name: ADMIN_LABEL.to_string(),
            target_id: "admin".to_string(),
            timestamp: 1_000,
            sample_rate: 16_000,
            container_type: ContainerType::RawPcm16,
            payload: vec![0, 0],
        };

        assert_eq!(room.append_transmission("c-stranger", t.clone()), Err(AppError::NotInRoom));
        let dispatches = room.append_transmission("c-alice", t.clone()).unwrap();
        assert_eq!(dispatches[0].recipients.len(), 2);
        assert_eq!(room.fetch_log(), vec![t]);
        assert_eq!(room.summaries()[0].byte_len, 2);
    }

    fn upload(sender: &str, receiver: &str, target_id: &str, sample_rate: u32) -> Transmission {
        Transmission {
            sender_name: sender.to_string(),
            receiver_name: receiver.to_string(),
            target_id: target_id.to_string(),
            timestamp: 1_000,
            sample_rate,
            container_type: ContainerType::RawPcm16,
            payload: vec![0, 0],
        }
    }

    #[test]
    fn test_uploaded_names_come_from_the_roster() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        room.join("Bob", Some("bob".to_string()), "c-bob", 32).unwrap();

        room.append_transmission("c-alice", upload("Admin", "Nobody", "admin", 16_000))
            .unwrap();
        room.append_transmission("c-admin", upload("Mallory", "Nobody", "bob", 16_000))
            .unwrap();

        let log = room.fetch_log();
        assert_eq!((log[0].sender_name.as_str(), log[0].receiver_name.as_str()), ("Alice", ADMIN_LABEL));
        assert_eq!((log[1].sender_name.as_str(), log[1].receiver_name.as_str()), (ADMIN_LABEL, "Bob"));
    }

    #[test]
    fn test_invalid_uploads_leave_the_log_untouched() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        room.join("Bob", Some("bob".to_string()), "c-bob", 32).unwrap();

        assert!(matches!(
            room.append_transmission("c-alice", upload("Alice", "Admin", "admin", 3_000_000_000)),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            room.append_transmission("c-alice", upload("Alice", "Bob", "bob", 16_000)),
            Err(AppError::NoTarget(_))
        ));
        assert!(matches!(
            room.append_transmission("c-alice", upload("Alice", "Alice", "alice", 16_000)),
            Err(AppError::NoTarget(_))
        ));
        assert!(matches!(
            room.append_transmission("c-admin", upload("Admin", "Ghost", "ghost", 16_000)),
            Err(AppError::NoTarget(_))
        ));

        room.toggle_block("admin", "Alice").unwrap();
        assert_eq!(
            room.append_transmission("c-alice", upload("Alice", "Admin", "admin", 16_000)),
            Err(AppError::BlockedSender("Alice".to_string()))
        );
        assert_eq!(room.log_len(), 0);
    }

    #[test]
    fn test_closed_room_rejects_further_operations() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        let outcome = room.leave("admin");
        assert!(outcome.closed);
        assert!(room.is_closed());

        let gone = AppError::RoomNotFound("4821".to_string());
        assert_eq!(room.join("Bob", None, "c-bob", 32).unwrap_err(), gone);
        assert_eq!(room.start_talking("admin", "alice").unwrap_err(), gone);
        assert_eq!(
            room.append_transmission("c-admin", upload("Admin", "Alice", "alice", 16_000)),
            Err(gone)
        );
        assert_eq!(room.roster.participant_count(), 0);
    }

    #[test]
    fn test_labels() {
        let mut room = room();
        room.join("Alice", Some("alice".to_string()), "c-alice", 32).unwrap();
        assert_eq!(room.roster.label("admin"), Some(ADMIN_LABEL));
        assert_eq!(room.roster.label("alice"), Some("Alice"));
        assert_eq!(room.roster.label("ghost"), None);
    }
}
