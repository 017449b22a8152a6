//! # Talk Arbitration
//!
//! Decides, per room, who may currently transmit to whom.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: no session for the source
//! 2. **Active**: frames from source to target are relayed
//! 3. **Idle** again after `stop_talking` or either party leaving
//!
//! ## Invariants:
//! - Participants talk only to the admin; the admin talks to one participant.
//! - At most one Active session per source. The admin is a source like any
//!   other, so this also caps the admin at one outbound session.
//! - A pair is never Active in both directions at once.
//! - Frames are relayed only for the exact Active (source, target) pair;
//!   anything else is dropped, never queued.

use crate::error::{AppError, AppResult};
use crate::room::code::ParticipantId;
use crate::room::session::Roster;
use std::collections::HashMap;
use tracing::debug;

/// Where a source sits in the arbitration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkPhase {
    Idle,
    Active,
}

/// One single-direction talk session. Only Active sessions are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkSession {
    pub source_id: ParticipantId,
    pub target_id: ParticipantId,
}

/// A talk-state transition to broadcast as `user-talking`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkChange {
    pub source_id: ParticipantId,
    pub target_id: ParticipantId,
    pub is_talking: bool,
}

/// Per-room arbiter. Lives inside the room and is only touched under the room lock.
#[derive(Debug, Default)]
pub struct TalkArbiter {
    /// Active sessions keyed by source
    sessions: HashMap<ParticipantId, TalkSession>,
}

impl TalkArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a transition to Active for `source_id -> target_id`.
    ///
    /// ## Rejections (no state change):
    /// - **BlockedSender**: source's display name is blocked
    /// - **NoTarget**: target is not the admin or a live participant, is the
    ///   source, or is another participant when the source is not the admin
    /// - **AlreadyTalking**: source already has an Active session, or the
    ///   target is currently talking back to the source
    pub fn start_talking(
        &mut self,
        roster: &Roster,
        source_id: &str,
        target_id: &str,
    ) -> AppResult<TalkChange> {
        let source_name = roster
            .display_name(source_id)
            .ok_or(AppError::NotInRoom)?;

        if roster.is_blocked(source_name) {
            return Err(AppError::BlockedSender(source_name.to_string()));
        }

        if source_id == target_id || !roster.is_member(target_id) {
            return Err(AppError::NoTarget(format!("{} is not in this room", target_id)));
        }

        if !roster.is_admin(source_id) && !roster.is_admin(target_id) {
            return Err(AppError::NoTarget("participants may only talk to the admin".to_string()));
        }

        if let Some(existing) = self.sessions.get(source_id) {
            return Err(AppError::AlreadyTalking(format!(
                "{} is already talking to {}",
                source_name, existing.target_id
            )));
        }

        if self.is_active(target_id, source_id) {
            return Err(AppError::AlreadyTalking(format!(
                "{} is currently talking to {}",
                target_id, source_name
            )));
        }

        debug!(source = %source_id, target = %target_id, "Talk session active");
        self.sessions.insert(
            source_id.to_string(),
            TalkSession {
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            },
        );

        Ok(TalkChange {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            is_talking: true,
        })
    }

    /// End the source's Active session, if any. Idempotent.
    pub fn stop_talking(&mut self, source_id: &str) -> Option<TalkChange> {
        self.sessions.remove(source_id).map(|session| {
            debug!(source = %session.source_id, target = %session.target_id, "Talk session idle");
            TalkChange {
                source_id: session.source_id,
                target_id: session.target_id,
                is_talking: false,
            }
        })
    }

    /// Stop every session in which `id` is source or target (used on disconnect).
    pub fn stop_involving(&mut self, id: &str) -> Vec<TalkChange> {
        let sources: Vec<ParticipantId> = self
            .sessions
            .values()
            .filter(|s| s.source_id == id || s.target_id == id)
            .map(|s| s.source_id.clone())
            .collect();

        sources
            .iter()
            .filter_map(|source| self.stop_talking(source))
            .collect()
    }

    /// Whether frames from `source_id` to `target_id` may be relayed right now.
    pub fn may_relay(&self, source_id: &str, target_id: &str) -> bool {
        self.is_active(source_id, target_id)
    }

    /// Current session for a source.
    pub fn session_of(&self, source_id: &str) -> Option<&TalkSession> {
        self.sessions.get(source_id)
    }

    /// Phase of the source's session.
    pub fn phase_of(&self, source_id: &str) -> TalkPhase {
        if self.sessions.contains_key(source_id) {
            TalkPhase::Active
        } else {
            TalkPhase::Idle
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn clear(&mut self) -> Vec<TalkChange> {
        let sources: Vec<ParticipantId> = self.sessions.keys().cloned().collect();
        sources.iter().filter_map(|s| self.stop_talking(s)).collect()
    }

    fn is_active(&self, source_id: &str, target_id: &str) -> bool {
        self.sessions
            .get(source_id)
            .map(|s| s.target_id == target_id)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::session::{Member, Roster};

    fn roster() -> Roster {
        let mut roster = Roster::new(Member::new("admin", "Admin", "c-admin"));
        roster.add(Member::new("alice", "Alice", "c-alice"));
        roster.add(Member::new("bob", "Bob", "c-bob"));
        roster
    }

    #[test]
    fn test_start_and_stop() {
        let roster = roster();
        let mut arbiter = TalkArbiter::new();

        let change = arbiter.start_talking(&roster, "alice", "admin").unwrap();
        assert!(change.is_talking);
        assert_eq!(arbiter.phase_of("alice"), TalkPhase::Active);
        assert!(arbiter.may_relay("alice", "admin"));
        assert!(!arbiter.may_relay("admin", "alice"));
        assert!(!arbiter.may_relay("alice", "bob"));

        let stopped = arbiter.stop_talking("alice").unwrap();
        assert!(!stopped.is_talking);
        assert_eq!(stopped.target_id, "admin");
        assert_eq!(arbiter.phase_of("alice"), TalkPhase::Idle);
        assert!(!arbiter.may_relay("alice", "admin"));
    }

    #[test]
    fn test_second_start_is_an_error_not_a_second_session() {
        let roster = roster();
        let mut arbiter = TalkArbiter::new();
        arbiter.start_talking(&roster, "admin", "alice").unwrap();

        let err = arbiter.start_talking(&roster, "admin", "bob").unwrap_err();
        assert!(matches!(err, AppError::AlreadyTalking(_)));
        assert_eq!(arbiter.active_count(), 1);
        assert_eq!(arbiter.session_of("admin").unwrap().target_id, "alice");
    }

    #[test]
    fn test_pair_is_one_direction_at_a_time() {
        let roster = roster();
        let mut arbiter = TalkArbiter::new();
        arbiter.start_talking(&roster, "alice", "admin").unwrap();
        assert!(matches!(
            arbiter.start_talking(&roster, "admin", "alice"),
            Err(AppError::AlreadyTalking(_))
        ));
        // Admin may still talk to someone else
        assert!(arbiter.start_talking(&roster, "admin", "bob").is_ok());
    }

    #[test]
    fn test_blocked_and_unknown_targets() {
        let mut roster = roster();
        let mut arbiter = TalkArbiter::new();

        assert!(matches!(
            arbiter.start_talking(&roster, "alice", "nobody"),
            Err(AppError::NoTarget(_))
        ));
        assert!(matches!(
            arbiter.start_talking(&roster, "alice", "alice"),
            Err(AppError::NoTarget(_))
        ));

        roster.toggle_block("Alice");
        assert!(matches!(
            arbiter.start_talking(&roster, "alice", "admin"),
            Err(AppError::BlockedSender(_))
        ));
        assert_eq!(arbiter.active_count(), 0);
        assert!(!arbiter.may_relay("alice", "admin"));
    }

    #[test]
    fn test_participants_cannot_talk_to_each_other() {
        let roster = roster();
        let mut arbiter = TalkArbiter::new();

        assert!(matches!(
            arbiter.start_talking(&roster, "alice", "bob"),
            Err(AppError::NoTarget(_))
        ));
        assert_eq!(arbiter.phase_of("alice"), TalkPhase::Idle);
        assert!(!arbiter.may_relay("alice", "bob"));

        // Admin to any single participant is fine
        assert!(arbiter.start_talking(&roster, "admin", "bob").is_ok());
    }

    #[test]
    fn test_stop_is_idempotent_and_disconnect_stops_both_roles() {
        let roster = roster();
        let mut arbiter = TalkArbiter::new();
        assert!(arbiter.stop_talking("alice").is_none());

        arbiter.start_talking(&roster, "admin", "alice").unwrap();
        arbiter.start_talking(&roster, "bob", "admin").unwrap();

        let changes = arbiter.stop_involving("alice");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].source_id, "admin");
        assert!(arbiter.may_relay("bob", "admin"));

        let changes = arbiter.stop_involving("admin");
        assert_eq!(changes.len(), 1);
        assert_eq!(arbiter.active_count(), 0);
    }
}
