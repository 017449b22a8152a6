//! # Relay WebSocket
//!
//! Every client holds one WebSocket to `/ws`. Each connection is an actix
//! actor that owns at most one room binding (room code + participant handle).
//!
//! ## Message flow:
//! 1. **Text frames**: one JSON `ClientEvent` each (create, join, talk, block...)
//! 2. **Room operations**: run under the room's lock and return `Dispatch`es
//! 3. **Delivery**: the `ConnectionHub` pushes each dispatch to the recipient actors
//! 4. **Binary frames**: live audio (forwarded untouched to the target) or a
//!    finished transmission (appended to the room log)
//!
//! Errors are reported to the originating connection only, as an `error` event.

use crate::error::{AppError, AppResult};
use crate::protocol::events::{ClientEvent, ServerEvent};
use crate::protocol::wire::{self, AudioFrame, BinaryMessage};
use crate::room::code::{new_connection_id, ConnectionId, ParticipantId, RoomCode};
use crate::room::registry::{lock_room, SharedRoom};
use crate::room::session::Dispatch;
use crate::room::transmission::{Transmission, TransmissionMeta};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Something to write to a connection's socket.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub enum Push {
    Event(ServerEvent),
    /// Already-encoded audio envelope
    Binary(Vec<u8>),
}

/// Connection id to actor address.
#[derive(Default)]
pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnectionId, Recipient<Push>>>,
}

impl fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("connections", &self.len())
            .finish()
    }
}

impl ConnectionHub {
    pub fn register(&self, id: &str, recipient: Recipient<Push>) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), recipient);
    }

    pub fn unregister(&self, id: &str) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push every dispatch to its recipients. Unknown connections are skipped.
    pub fn deliver(&self, dispatches: Vec<Dispatch>) {
        if dispatches.is_empty() {
            return;
        }
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        for dispatch in dispatches {
            for connection_id in &dispatch.recipients {
                match connections.get(connection_id) {
                    Some(recipient) => recipient.do_send(Push::Event(dispatch.event.clone())),
                    None => debug!(connection = %connection_id, "Dropping event for closed connection"),
                }
            }
        }
    }

    /// Returns false when the connection is gone.
    pub fn send_binary(&self, connection_id: &str, data: Vec<u8>) -> bool {
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        match connections.get(connection_id) {
            Some(recipient) => {
                recipient.do_send(Push::Binary(data));
                true
            }
            None => false,
        }
    }
}

/// The room this connection speaks for.
#[derive(Debug, Clone, PartialEq)]
struct Binding {
    room_code: RoomCode,
    participant_id: ParticipantId,
}

/// One relay connection.
pub struct RelaySocket {
    id: ConnectionId,
    state: AppState,
    binding: Option<Binding>,
    last_heartbeat: Instant,
}

impl RelaySocket {
    pub fn new(state: AppState) -> Self {
        Self {
            id: new_connection_id(),
            state,
            binding: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Apply one control event. The returned dispatches may include events for this connection.
    fn handle_event(&mut self, event: ClientEvent) -> AppResult<Vec<Dispatch>> {
        match event {
            ClientEvent::CreateRoom {
                display_name,
                participant_id,
                resume_code,
            } => {
                let mut dispatches = self.leave_current();
                let created = self.state.rooms.create_room(
                    &display_name,
                    participant_id,
                    resume_code,
                    &self.id,
                )?;
                info!(connection = %self.id, room = %created.code, "Room created");
                self.binding = Some(Binding {
                    room_code: created.code,
                    participant_id: created.admin_id,
                });
                dispatches.extend(created.dispatches);
                Ok(dispatches)
            }
            ClientEvent::JoinRoom {
                room_code,
                display_name,
                participant_id,
            } => {
                let room = self.state.rooms.get(&room_code)?;
                // Rejoining the bound room keeps the bound handle, so one
                // connection never holds two roster entries
                let (participant_id, mut dispatches) = match &self.binding {
                    Some(binding) if binding.room_code == room_code => {
                        (Some(binding.participant_id.clone()), Vec::new())
                    }
                    _ => (participant_id, self.leave_current()),
                };

                let max_name_len = self.state.rooms.max_name_len();
                let joined = lock_room(&room).join(&display_name, participant_id, &self.id, max_name_len);
                let (id, joined) = match joined {
                    Ok(joined) => joined,
                    Err(e) => {
                        // The previous room still hears about the leave
                        self.state.hub.deliver(dispatches);
                        return Err(e);
                    }
                };
                self.binding = Some(Binding {
                    room_code,
                    participant_id: id,
                });
                dispatches.extend(joined);
                Ok(dispatches)
            }
            ClientEvent::LeaveRoom => Ok(self.leave_current()),
            ClientEvent::ToggleBlockUser {
                room_code,
                display_name,
            } => {
                let (room, requester) = self.bound_room(&room_code)?;
                let mut room = lock_room(&room);
                room.toggle_block(&requester, &display_name)
            }
            ClientEvent::StartTalking { room_code, target_id } => {
                let (room, source) = self.bound_room(&room_code)?;
                let mut room = lock_room(&room);
                room.start_talking(&source, &target_id)
            }
            ClientEvent::StopTalking { room_code, .. } => {
                let (room, source) = self.bound_room(&room_code)?;
                let mut room = lock_room(&room);
                Ok(room.stop_talking(&source))
            }
            ClientEvent::FetchLogs { room_code } => {
                let (room, _) = self.bound_room(&room_code)?;
                let logs = lock_room(&room).logs_event();
                Ok(vec![Dispatch::to_one(&self.id, logs)])
            }
            ClientEvent::Ping { timestamp } => Ok(vec![Dispatch::to_one(&self.id, ServerEvent::Pong { timestamp })]),
        }
    }

    /// Leave whatever room this connection is bound to. Idempotent.
    fn leave_current(&mut self) -> Vec<Dispatch> {
        let Some(binding) = self.binding.take() else {
            return Vec::new();
        };
        let Ok(room) = self.state.rooms.get(&binding.room_code) else {
            return Vec::new();
        };

        let outcome = lock_room(&room).leave(&binding.participant_id);
        if outcome.closed {
            self.state.rooms.retire(&binding.room_code, &room);
        }
        outcome.dispatches
    }

    /// The bound room, if `room_code` is the one this connection joined.
    fn bound_room(&mut self, room_code: &RoomCode) -> AppResult<(SharedRoom, ParticipantId)> {
        let binding = self
            .binding
            .as_ref()
            .filter(|b| &b.room_code == room_code)
            .ok_or(AppError::NotInRoom)?;

        match self.state.rooms.get(room_code) {
            Ok(room) => Ok((room, binding.participant_id.clone())),
            Err(e) => {
                self.binding = None;
                Err(e)
            }
        }
    }

    /// Where a live frame may go, if anywhere.
    fn route_audio(&self, frame: &AudioFrame) -> Option<ConnectionId> {
        let binding = self.binding.as_ref().filter(|b| b.room_code == frame.room_code)?;
        let room = self.state.rooms.get(&binding.room_code).ok()?;
        let target = lock_room(&room).relay_target(&self.id, frame);
        target
    }

    fn log_transmission(&mut self, meta: TransmissionMeta, payload: Vec<u8>) -> AppResult<Vec<Dispatch>> {
        let room_code = RoomCode::parse(&meta.room_code)?;
        let (room, _) = self.bound_room(&room_code)?;
        let dispatches = lock_room(&room).append_transmission(&self.id, Transmission::from_meta(meta, payload))?;
        self.state.record_transmission();
        Ok(dispatches)
    }

    fn handle_binary(&mut self, data: Vec<u8>) -> AppResult<Vec<Dispatch>> {
        match wire::decode(&data)? {
            BinaryMessage::Audio(frame) => {
                let relayed = match self.route_audio(&frame) {
                    Some(target) => self.state.hub.send_binary(&target, data),
                    None => false,
                };
                if !relayed {
                    trace!(connection = %self.id, sender = %frame.sender_id, "Audio frame dropped");
                }
                self.state.record_frame(relayed);
                Ok(Vec::new())
            }
            BinaryMessage::Transmission { meta, payload } => self.log_transmission(meta, payload),
        }
    }

    fn finish(&self, result: AppResult<Vec<Dispatch>>, ctx: &mut ws::WebsocketContext<Self>) {
        match result {
            Ok(dispatches) => self.state.hub.deliver(dispatches),
            Err(err) => self.send_error(ctx, &err),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, err: &AppError) {
        warn!(connection = %self.id, code = err.code(), error = %err, "Request rejected");
        send_event(ctx, &ServerEvent::from(err));
    }
}

fn send_event(ctx: &mut ws::WebsocketContext<RelaySocket>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => ctx.text(json),
        Err(e) => error!("Failed to serialize server event: {}", e),
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.id, "Relay connection opened");
        self.state.hub.register(&self.id, ctx.address().recipient());
        self.state.connection_opened();

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection = %act.id, "Heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection = %self.id, "Relay connection closed");
        self.state.hub.unregister(&self.id);
        self.state.connection_closed();

        if let Some(binding) = self.binding.take() {
            let outcome = self.state.rooms.disconnect(&binding.room_code, &self.id);
            self.state.hub.deliver(outcome.dispatches);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    debug!(connection = %self.id, event = ?event, "Client event");
                    let result = self.handle_event(event);
                    self.finish(result, ctx);
                }
                Err(e) => self.send_error(ctx, &AppError::BadRequest(format!("Invalid event: {}", e))),
            },
            Ok(ws::Message::Binary(data)) => {
                let result = self.handle_binary(data.to_vec());
                self.finish(result, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection = %self.id, reason = ?reason, "Client closed socket");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Push> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        match msg {
            Push::Event(event) => {
                if matches!(event, ServerEvent::RoomClosed { .. }) {
                    self.binding = None;
                }
                send_event(ctx, &event);
            }
            Push::Binary(data) => ctx.binary(data),
        }
    }
}

/// `GET /ws`: upgrade to a relay connection.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!("Relay upgrade from {:?}", req.connection_info().peer_addr());
    ws::start(RelaySocket::new(app_state.get_ref().clone()), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::room::transmission::ContainerType;

    fn socket(state: &AppState) -> RelaySocket {
        RelaySocket::new(state.clone())
    }

    fn create(admin: &mut RelaySocket) -> RoomCode {
        admin
            .handle_event(ClientEvent::CreateRoom {
                display_name: "Boss".to_string(),
                participant_id: None,
                resume_code: None,
            })
            .unwrap();
        admin.binding.as_ref().unwrap().room_code
    }

    fn join(socket: &mut RelaySocket, code: RoomCode, name: &str) -> AppResult<Vec<Dispatch>> {
        socket.handle_event(ClientEvent::JoinRoom {
            room_code: code,
            display_name: name.to_string(),
            participant_id: None,
        })
    }

    #[test]
    fn test_create_and_join_bind_connections() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);

        let mut alice = socket(&state);
        let dispatches = join(&mut alice, code, "Alice").unwrap();
        assert!(matches!(dispatches[0].event, ServerEvent::RoomJoined { .. }));
        assert_eq!(dispatches[0].recipients, vec![alice.id.clone()]);
        assert_eq!(alice.binding.as_ref().unwrap().room_code, code);
    }

    #[test]
    fn test_join_unknown_room() {
        let state = AppState::new(AppConfig::default());
        let mut alice = socket(&state);
        let err = join(&mut alice, RoomCode::parse("9999").unwrap(), "Alice").unwrap_err();
        assert_eq!(err, AppError::RoomNotFound("9999".to_string()));
        assert!(alice.binding.is_none());
    }

    #[test]
    fn test_only_admin_toggles_block() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();

        let toggle = ClientEvent::ToggleBlockUser {
            room_code: code,
            display_name: "Alice".to_string(),
        };
        assert_eq!(alice.handle_event(toggle.clone()).unwrap_err(), AppError::NotAdmin);
        let dispatches = admin.handle_event(toggle).unwrap();
        assert!(dispatches
            .iter()
            .any(|d| matches!(&d.event, ServerEvent::UserBlocked { display_name } if display_name == "Alice")));
    }

    #[test]
    fn test_events_for_other_rooms_are_refused() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        create(&mut admin);

        let err = admin
            .handle_event(ClientEvent::FetchLogs {
                room_code: RoomCode::parse("0001").unwrap(),
            })
            .unwrap_err();
        assert_eq!(err, AppError::NotInRoom);
    }

    #[test]
    fn test_admin_leave_removes_room() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();

        let dispatches = admin.handle_event(ClientEvent::LeaveRoom).unwrap();
        assert!(dispatches
            .iter()
            .any(|d| matches!(d.event, ServerEvent::RoomClosed { .. }) && d.recipients == vec![alice.id.clone()]));
        assert!(state.rooms.get(&code).is_err());
        assert!(admin.handle_event(ClientEvent::LeaveRoom).unwrap().is_empty());
    }

    #[test]
    fn test_audio_routing_follows_talk_session() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();

        let admin_id = admin.binding.as_ref().unwrap().participant_id.clone();
        let alice_id = alice.binding.as_ref().unwrap().participant_id.clone();
        let frame = AudioFrame {
            sender_id: alice_id.clone(),
            target_id: admin_id.clone(),
            room_code: code,
            samples: vec![1, 2, 3],
        };

        assert_eq!(alice.route_audio(&frame), None);

        alice
            .handle_event(ClientEvent::StartTalking {
                room_code: code,
                target_id: admin_id,
            })
            .unwrap();
        assert_eq!(alice.route_audio(&frame), Some(admin.id.clone()));

        // Spoofed sender id from another connection
        assert_eq!(admin.route_audio(&frame), None);
    }

    #[test]
    fn test_participant_cannot_talk_to_participant() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();
        let mut bob = socket(&state);
        join(&mut bob, code, "Bob").unwrap();

        let alice_id = alice.binding.as_ref().unwrap().participant_id.clone();
        let bob_id = bob.binding.as_ref().unwrap().participant_id.clone();

        let err = alice
            .handle_event(ClientEvent::StartTalking {
                room_code: code,
                target_id: bob_id.clone(),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::NoTarget(_)));

        let frame = AudioFrame {
            sender_id: alice_id,
            target_id: bob_id,
            room_code: code,
            samples: vec![1, 2, 3],
        };
        assert_eq!(alice.route_audio(&frame), None);
    }

    fn upload_meta(code: RoomCode, target_id: &str) -> TransmissionMeta {
        TransmissionMeta {
            room_code: code.to_string(),
            sender_name: "Admin".to_string(),
            receiver_name: "Nobody".to_string(),
            target_id: target_id.to_string(),
            timestamp: 1_700_000_000_000,
            sample_rate: 16_000,
            container_type: ContainerType::RawPcm16,
        }
    }

    #[test]
    fn test_transmission_upload_is_logged_with_roster_names() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();
        let admin_id = admin.binding.as_ref().unwrap().participant_id.clone();

        // Claims to be the admin talking to "Nobody"
        let bytes = wire::encode_transmission(&upload_meta(code, &admin_id), &[0, 0, 1, 0]).unwrap();
        let dispatches = alice.handle_binary(bytes).unwrap();

        assert!(matches!(&dispatches[0].event, ServerEvent::LogsUpdate { logs, .. } if logs.len() == 1));
        assert_eq!(state.get_metrics_snapshot().transmissions_logged, 1);

        let room = state.rooms.get(&code).unwrap();
        let log = lock_room(&room).fetch_log();
        assert_eq!(log[0].sender_name, "Alice");
        assert_eq!(log[0].receiver_name, "Admin");
    }

    #[test]
    fn test_invalid_uploads_are_not_logged() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();
        let mut bob = socket(&state);
        join(&mut bob, code, "Bob").unwrap();
        let admin_id = admin.binding.as_ref().unwrap().participant_id.clone();
        let bob_id = bob.binding.as_ref().unwrap().participant_id.clone();

        let mut wrong_rate = upload_meta(code, &admin_id);
        wrong_rate.sample_rate = 3_000_000_000;
        let bytes = wire::encode_transmission(&wrong_rate, &[0, 0]).unwrap();
        assert!(matches!(alice.handle_binary(bytes), Err(AppError::BadRequest(_))));

        let bytes = wire::encode_transmission(&upload_meta(code, &bob_id), &[0, 0]).unwrap();
        assert!(matches!(alice.handle_binary(bytes), Err(AppError::NoTarget(_))));

        admin
            .handle_event(ClientEvent::ToggleBlockUser {
                room_code: code,
                display_name: "Alice".to_string(),
            })
            .unwrap();
        let bytes = wire::encode_transmission(&upload_meta(code, &admin_id), &[0, 0]).unwrap();
        assert!(matches!(alice.handle_binary(bytes), Err(AppError::BlockedSender(_))));

        let room = state.rooms.get(&code).unwrap();
        assert_eq!(lock_room(&room).log_len(), 0);
        assert_eq!(state.get_metrics_snapshot().transmissions_logged, 0);
    }

    #[test]
    fn test_rejoining_bound_room_keeps_one_entry() {
        let state = AppState::new(AppConfig::default());
        let mut admin = socket(&state);
        let code = create(&mut admin);
        let mut alice = socket(&state);
        join(&mut alice, code, "Alice").unwrap();
        let first = alice.binding.as_ref().unwrap().participant_id.clone();

        alice
            .handle_event(ClientEvent::JoinRoom {
                room_code: code,
                display_name: "Alice".to_string(),
                participant_id: Some("someone-else".to_string()),
            })
            .unwrap();

        assert_eq!(alice.binding.as_ref().unwrap().participant_id, first);
        let room = state.rooms.get(&code).unwrap();
        assert_eq!(lock_room(&room).roster.participant_count(), 1);
    }

    #[test]
    fn test_ping_answers_pong_to_self() {
        let state = AppState::new(AppConfig::default());
        let mut client = socket(&state);
        let dispatches = client.handle_event(ClientEvent::Ping { timestamp: 42 }).unwrap();
        assert_eq!(dispatches, vec![Dispatch::to_one(&client.id, ServerEvent::Pong { timestamp: 42 })]);
    }

    struct Inbox {
        received: Vec<Push>,
    }

    impl Actor for Inbox {
        type Context = Context<Self>;
    }

    impl Handler<Push> for Inbox {
        type Result = ();

        fn handle(&mut self, msg: Push, _ctx: &mut Self::Context) {
            self.received.push(msg);
        }
    }

    #[derive(Message)]
    #[rtype(result = "usize")]
    struct Count;

    impl Handler<Count> for Inbox {
        type Result = usize;

        fn handle(&mut self, _msg: Count, _ctx: &mut Self::Context) -> usize {
            self.received.len()
        }
    }

    #[actix_web::test]
    async fn test_hub_delivers_to_registered_connections() {
        let hub = ConnectionHub::default();
        let inbox = Inbox { received: Vec::new() }.start();
        hub.register("c-1", inbox.clone().recipient());

        hub.deliver(vec![Dispatch {
            recipients: vec!["c-1".to_string(), "c-gone".to_string()],
            event: ServerEvent::Pong { timestamp: 1 },
        }]);
        assert!(hub.send_binary("c-1", vec![1, 2]));
        assert!(!hub.send_binary("c-gone", vec![1, 2]));

        assert_eq!(inbox.send(Count).await.unwrap(), 2);

        hub.unregister("c-1");
        assert!(hub.is_empty());
    }
}
