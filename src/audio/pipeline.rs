//! # Client Audio Pipeline
//!
//! Moves audio between the platform devices and the relay connection.
//!
//! ## Paths:
//! - **Capture**: device callback → [`FrameProducer`] → bounded queue →
//!   [`FrameSender`] → [`FrameSink`] (live, fire-and-forget)
//! - **Archival**: the same consumer appends every frame to a
//!   [`SessionRecorder`]; the session's WAV blob comes out on stop
//! - **Delivery**: received frame → [`Player`] → [`PlaybackSink`], rendered
//!   on arrival with no jitter buffer
//!
//! ## Realtime rule:
//! The capture callback never blocks and never awaits. It only slices,
//! converts and `try_send`s; when the queue is full the frame is dropped
//! and counted.
//!
//! Platform audio (microphone and speaker) sits behind the
//! [`CaptureDevice`] and [`PlaybackSink`] traits so the pipeline can be
//! driven by any backend.

use crate::audio::codec::{float_to_pcm16, pcm16_slice_to_float};
use crate::audio::recorder::SessionRecorder;
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use crate::protocol::events::ClientEvent;
use crate::protocol::wire::AudioFrame;
use crate::room::code::{ParticipantId, RoomCode};
use crate::room::transmission::Transmission;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// What the capture device is asked for. Processing flags are delegated to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl CaptureConstraints {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// Callback the device invokes with normalized mono samples.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A microphone.
pub trait CaptureDevice: Send {
    /// Start capturing. Samples flow into `on_samples` until the guard is dropped.
    fn open(&mut self, constraints: &CaptureConstraints, on_samples: SampleCallback) -> AppResult<CaptureGuard>;
}

/// Keeps the device open; dropping it releases the device.
pub struct CaptureGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for CaptureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureGuard")
            .field("open", &self.release.is_some())
            .finish()
    }
}

/// A speaker.
pub trait PlaybackSink: Send {
    fn render(&mut self, samples: &[f32], sample_rate: u32) -> AppResult<()>;
}

/// Where live frames go; implemented by the connection handle.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: AudioFrame) -> AppResult<()>;
}

/// Routing metadata stamped onto every outgoing frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub sender_id: ParticipantId,
    pub target_id: ParticipantId,
    pub room_code: RoomCode,
}

/// Items crossing the capture queue.
#[derive(Debug)]
pub enum CaptureItem {
    /// A new session starts; frames that follow belong to it
    Begin(Route),
    Frame(Vec<i16>),
    /// Session over: encode what was recorded and reply
    Finish {
        sender_name: String,
        receiver_name: String,
        target_id: ParticipantId,
        timestamp: i64,
        reply: oneshot::Sender<AppResult<Transmission>>,
    },
}

/// Realtime side of the capture path.
pub struct FrameProducer {
    queue: mpsc::Sender<CaptureItem>,
    frame_samples: usize,
    pending: Vec<f32>,
    dropped: Arc<AtomicU64>,
}

impl FrameProducer {
    pub fn new(queue: mpsc::Sender<CaptureItem>, frame_samples: usize, dropped: Arc<AtomicU64>) -> Self {
        Self {
            queue,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            dropped,
        }
    }

    /// Slice input into fixed frames and enqueue them. Never blocks.
    ///
    /// A trailing partial frame waits for the next call.
    pub fn push(&mut self, input: &[f32]) {
        self.pending.extend_from_slice(input);

        while self.pending.len() >= self.frame_samples {
            let frame: Vec<i16> = self
                .pending
                .drain(..self.frame_samples)
                .map(float_to_pcm16)
                .collect();

            if self.queue.try_send(CaptureItem::Frame(frame)).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Consumer side: forwards live frames and records the session.
pub struct FrameSender<S: FrameSink> {
    queue: mpsc::Receiver<CaptureItem>,
    sink: S,
    recorder: SessionRecorder,
    route: Option<Route>,
    sent: u64,
}

impl<S: FrameSink> FrameSender<S> {
    pub fn new(queue: mpsc::Receiver<CaptureItem>, sink: S, sample_rate: u32) -> Self {
        Self {
            queue,
            sink,
            recorder: SessionRecorder::new(sample_rate),
            route: None,
            sent: 0,
        }
    }

    /// Drain the queue until every producer and the controller are gone.
    pub async fn run(mut self) {
        while let Some(item) = self.queue.recv().await {
            self.handle(item);
        }
        debug!(sent = self.sent, "Frame sender stopped");
    }

    fn handle(&mut self, item: CaptureItem) {
        match item {
            CaptureItem::Begin(route) => {
                self.recorder.reset();
                self.route = Some(route);
            }
            CaptureItem::Frame(samples) => {
                let Some(route) = &self.route else {
                    return;
                };
                self.recorder.append(&samples);

                let frame = AudioFrame {
                    sender_id: route.sender_id.clone(),
                    target_id: route.target_id.clone(),
                    room_code: route.room_code,
                    samples,
                };
                // Live audio is best-effort; the recording still has the frame
                match self.sink.send_frame(frame) {
                    Ok(()) => self.sent += 1,
                    Err(e) => debug!(error = %e, "Live frame not sent"),
                }
            }
            CaptureItem::Finish {
                sender_name,
                receiver_name,
                target_id,
                timestamp,
                reply,
            } => {
                self.route = None;
                let result = self.recorder.finish(&sender_name, &receiver_name, &target_id, timestamp);
                let _ = reply.send(result);
            }
        }
    }
}

/// Delivery path: render received frames immediately.
pub struct Player<P: PlaybackSink> {
    sink: P,
    sample_rate: u32,
    frames_played: u64,
}

impl<P: PlaybackSink> Player<P> {
    pub fn new(sink: P, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            frames_played: 0,
        }
    }

    pub fn play(&mut self, frame: &AudioFrame) -> AppResult<()> {
        let samples = pcm16_slice_to_float(&frame.samples);
        self.sink.render(&samples, self.sample_rate)?;
        self.frames_played += 1;
        Ok(())
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }
}

struct ActiveTalk {
    route: Route,
    started_at: i64,
    _guard: CaptureGuard,
}

/// Owns the microphone for the duration of each talk session.
pub struct TalkController {
    device: Box<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    queue: mpsc::Sender<CaptureItem>,
    frame_samples: usize,
    dropped: Arc<AtomicU64>,
    active: Option<ActiveTalk>,
}

/// Build a controller and its consumer. Spawn `FrameSender::run` on the runtime.
pub fn talk_pipeline<S: FrameSink>(
    config: &AudioConfig,
    device: Box<dyn CaptureDevice>,
    sink: S,
) -> (TalkController, FrameSender<S>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let controller = TalkController {
        device,
        constraints: CaptureConstraints::from_config(config),
        queue: tx,
        frame_samples: config.frame_samples,
        dropped: Arc::new(AtomicU64::new(0)),
        active: None,
    };
    (controller, FrameSender::new(rx, sink, config.sample_rate))
}

impl TalkController {
    pub fn is_talking(&self) -> bool {
        self.active.is_some()
    }

    pub fn target(&self) -> Option<&ParticipantId> {
        self.active.as_ref().map(|a| &a.route.target_id)
    }

    /// Frames dropped because the queue was full.
    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Open the microphone and start a session.
    ///
    /// ## Returns:
    /// The `start-talking` event for the caller to send. If the device
    /// cannot be opened nothing is started and `MicrophoneUnavailable`
    /// is returned.
    pub async fn start(
        &mut self,
        sender_id: &str,
        room_code: RoomCode,
        target_id: &str,
    ) -> AppResult<ClientEvent> {
        if let Some(active) = &self.active {
            return Err(AppError::AlreadyTalking(format!(
                "already talking to {}",
                active.route.target_id
            )));
        }

        let route = Route {
            sender_id: sender_id.to_string(),
            target_id: target_id.to_string(),
            room_code,
        };
        self.queue
            .send(CaptureItem::Begin(route.clone()))
            .await
            .map_err(|_| AppError::Internal("Frame sender is not running".to_string()))?;

        let mut producer = FrameProducer::new(self.queue.clone(), self.frame_samples, self.dropped.clone());
        let guard = self
            .device
            .open(&self.constraints, Box::new(move |samples| producer.push(samples)))?;

        info!(target = %target_id, room = %room_code, "Talk session started");
        self.active = Some(ActiveTalk {
            route,
            started_at: Utc::now().timestamp_millis(),
            _guard: guard,
        });

        Ok(ClientEvent::StartTalking {
            room_code,
            target_id: target_id.to_string(),
        })
    }

    /// Release the microphone and finish the session recording.
    ///
    /// ## Returns:
    /// `None` when no session is active. Otherwise the `stop-talking`
    /// event and the recorded transmission, labelled with the names the
    /// caller resolved from the current roster.
    pub async fn stop(
        &mut self,
        sender_name: &str,
        receiver_name: &str,
    ) -> AppResult<Option<(ClientEvent, Transmission)>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        let ActiveTalk { route, started_at, _guard } = active;
        // Releases the device; no more frames after this
        drop(_guard);

        let (reply, response) = oneshot::channel();
        self.queue
            .send(CaptureItem::Finish {
                sender_name: sender_name.to_string(),
                receiver_name: receiver_name.to_string(),
                target_id: route.target_id.clone(),
                timestamp: started_at,
                reply,
            })
            .await
            .map_err(|_| AppError::Internal("Frame sender is not running".to_string()))?;

        let transmission = response
            .await
            .map_err(|_| AppError::Internal("Frame sender dropped the recording".to_string()))??;

        let dropped = self.frames_dropped();
        if dropped > 0 {
            warn!(dropped, "Capture queue overflowed during session");
        }
        info!(target = %route.target_id, bytes = transmission.payload.len(), "Talk session stopped");

        Ok(Some((
            ClientEvent::StopTalking {
                room_code: route.room_code,
                target_id: Some(route.target_id),
            },
            transmission,
        )))
    }
}
