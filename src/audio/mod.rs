//! # Audio Module
//!
//! Sample conversion, the client capture/playback pipeline and session
//! recording.
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM on the wire, normalized `f32` at the devices
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//! - **Frame**: 1024 samples (64ms)

pub mod codec;      // PCM16 <-> float and the WAV container
pub mod pipeline;   // Capture, live send, playback and the talk controller
pub mod recorder;   // Whole-session recording for the archive

pub use pipeline::{
    talk_pipeline, CaptureConstraints, CaptureDevice, CaptureGuard, FrameProducer, FrameSender, FrameSink,
    PlaybackSink, Player, TalkController,
};
pub use recorder::SessionRecorder;
