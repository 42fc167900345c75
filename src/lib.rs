#![deny(clippy::all)]

// Sound bearing: real-time direction of arrival from two audio channels
//
// raw samples -> FrameBuffer -> StereoProvider -> CorrelationEngine
//             -> AngleEstimator -> DirectionPublisher -> sinks
//
// A sound classifier can consume the same `CapturedFrame` windows in
// parallel; records carry the window sequence number for joining.

pub mod angle;
pub mod audio_config;
pub mod correlation;
pub mod error;
pub mod frame_buffer;
pub mod level;
pub mod microphone;
pub mod pipeline;
pub mod publisher;
pub mod resampler;
pub mod stereo;
pub mod window;

pub use angle::{AngleEstimator, DirectionEstimate, Sector, Validity, DIRECTLY_AHEAD_DEGREES};
pub use audio_config::DirectionConfig;
pub use correlation::{CorrelationEngine, CorrelationMethod, CorrelationResult};
pub use error::{DirectionError, Result};
pub use frame_buffer::FrameBuffer;
pub use level::WindowLevel;
pub use microphone::{list_input_devices, MicrophoneStream};
pub use pipeline::{DirectionEstimator, DirectionPipeline, LatestSlot, PipelineStatsSnapshot, SlotTake};
pub use publisher::{CallbackSink, ChannelSink, DirectionPublisher, DirectionRecord, DirectionSink};
pub use stereo::{Provenance, StereoPair, StereoProvider};
pub use window::{AudioWindow, CapturedFrame};
