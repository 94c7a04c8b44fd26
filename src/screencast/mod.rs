//! Frame and audio recording
//!
//! A [`RecordingSession`] samples frames from a [`RenderHost`] render
//! timeline, stages them into a reusable scratch buffer and hands them to an
//! encoder on a deferred dispatch, away from the render path. Audio blocks are
//! forwarded directly from the host's audio thread through an [`AudioInput`].
//! Encoding is done by a GStreamer pipeline writing into an [`OutputStream`].

mod context;
mod dispatch;
pub mod encoder;
mod host;
mod pacing;
mod pipeline;
mod session;
mod stager;
mod stream;
pub mod synthetic;
#[cfg(test)]
mod testing;

pub use context::{AudioRoute, EncoderContext, EncoderFactory, EncoderHandle, SharedScratch};
pub use dispatch::{
    DeferredCallRegistry, DispatchToken, GuardedRegistry, SignalSource, WorkerSignal,
};
pub use encoder::{Codec, EncoderInfo, detect_encoders, select_encoder};
pub use host::{AudioSource, CopyPass, FrameView, RenderHost};
pub use pacing::{FrameRateMode, PacingPolicy};
pub use pipeline::{GstEncoderFactory, Pipeline};
pub use session::{AudioInput, RecordingSession};
pub use stager::FrameStager;
pub use stream::{FileStream, OutputStream, StreamSink, StreamWriter, output_file_name};
