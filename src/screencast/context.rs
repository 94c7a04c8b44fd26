//! Encoder context ownership and guarded teardown

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::dispatch::{DeferredCallRegistry, DispatchToken};
use super::stream::{OutputStream, StreamWriter};
use crate::buffer::ScratchBuffer;
use crate::config::RecordingConfig;
use crate::error::{RecorderError, RecorderResult};

/// Scratch buffer shared by the render timeline and encode dispatches
pub type SharedScratch = Arc<Mutex<ScratchBuffer>>;

/// An active encode + mux session writing to one output stream
///
/// Implementations are driven from three threads: the render timeline never
/// calls them directly, dispatches call [`add_video_frame`], the audio
/// callback calls [`add_audio_frame`].
///
/// [`add_video_frame`]: EncoderContext::add_video_frame
/// [`add_audio_frame`]: EncoderContext::add_audio_frame
pub trait EncoderContext: Send + Sync {
    /// Encode one staged frame, `timestamp` in seconds
    fn add_video_frame(&self, frame: &ScratchBuffer, timestamp: f64) -> Result<()>;

    /// Encode a block of interleaved samples
    fn add_audio_frame(&self, samples: &[f32]) -> Result<()>;

    /// Flush pending output and release native resources. Must not fail.
    fn finish(&self);
}

/// Creates encoder contexts for a codec/muxer backend
pub trait EncoderFactory: Send + Sync {
    fn create_context(
        &self,
        config: &RecordingConfig,
        output: StreamWriter,
    ) -> Result<Box<dyn EncoderContext>>;
}

struct AudioTarget {
    context: Arc<dyn EncoderContext>,
    channels: u32,
}

enum AudioState {
    Closed,
    Disabled,
    Open(AudioTarget),
}

/// Route from the audio callback to the current encoder context
pub struct AudioRoute {
    state: RwLock<AudioState>,
}

impl Default for AudioRoute {
    fn default() -> Self {
        Self {
            state: RwLock::new(AudioState::Closed),
        }
    }
}

impl AudioRoute {
    /// Hand a block to the encoder if it matches the configured channel count
    pub fn push(&self, samples: &[f32], channels: u32) -> RecorderResult<()> {
        let state = self.state.read();
        let target = match &*state {
            AudioState::Open(target) => target,
            AudioState::Disabled => return Err(RecorderError::CaptureDisabled("Audio")),
            AudioState::Closed => return Err(RecorderError::NotRecording),
        };

        if channels != target.channels {
            log::error!(
                "Audio channels mismatch: configured for {}, got {}",
                target.channels,
                channels
            );
            return Err(RecorderError::AudioChannelMismatch {
                expected: target.channels,
                actual: channels,
            });
        }

        if let Err(e) = target.context.add_audio_frame(samples) {
            log::error!("Failed to encode audio block: {:#}", e);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.read(), AudioState::Open(_))
    }

    fn set(&self, state: AudioState) {
        *self.state.write() = state;
    }
}

/// Owns an encoder context and the stream it writes to
///
/// Dropping the handle performs the guarded teardown: the pending dispatch is
/// erased and the context finished while no dispatch can run, then the stream
/// is closed.
pub struct EncoderHandle {
    context: Option<Arc<dyn EncoderContext>>,
    stream: Option<OutputStream>,
    registry: Arc<DeferredCallRegistry>,
    audio: Arc<AudioRoute>,
}

impl EncoderHandle {
    /// Create a context bound to `stream`
    ///
    /// On failure the stream is discarded before returning.
    pub fn create(
        factory: &dyn EncoderFactory,
        config: &RecordingConfig,
        stream: OutputStream,
        registry: Arc<DeferredCallRegistry>,
        audio: Arc<AudioRoute>,
    ) -> Result<Self> {
        let context: Arc<dyn EncoderContext> =
            match factory.create_context(config, stream.writer()) {
                Ok(context) => Arc::from(context),
                Err(e) => {
                    stream.discard();
                    return Err(e);
                }
            };

        audio.set(if config.capture_audio {
            AudioState::Open(AudioTarget {
                context: context.clone(),
                channels: config.audio_num_channels,
            })
        } else {
            AudioState::Disabled
        });

        Ok(Self {
            context: Some(context),
            stream: Some(stream),
            registry,
            audio,
        })
    }

    /// Register the encode of `scratch` at `timestamp` as the pending dispatch
    ///
    /// Returns immediately; the encode runs when the token is invoked. A
    /// dispatch that has not run yet is replaced.
    pub fn submit_video_frame(
        &self,
        scratch: &SharedScratch,
        timestamp: f64,
    ) -> Option<DispatchToken> {
        let context = self.context.as_ref()?.clone();
        let scratch = scratch.clone();
        Some(self.registry.register(move || {
            let frame = scratch.lock();
            if let Err(e) = context.add_video_frame(&frame, timestamp) {
                log::error!("Failed to encode video frame at {:.3}s: {:#}", timestamp, e);
            }
        }))
    }

    pub fn registry(&self) -> &Arc<DeferredCallRegistry> {
        &self.registry
    }

    /// Tear down and return the number of bytes the stream received
    pub fn destroy(mut self) -> u64 {
        self.teardown()
    }

    fn teardown(&mut self) -> u64 {
        // Audio blocks in flight finish before the route closes
        self.audio.set(AudioState::Closed);

        let context = self.context.take();
        let stream = self.stream.take();
        self.registry.guard(|guarded| {
            if let Some(token) = guarded.erase_pending() {
                log::debug!("Cancelled pending dispatch {} at teardown", token.get());
            }
            if let Some(context) = context {
                context.finish();
            }
            stream.map(OutputStream::destroy).unwrap_or(0)
        })
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        if self.context.is_some() || self.stream.is_some() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;
    use crate::screencast::testing::{ContextEvent, MemorySink, MockFactory};

    fn shared_scratch() -> SharedScratch {
        Arc::new(Mutex::new(
            ScratchBuffer::new(4, 4, PixelFormat::Rgba8).unwrap(),
        ))
    }

    fn handle(factory: &MockFactory, config: &RecordingConfig) -> EncoderHandle {
        EncoderHandle::create(
            factory,
            config,
            OutputStream::from_sink(Box::new(MemorySink::default())),
            Arc::new(DeferredCallRegistry::new()),
            Arc::new(AudioRoute::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_video_frame_encodes_on_invoke() {
        let factory = MockFactory::default();
        let handle = handle(&factory, &RecordingConfig::default());
        let scratch = shared_scratch();

        let token = handle.submit_video_frame(&scratch, 0.5).unwrap();
        assert!(factory.events().is_empty());

        assert!(handle.registry().invoke(token));
        assert_eq!(factory.events(), vec![ContextEvent::Video(0.5)]);
    }

    #[test]
    fn test_previous_dispatch_dropped() {
        let factory = MockFactory::default();
        let handle = handle(&factory, &RecordingConfig::default());
        let scratch = shared_scratch();

        let first = handle.submit_video_frame(&scratch, 0.0).unwrap();
        let second = handle.submit_video_frame(&scratch, 1.0).unwrap();
        assert!(!handle.registry().invoke(first));
        assert!(handle.registry().invoke(second));
        assert_eq!(factory.events(), vec![ContextEvent::Video(1.0)]);
    }

    #[test]
    fn test_teardown_cancels_pending_dispatch() {
        let factory = MockFactory::default();
        let handle = handle(&factory, &RecordingConfig::default());
        let scratch = shared_scratch();
        let registry = handle.registry().clone();

        let token = handle.submit_video_frame(&scratch, 0.0).unwrap();
        handle.destroy();

        // Late signal after teardown touches nothing
        assert!(!registry.invoke(token));
        assert_eq!(factory.events(), vec![ContextEvent::Finish]);
    }

    #[test]
    fn test_audio_channel_mismatch_rejected() {
        let factory = MockFactory::default();
        let config = RecordingConfig {
            audio_num_channels: 2,
            ..Default::default()
        };
        let audio = Arc::new(AudioRoute::default());
        let _handle = EncoderHandle::create(
            &factory,
            &config,
            OutputStream::from_sink(Box::new(MemorySink::default())),
            Arc::new(DeferredCallRegistry::new()),
            audio.clone(),
        )
        .unwrap();

        let err = audio.push(&[0.0; 12], 6).unwrap_err();
        assert!(matches!(
            err,
            RecorderError::AudioChannelMismatch {
                expected: 2,
                actual: 6
            }
        ));
        audio.push(&[0.0; 4], 2).unwrap();
        assert_eq!(factory.events(), vec![ContextEvent::Audio(4)]);
    }

    #[test]
    fn test_audio_route_closed_after_teardown() {
        let factory = MockFactory::default();
        let audio = Arc::new(AudioRoute::default());
        let handle = EncoderHandle::create(
            &factory,
            &RecordingConfig::default(),
            OutputStream::from_sink(Box::new(MemorySink::default())),
            Arc::new(DeferredCallRegistry::new()),
            audio.clone(),
        )
        .unwrap();
        assert!(audio.is_open());

        handle.destroy();
        assert!(!audio.is_open());
        assert!(matches!(
            audio.push(&[0.0; 2], 2),
            Err(RecorderError::NotRecording)
        ));
    }

    #[test]
    fn test_create_failure_discards_stream() {
        let factory = MockFactory::failing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.webm");
        let stream = OutputStream::create_file(&path).unwrap();

        let result = EncoderHandle::create(
            &factory,
            &RecordingConfig::default(),
            stream,
            Arc::new(DeferredCallRegistry::new()),
            Arc::new(AudioRoute::default()),
        );
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
