//! Recording session state machine

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::context::{AudioRoute, EncoderFactory, EncoderHandle, SharedScratch};
use super::dispatch::{DeferredCallRegistry, DispatchToken, SignalSource};
use super::host::{AudioSource, RenderHost};
use super::pacing::PacingPolicy;
use super::stager::FrameStager;
use super::stream::OutputStream;
use crate::buffer::{PixelFormat, ScratchBuffer};
use crate::config::{RecorderSettings, RecordingConfig};
use crate::error::{RecorderError, RecorderResult};

/// Log progress every this many submitted frames
const PROGRESS_INTERVAL: u64 = 60;

struct ActiveRecording {
    config: RecordingConfig,
    encoder: EncoderHandle,
    /// None when video capture is disabled
    stager: Option<FrameStager>,
    pacing: PacingPolicy,
    video_frames: u64,
    last_dispatch: Option<DispatchToken>,
    started_at: Instant,
}

/// A recorder attached to one render host and audio source
///
/// `Idle` until [`begin_recording`](Self::begin_recording) succeeds,
/// `Recording` until [`end_recording`](Self::end_recording).
pub struct RecordingSession<H: RenderHost> {
    settings: RecorderSettings,
    host: H,
    audio_source: Box<dyn AudioSource>,
    factory: Arc<dyn EncoderFactory>,
    signal: Arc<dyn SignalSource>,
    registry: Arc<DeferredCallRegistry>,
    audio: Arc<AudioRoute>,
    /// Kept across recordings and reused while the frame size is unchanged
    scratch: Option<SharedScratch>,
    active: Option<ActiveRecording>,
    output_path: Option<PathBuf>,
}

impl<H: RenderHost> RecordingSession<H> {
    pub fn new(
        settings: RecorderSettings,
        host: H,
        audio_source: Box<dyn AudioSource>,
        factory: Arc<dyn EncoderFactory>,
        signal: Arc<dyn SignalSource>,
    ) -> Self {
        Self {
            settings,
            host,
            audio_source,
            factory,
            signal,
            registry: Arc::new(DeferredCallRegistry::new()),
            audio: Arc::new(AudioRoute::default()),
            scratch: None,
            active: None,
            output_path: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// The render host, e.g. to drive its frame loop
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Settings used by the next recording; the active one is unaffected
    pub fn set_settings(&mut self, settings: RecorderSettings) {
        self.settings = settings;
    }

    /// Configuration of the active recording
    pub fn config(&self) -> Option<&RecordingConfig> {
        self.active.as_ref().map(|active| &active.config)
    }

    /// Output file of the active or most recent recording
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Video frames submitted since the recording began
    pub fn video_frame_count(&self) -> u64 {
        self.active.as_ref().map_or(0, |active| active.video_frames)
    }

    /// Token of the most recently submitted frame
    pub fn last_dispatch(&self) -> Option<DispatchToken> {
        self.active.as_ref().and_then(|active| active.last_dispatch)
    }

    /// Handle for the audio callback thread
    pub fn audio_input(&self) -> AudioInput {
        AudioInput {
            route: self.audio.clone(),
        }
    }

    /// Start recording
    ///
    /// Fails with [`RecorderError::AlreadyRecording`] without side effects
    /// when a recording is active. On setup failure everything created so far
    /// is released and the session stays idle.
    pub fn begin_recording(&mut self) -> RecorderResult<()> {
        if self.active.is_some() {
            log::warn!("begin_recording called while already recording");
            return Err(RecorderError::AlreadyRecording);
        }

        let config = RecordingConfig::from_settings(
            &self.settings,
            self.host.frame_size(),
            self.audio_source.sample_rate(),
            self.audio_source.channels(),
        );
        config.validate().map_err(RecorderError::InvalidConfig)?;

        let stager = if config.capture_video {
            let scratch = self
                .scratch_buffer(config.video_width, config.video_height, config.video_pixel_format)
                .map_err(RecorderError::Setup)?;
            Some(FrameStager::for_buffer(&scratch.lock()))
        } else {
            None
        };

        let output = OutputStream::create_in(&self.settings.resolved_output_dir(), config.container)
            .map_err(RecorderError::Setup)?;
        let path = output.path().map(Path::to_path_buf).unwrap_or_default();

        let encoder = EncoderHandle::create(
            self.factory.as_ref(),
            &config,
            output,
            self.registry.clone(),
            self.audio.clone(),
        )
        .map_err(RecorderError::Setup)?;

        if let Some(stager) = &stager {
            if let Err(e) = self.host.install_copy_pass(stager.pass()) {
                encoder.destroy();
                // Created exclusively above, so this never removes an older recording
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    log::warn!("Failed to remove {}: {}", path.display(), remove_err);
                }
                let e = e.context("Failed to install frame copy pass");
                return Err(RecorderError::Setup(e));
            }
        }

        log::info!(
            "Recording started: {} ({}x{} @ {} fps, {:?} pacing, every {} frame(s), \
             video={}, audio={})",
            path.display(),
            config.video_width,
            config.video_height,
            config.video_target_framerate,
            config.frame_rate_mode,
            config.capture_every_nth_frame,
            config.capture_video,
            config.capture_audio
        );

        self.active = Some(ActiveRecording {
            pacing: PacingPolicy::new(config.frame_rate_mode, config.video_target_framerate),
            config,
            encoder,
            stager,
            video_frames: 0,
            last_dispatch: None,
            started_at: Instant::now(),
        });
        self.output_path = Some(path);
        Ok(())
    }

    /// Stop recording
    ///
    /// Fails with [`RecorderError::NotRecording`] without side effects when
    /// idle. The copy pass is removed before the encoder is torn down, so no
    /// frame can be admitted during teardown.
    pub fn end_recording(&mut self) -> RecorderResult<()> {
        let Some(active) = self.active.take() else {
            log::warn!("end_recording called while not recording");
            return Err(RecorderError::NotRecording);
        };

        if active.stager.is_some() {
            self.host.remove_copy_pass();
        }

        let bytes = active.encoder.destroy();
        let elapsed = active.started_at.elapsed();

        log::info!(
            "Recording finished: {} ({} video frames in {:.1}s, {} bytes)",
            self.output_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            active.video_frames,
            elapsed.as_secs_f64(),
            bytes
        );
        Ok(())
    }

    /// Per-frame admission, called by the host once per rendered frame
    ///
    /// Returns whether the frame was staged and submitted.
    pub fn on_frame(&mut self, frame_index: u64) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let Some(stager) = &active.stager else {
            return false;
        };
        if frame_index % active.config.capture_every_nth_frame as u64 != 0 {
            return false;
        }
        let Some(scratch) = &self.scratch else {
            return false;
        };

        // Staging overwrites the pixels the previous dispatch reads. Under the
        // guard that dispatch has either not started (and is erased) or has
        // finished encoding.
        if let Some(previous) = active.last_dispatch {
            let dropped = self.registry.guard(|guarded| guarded.erase(previous));
            if dropped {
                log::debug!(
                    "Frame of dispatch {} dropped, signal did not arrive in time",
                    previous.get()
                );
            }
        }

        if let Err(e) = stager.stage(&self.host, &mut scratch.lock()) {
            log::warn!("Skipping frame {}: {:#}", frame_index, e);
            return false;
        }

        let timestamp = active.pacing.timestamp(active.video_frames);
        let Some(token) = active
            .encoder
            .submit_video_frame(scratch, timestamp)
        else {
            return false;
        };
        self.signal.issue(token, &self.registry);

        active.last_dispatch = Some(token);
        active.video_frames += 1;

        if active.video_frames % PROGRESS_INTERVAL == 0 {
            let elapsed = active.started_at.elapsed().as_secs_f64();
            log::info!(
                "Recording: {} frames captured ({:.1} fps)",
                active.video_frames,
                active.video_frames as f64 / elapsed.max(f64::EPSILON)
            );
        }
        true
    }

    /// Audio ingestion from the render thread's side; see [`AudioInput::push`]
    pub fn on_audio(&self, samples: &[f32], channels: u32) -> RecorderResult<()> {
        self.audio.push(samples, channels)
    }

    /// The retained scratch buffer, reallocated if the frame size changed
    fn scratch_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> anyhow::Result<SharedScratch> {
        if let Some(scratch) = &self.scratch {
            if scratch.lock().matches(width, height, format) {
                return Ok(scratch.clone());
            }
            log::debug!("Frame size changed to {}x{}, reallocating scratch buffer", width, height);
        }

        let scratch = Arc::new(Mutex::new(ScratchBuffer::new(width, height, format)?));
        self.scratch = Some(scratch.clone());
        Ok(scratch)
    }
}

impl<H: RenderHost> Drop for RecordingSession<H> {
    fn drop(&mut self) {
        if self.active.is_some() {
            log::warn!("Recording session dropped while recording, stopping");
            let _ = self.end_recording();
        }
    }
}

/// Audio ingestion handle, usable from the audio callback thread
#[derive(Clone)]
pub struct AudioInput {
    route: Arc<AudioRoute>,
}

impl AudioInput {
    /// Hand a block of interleaved samples to the active recording
    ///
    /// A block whose channel count differs from the recording's is dropped
    /// with [`RecorderError::AudioChannelMismatch`]; recording continues.
    pub fn push(&self, samples: &[f32], channels: u32) -> RecorderResult<()> {
        self.route.push(samples, channels)
    }
}
