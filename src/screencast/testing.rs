//! Recording mocks shared by the unit tests

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::context::{EncoderContext, EncoderFactory};
use super::dispatch::{DeferredCallRegistry, DispatchToken, SignalSource};
use super::host::{AudioSource, CopyPass, FrameView, RenderHost};
use super::stream::{StreamSink, StreamWriter};
use crate::buffer::{PixelFormat, ScratchBuffer};
use crate::config::RecordingConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Video(f64),
    /// Number of samples in the block
    Audio(usize),
    Finish,
}

/// Factory producing [`MockContext`]s that share one event log
#[derive(Default)]
pub struct MockFactory {
    events: Arc<Mutex<Vec<ContextEvent>>>,
    configs: Mutex<Vec<RecordingConfig>>,
    /// Refuse to create contexts once this many exist
    limit: Option<usize>,
}

impl MockFactory {
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    pub fn failing_after(contexts: usize) -> Self {
        Self {
            limit: Some(contexts),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<ContextEvent> {
        self.events.lock().clone()
    }

    pub fn video_timestamps(&self) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ContextEvent::Video(ts) => Some(*ts),
                _ => None,
            })
            .collect()
    }

    /// Configurations of every context created so far
    pub fn configs(&self) -> Vec<RecordingConfig> {
        self.configs.lock().clone()
    }
}

impl EncoderFactory for MockFactory {
    fn create_context(
        &self,
        config: &RecordingConfig,
        output: StreamWriter,
    ) -> Result<Box<dyn EncoderContext>> {
        let mut configs = self.configs.lock();
        if let Some(limit) = self.limit {
            anyhow::ensure!(configs.len() < limit, "mock encoder unavailable");
        }
        configs.push(config.clone());
        Ok(Box::new(MockContext {
            events: self.events.clone(),
            output,
            finished: AtomicBool::new(false),
        }))
    }
}

/// Writes a few marker bytes per call so recordings are non-empty
pub struct MockContext {
    events: Arc<Mutex<Vec<ContextEvent>>>,
    output: StreamWriter,
    finished: AtomicBool,
}

impl MockContext {
    fn assert_live(&self) {
        assert!(
            !self.finished.load(Ordering::SeqCst),
            "encoder context used after finish"
        );
    }
}

impl EncoderContext for MockContext {
    fn add_video_frame(&self, frame: &ScratchBuffer, timestamp: f64) -> Result<()> {
        self.assert_live();
        self.output.write(b"V")?;
        self.output.write(&frame.pixels()[..4])?;
        self.events.lock().push(ContextEvent::Video(timestamp));
        Ok(())
    }

    fn add_audio_frame(&self, samples: &[f32]) -> Result<()> {
        self.assert_live();
        self.output.write(b"A")?;
        self.events.lock().push(ContextEvent::Audio(samples.len()));
        Ok(())
    }

    fn finish(&self) {
        self.assert_live();
        self.finished.store(true, Ordering::SeqCst);
        self.events.lock().push(ContextEvent::Finish);
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub data: Vec<u8>,
}

impl StreamSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Signal source that fires only when the test says so
#[derive(Default)]
pub struct ManualSignal {
    issued: Mutex<Vec<(DispatchToken, Arc<DeferredCallRegistry>)>>,
}

impl ManualSignal {
    pub fn issued(&self) -> Vec<DispatchToken> {
        self.issued.lock().iter().map(|(token, _)| *token).collect()
    }

    /// Fire every issued signal in order, returning how many dispatches ran
    pub fn fire_all(&self) -> usize {
        let issued: Vec<_> = self.issued.lock().drain(..).collect();
        issued
            .into_iter()
            .filter(|(token, registry)| registry.invoke(*token))
            .count()
    }
}

impl SignalSource for ManualSignal {
    fn issue(&self, token: DispatchToken, registry: &Arc<DeferredCallRegistry>) {
        self.issued.lock().push((token, registry.clone()));
    }
}

/// What the session did to a [`FakeHost`]
#[derive(Debug, Default, Clone)]
pub struct HostLog {
    pub installs: usize,
    pub removes: usize,
    pub installed: Option<CopyPass>,
}

/// In-memory render host
pub struct FakeHost {
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
    data: Vec<u8>,
    fail_install: bool,
    log: Arc<Mutex<HostLog>>,
}

impl FakeHost {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * PixelFormat::BYTES_PER_PIXEL;
        Self {
            width,
            height,
            format,
            stride,
            data: vec![0; stride * height as usize],
            fail_install: false,
            log: Arc::default(),
        }
    }

    /// Add `padding` bytes to the end of every row
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.stride += padding;
        self.data = vec![0; self.stride * self.height as usize];
        self
    }

    pub fn failing_install(mut self) -> Self {
        self.set_failing_install(true);
        self
    }

    pub fn set_failing_install(&mut self, fail: bool) {
        self.fail_install = fail;
    }

    pub fn log(&self) -> Arc<Mutex<HostLog>> {
        self.log.clone()
    }

    /// Set every pixel to `f(x, y)`, given in the host's own format
    pub fn fill(&mut self, f: impl Fn(u32, u32) -> [u8; 4]) {
        for y in 0..self.height {
            for x in 0..self.width {
                let at = y as usize * self.stride + x as usize * PixelFormat::BYTES_PER_PIXEL;
                self.data[at..at + 4].copy_from_slice(&f(x, y));
            }
        }
    }
}

impl RenderHost for FakeHost {
    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn install_copy_pass(&mut self, pass: CopyPass) -> Result<()> {
        anyhow::ensure!(!self.fail_install, "mock host refused copy pass");
        let mut log = self.log.lock();
        log.installs += 1;
        log.installed = Some(pass);
        Ok(())
    }

    fn remove_copy_pass(&mut self) {
        let mut log = self.log.lock();
        log.removes += 1;
        log.installed = None;
    }

    fn current_frame(&self) -> Result<FrameView<'_>> {
        Ok(FrameView {
            width: self.width,
            height: self.height,
            format: self.format,
            stride: self.stride,
            data: &self.data,
        })
    }
}

pub struct FixedAudio {
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioSource for FixedAudio {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }
}
