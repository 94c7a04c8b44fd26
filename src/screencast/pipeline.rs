//! GStreamer pipeline construction and management

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::context::{EncoderContext, EncoderFactory};
use super::encoder::{self, Codec};
use super::stream::StreamWriter;
use crate::buffer::{PixelFormat, ScratchBuffer};
use crate::config::{Container, RecordingConfig};

/// Creates GStreamer-backed encoder contexts
#[derive(Debug, Default, Clone, Copy)]
pub struct GstEncoderFactory;

impl EncoderFactory for GstEncoderFactory {
    fn create_context(
        &self,
        config: &RecordingConfig,
        output: StreamWriter,
    ) -> Result<Box<dyn EncoderContext>> {
        Ok(Box::new(Pipeline::new(config, output)?))
    }
}

fn video_format(format: PixelFormat) -> gst_video::VideoFormat {
    match format {
        PixelFormat::Rgba8 => gst_video::VideoFormat::Rgba,
        PixelFormat::Bgra8 => gst_video::VideoFormat::Bgra,
        PixelFormat::Abgr8 => gst_video::VideoFormat::Abgr,
        PixelFormat::Argb8 => gst_video::VideoFormat::Argb,
    }
}

fn parser_element(codec: Codec) -> Option<&'static str> {
    match codec {
        Codec::H264 => Some("h264parse"),
        Codec::H265 => Some("h265parse"),
        Codec::VP8 | Codec::VP9 | Codec::AV1 => None,
    }
}

fn make(element: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(element)
        .build()
        .with_context(|| format!("Failed to create {} element", element))
}

fn seconds(value: f64) -> gst::ClockTime {
    gst::ClockTime::from_nseconds((value.max(0.0) * 1_000_000_000.0) as u64)
}

struct VideoBranch {
    appsrc: gst_app::AppSrc,
    format: PixelFormat,
    frame_duration: gst::ClockTime,
}

struct AudioBranch {
    appsrc: gst_app::AppSrc,
    sample_rate: u32,
    channels: u32,
    /// Sample frames pushed so far, drives audio timestamps
    frames_pushed: AtomicU64,
}

/// Encoding pipeline muxing raw video and audio into the output stream
///
/// `appsrc ! videoconvert ! <video enc> ! <mux>` and
/// `appsrc ! audioconvert ! audioresample ! <audio enc> ! <mux>`, with the
/// muxer feeding an `appsink` whose buffers are written to the stream.
pub struct Pipeline {
    pipeline: gst::Pipeline,
    video: Option<VideoBranch>,
    audio: Option<AudioBranch>,
    finished: AtomicBool,
}

impl Pipeline {
    /// Create and start an encoding pipeline for `config`
    pub fn new(config: &RecordingConfig, output: StreamWriter) -> Result<Self> {
        gst::init().context("Failed to initialize GStreamer")?;

        let pipeline = gst::Pipeline::new();

        let muxer = make(config.container.muxer_element())?;
        configure_muxer(&muxer, config.container);

        let appsink = gst_app::AppSink::builder()
            .name("container-sink")
            .sync(false)
            .build();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    output.write(map.as_slice()).map_err(|e| {
                        log::error!("Failed to write muxed data: {}", e);
                        gst::FlowError::Error
                    })?;
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.add_many([&muxer, appsink.upcast_ref()])?;
        muxer.link(&appsink)?;

        let video = if config.capture_video {
            Some(build_video_branch(&pipeline, &muxer, config)?)
        } else {
            None
        };
        let audio = if config.capture_audio {
            Some(build_audio_branch(&pipeline, &muxer, config)?)
        } else {
            None
        };

        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start pipeline")?;

        Ok(Self {
            pipeline,
            video,
            audio,
            finished: AtomicBool::new(false),
        })
    }

    /// Send EOS and wait for the muxer to flush (up to 30 seconds)
    fn drain(&self) -> Result<()> {
        for appsrc in self
            .video
            .iter()
            .map(|v| &v.appsrc)
            .chain(self.audio.iter().map(|a| &a.appsrc))
        {
            appsrc
                .end_of_stream()
                .map_err(|e| anyhow::anyhow!("Failed to send EOS: {:?}", e))?;
        }

        let bus = self.pipeline.bus().context("Pipeline has no bus")?;
        let mut eos_received = false;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
            use gst::MessageView;
            match msg.view() {
                MessageView::Eos(..) => {
                    log::debug!("EOS received, finalizing...");
                    eos_received = true;
                    break;
                }
                MessageView::Error(err) => {
                    return Err(anyhow::anyhow!(
                        "Pipeline error: {} ({})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    ));
                }
                _ => {}
            }
        }

        if !eos_received {
            log::warn!("EOS timeout reached, forcing pipeline shutdown");
        }
        Ok(())
    }
}

fn configure_muxer(muxer: &gst::Element, container: Container) {
    match container {
        // The sink cannot seek back to rewrite headers
        Container::Webm | Container::Mkv => {
            if muxer.find_property("streamable").is_some() {
                muxer.set_property("streamable", true);
            }
        }
        Container::Mp4 => {
            if muxer.find_property("fragment-duration").is_some() {
                muxer.set_property("fragment-duration", 1000u32);
            }
        }
    }
}

fn build_video_branch(
    pipeline: &gst::Pipeline,
    muxer: &gst::Element,
    config: &RecordingConfig,
) -> Result<VideoBranch> {
    let encoder_info = encoder::select_encoder(config.container, config.video_encoder.as_deref())?;
    log::info!(
        "Using video encoder: {} ({})",
        encoder_info.display_name(),
        encoder_info.codec.name()
    );

    let caps = gst_video::VideoInfo::builder(
        video_format(config.video_pixel_format),
        config.video_width,
        config.video_height,
    )
    .fps(gst::Fraction::new(config.video_target_framerate as i32, 1))
    .build()
    .context("Invalid video format")?
    .to_caps()
    .context("Failed to build video caps")?;

    let appsrc = gst_app::AppSrc::builder()
        .name("video-source")
        .is_live(true)
        .format(gst::Format::Time)
        .caps(&caps)
        .build();

    let videoconvert = make("videoconvert")?;
    let encoder_elem = make(&encoder_info.gst_element)?;
    encoder::apply_bitrate(&encoder_elem, encoder_info.bitrate, config.video_target_bitrate);
    if encoder_elem.find_property("deadline").is_some() {
        // libvpx realtime mode
        encoder_elem.set_property_from_str("deadline", "1");
    }

    let mut chain = vec![appsrc.clone().upcast::<gst::Element>(), videoconvert, encoder_elem];
    if let Some(parser) = parser_element(encoder_info.codec) {
        chain.push(make(parser)?);
    }

    pipeline.add_many(chain.iter())?;
    gst::Element::link_many(chain.iter().chain(std::iter::once(muxer)))?;

    Ok(VideoBranch {
        appsrc,
        format: config.video_pixel_format,
        frame_duration: gst::ClockTime::from_nseconds(
            1_000_000_000 / config.video_target_framerate.max(1) as u64,
        ),
    })
}

fn build_audio_branch(
    pipeline: &gst::Pipeline,
    muxer: &gst::Element,
    config: &RecordingConfig,
) -> Result<AudioBranch> {
    let encoder_info = encoder::select_audio_encoder(config.container)?;
    log::info!(
        "Using audio encoder: {} ({})",
        encoder_info.name,
        encoder_info.codec.name()
    );

    let caps = gst::Caps::builder("audio/x-raw")
        .field("format", "F32LE")
        .field("layout", "interleaved")
        .field("rate", config.audio_sample_rate as i32)
        .field("channels", config.audio_num_channels as i32)
        .build();

    let appsrc = gst_app::AppSrc::builder()
        .name("audio-source")
        .is_live(true)
        .format(gst::Format::Time)
        .caps(&caps)
        .build();

    let audioconvert = make("audioconvert")?;
    let audioresample = make("audioresample")?;
    let encoder_elem = make(&encoder_info.gst_element)?;
    encoder::apply_bitrate(&encoder_elem, encoder_info.bitrate, config.audio_target_bitrate);

    let chain = [
        appsrc.clone().upcast::<gst::Element>(),
        audioconvert,
        audioresample,
        encoder_elem,
    ];
    pipeline.add_many(chain.iter())?;
    gst::Element::link_many(chain.iter().chain(std::iter::once(muxer)))?;

    Ok(AudioBranch {
        appsrc,
        sample_rate: config.audio_sample_rate,
        channels: config.audio_num_channels,
        frames_pushed: AtomicU64::new(0),
    })
}

impl EncoderContext for Pipeline {
    fn add_video_frame(&self, frame: &ScratchBuffer, timestamp: f64) -> Result<()> {
        anyhow::ensure!(!self.finished.load(Ordering::Acquire), "Pipeline is finished");
        let video = self.video.as_ref().context("Video capture is disabled")?;
        anyhow::ensure!(
            frame.format() == video.format,
            "Staged frame is {:?}, pipeline expects {:?}",
            frame.format(),
            video.format
        );

        let mut buffer = gst::Buffer::with_size(frame.len())
            .context("Failed to allocate GStreamer buffer")?;
        {
            let buffer_mut = buffer.get_mut().context("GStreamer buffer is shared")?;
            buffer_mut.set_pts(seconds(timestamp));
            buffer_mut.set_duration(video.frame_duration);
            let mut map = buffer_mut
                .map_writable()
                .context("Failed to map buffer for writing")?;
            map.copy_from_slice(frame.pixels());
        }

        video
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| anyhow::anyhow!("Failed to push video buffer: {:?}", e))?;
        Ok(())
    }

    fn add_audio_frame(&self, samples: &[f32]) -> Result<()> {
        anyhow::ensure!(!self.finished.load(Ordering::Acquire), "Pipeline is finished");
        let audio = self.audio.as_ref().context("Audio capture is disabled")?;
        if samples.is_empty() {
            return Ok(());
        }

        let frames = (samples.len() / audio.channels as usize) as u64;
        let start = audio.frames_pushed.fetch_add(frames, Ordering::Relaxed);
        let rate = audio.sample_rate as f64;

        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let mut buffer = gst::Buffer::from_mut_slice(bytes);
        {
            let buffer_mut = buffer.get_mut().context("GStreamer buffer is shared")?;
            buffer_mut.set_pts(seconds(start as f64 / rate));
            buffer_mut.set_duration(seconds(frames as f64 / rate));
        }

        audio
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| anyhow::anyhow!("Failed to push audio buffer: {:?}", e))?;
        Ok(())
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        log::info!("Finishing encoder pipeline...");
        if let Err(e) = self.drain() {
            log::error!("Failed to drain pipeline: {:#}", e);
        }
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::error!("Failed to stop pipeline: {}", e);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            if let Err(e) = self.pipeline.set_state(gst::State::Null) {
                log::error!("Failed to stop pipeline: {}", e);
            }
        }
    }
}
