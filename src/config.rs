//! Recorder settings persistence and per-session recording configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::buffer::PixelFormat;
use crate::screencast::FrameRateMode;

/// Video container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Container {
    #[default]
    Webm,
    Mp4,
    Mkv,
}

impl Container {
    /// Get file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Mkv => "mkv",
        }
    }

    /// Get GStreamer muxer element name
    pub fn muxer_element(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4mux",
            Container::Webm => "webmmux",
            Container::Mkv => "matroskamux",
        }
    }
}

/// Recorder settings persisted between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Record rendered frames
    pub capture_video: bool,
    /// Record delivered audio blocks
    pub capture_audio: bool,
    /// Output container format
    pub container: Container,
    /// Video encoder element to use (None = auto-detect hardware encoder)
    pub video_encoder: Option<String>,
    /// Target video bitrate in bits per second
    pub video_bitrate: u32,
    /// Target audio bitrate in bits per second
    pub audio_bitrate: u32,
    /// Target frame rate, also the synthetic rate in constant pacing mode
    pub frame_rate: u32,
    /// How presentation timestamps are derived
    pub frame_rate_mode: FrameRateMode,
    /// Capture only frames whose index is a multiple of this
    pub capture_every_nth_frame: u32,
    /// Directory recordings are written to (None = user video directory)
    pub output_dir: Option<PathBuf>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            capture_video: true,
            capture_audio: true,
            container: Container::Webm,
            video_encoder: None, // Auto-detect
            video_bitrate: 8_192_000,
            audio_bitrate: 64_000,
            frame_rate: 30,
            // Constant pacing plays back at exactly frame_rate
            frame_rate_mode: FrameRateMode::Constant,
            capture_every_nth_frame: 1,
            output_dir: None,
        }
    }
}

impl RecorderSettings {
    /// Default settings file location
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("framerec").join("settings.json"))
    }

    /// Load settings from the default location, or return defaults if unavailable
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            log::warn!("No config directory available, using default settings");
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("Error loading settings, using defaults: {:?}", err);
                Self::default()
            }
        }
    }

    /// Save settings to the default location
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else {
            log::error!("No config directory available, settings not saved");
            return;
        };
        if let Err(err) = self.save_to(&path) {
            log::error!("Failed to save settings: {:?}", err);
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    /// Directory new recordings go to
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::video_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Immutable configuration of one recording session
///
/// Built by value when a recording begins and handed to the encoder factory.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingConfig {
    pub capture_video: bool,
    pub capture_audio: bool,
    pub container: Container,
    pub video_encoder: Option<String>,
    pub video_width: u32,
    pub video_height: u32,
    /// Layout of the staged pixels handed to the encoder
    pub video_pixel_format: PixelFormat,
    pub video_target_framerate: u32,
    pub video_target_bitrate: u32,
    pub audio_target_bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_num_channels: u32,
    pub capture_every_nth_frame: u32,
    pub frame_rate_mode: FrameRateMode,
}

impl Default for RecordingConfig {
    /// Defaults for a 1080p stereo recording; dimensions and audio format are
    /// normally overwritten from the frame and audio sources.
    fn default() -> Self {
        Self {
            capture_video: true,
            capture_audio: true,
            container: Container::Webm,
            video_encoder: None,
            video_width: 1920,
            video_height: 1080,
            video_pixel_format: PixelFormat::Rgba8,
            video_target_framerate: 30,
            video_target_bitrate: 8_192_000,
            audio_target_bitrate: 64_000,
            audio_sample_rate: 48_000,
            audio_num_channels: 2,
            capture_every_nth_frame: 1,
            frame_rate_mode: FrameRateMode::Constant,
        }
    }
}

impl RecordingConfig {
    /// Combine persisted settings with the current frame and audio formats
    pub fn from_settings(
        settings: &RecorderSettings,
        (video_width, video_height): (u32, u32),
        audio_sample_rate: u32,
        audio_num_channels: u32,
    ) -> Self {
        Self {
            capture_video: settings.capture_video,
            capture_audio: settings.capture_audio,
            container: settings.container,
            video_encoder: settings.video_encoder.clone(),
            video_width,
            video_height,
            video_pixel_format: PixelFormat::Rgba8,
            video_target_framerate: settings.frame_rate,
            video_target_bitrate: settings.video_bitrate,
            audio_target_bitrate: settings.audio_bitrate,
            audio_sample_rate,
            audio_num_channels,
            capture_every_nth_frame: settings.capture_every_nth_frame,
            frame_rate_mode: settings.frame_rate_mode,
        }
    }

    /// Check the configuration can drive a session
    pub fn validate(&self) -> Result<(), String> {
        if !self.capture_video && !self.capture_audio {
            return Err("neither video nor audio capture is enabled".to_string());
        }
        if self.video_target_framerate == 0 {
            return Err("frame rate must be non-zero".to_string());
        }
        if self.capture_every_nth_frame == 0 {
            return Err("capture_every_nth_frame must be at least 1".to_string());
        }
        if self.capture_video && (self.video_width == 0 || self.video_height == 0) {
            return Err(format!(
                "invalid video size {}x{}",
                self.video_width, self.video_height
            ));
        }
        if self.capture_audio && (self.audio_sample_rate == 0 || self.audio_num_channels == 0) {
            return Err(format!(
                "invalid audio format: {} Hz, {} channels",
                self.audio_sample_rate, self.audio_num_channels
            ));
        }
        Ok(())
    }
}
