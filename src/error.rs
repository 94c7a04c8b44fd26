use thiserror::Error;

/// Errors surfaced by [`crate::screencast::RecordingSession`]
#[derive(Error, Debug)]
pub enum RecorderError {
    /// `begin_recording` while a recording is active. Nothing changed.
    #[error("Already recording")]
    AlreadyRecording,

    /// `end_recording` (or an ingest call) while idle. Nothing changed.
    #[error("Not recording")]
    NotRecording,

    /// The session configuration cannot drive a recording
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Scratch buffer, stream or encoder context creation failed. Partial
    /// allocations were released and the session is idle.
    #[error("Failed to set up recording: {0:#}")]
    Setup(#[source] anyhow::Error),

    /// A delivered audio block does not match the configured channel count.
    /// The block was dropped and recording continues.
    #[error("Audio channel mismatch: configured for {expected}, got {actual}")]
    AudioChannelMismatch { expected: u32, actual: u32 },

    /// The requested capture kind is disabled for this session
    #[error("{0} capture is disabled")]
    CaptureDisabled(&'static str),
}

pub type RecorderResult<T> = Result<T, RecorderError>;
