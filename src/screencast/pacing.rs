//! Presentation timestamp derivation

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// How submitted video frames are timestamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameRateMode {
    /// Wall-clock time since the recording started
    Variable,
    /// `frame_count / frame_rate`, independent of render throughput
    #[default]
    Constant,
}

/// Computes the timestamp, in seconds, of the next submitted frame
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    mode: FrameRateMode,
    frame_rate: u32,
    origin: Instant,
}

impl PacingPolicy {
    /// Start a policy whose variable-mode clock begins now
    pub fn new(mode: FrameRateMode, frame_rate: u32) -> Self {
        Self::with_origin(mode, frame_rate, Instant::now())
    }

    pub fn with_origin(mode: FrameRateMode, frame_rate: u32, origin: Instant) -> Self {
        Self {
            mode,
            frame_rate: frame_rate.max(1),
            origin,
        }
    }

    /// Timestamp for the frame submitted after `frame_count` earlier frames
    pub fn timestamp(&self, frame_count: u64) -> f64 {
        match self.mode {
            FrameRateMode::Variable => self.origin.elapsed().as_secs_f64(),
            FrameRateMode::Constant => frame_count as f64 / self.frame_rate as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_constant_mode_has_no_drift() {
        let pacing = PacingPolicy::new(FrameRateMode::Constant, 30);
        for k in 0..10_000u64 {
            assert_eq!(pacing.timestamp(k), k as f64 / 30.0);
        }
        assert_eq!(pacing.timestamp(0), 0.0);
        assert_eq!(pacing.timestamp(30), 1.0);
        assert_eq!(pacing.timestamp(9000), 300.0);
    }

    #[test]
    fn test_constant_mode_ignores_wall_clock() {
        let Some(origin) = Instant::now().checked_sub(Duration::from_secs(100)) else {
            return;
        };
        let pacing = PacingPolicy::with_origin(FrameRateMode::Constant, 60, origin);
        assert_eq!(pacing.timestamp(60), 1.0);
    }

    #[test]
    fn test_variable_mode_is_monotonic() {
        let pacing = PacingPolicy::new(FrameRateMode::Variable, 30);
        let mut last = pacing.timestamp(0);
        assert!(last >= 0.0);
        for k in 1..200u64 {
            if k % 50 == 0 {
                std::thread::sleep(Duration::from_millis(2));
            }
            let ts = pacing.timestamp(k);
            assert!(ts >= last, "timestamp went backwards: {} < {}", ts, last);
            last = ts;
        }
    }

    #[test]
    fn test_variable_mode_is_recording_relative() {
        let Some(origin) = Instant::now().checked_sub(Duration::from_secs(5)) else {
            return;
        };
        let pacing = PacingPolicy::with_origin(FrameRateMode::Variable, 30, origin);
        let ts = pacing.timestamp(0);
        assert!((5.0..6.0).contains(&ts));
    }

    #[test]
    fn test_zero_frame_rate_is_clamped() {
        let pacing = PacingPolicy::new(FrameRateMode::Constant, 0);
        assert_eq!(pacing.timestamp(3), 3.0);
    }
}
