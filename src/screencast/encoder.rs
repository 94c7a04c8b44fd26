//! Hardware encoder detection and selection
//!
//! Queries GStreamer for available encoders and prioritizes hardware-accelerated ones

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;

use crate::config::Container;

/// Video codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    VP8,
    VP9,
    AV1,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264",
            Codec::H265 => "H.265",
            Codec::VP8 => "VP8",
            Codec::VP9 => "VP9",
            Codec::AV1 => "AV1",
        }
    }

    /// Whether the container can carry this codec
    pub fn fits(&self, container: Container) -> bool {
        match container {
            Container::Webm => matches!(self, Codec::VP8 | Codec::VP9 | Codec::AV1),
            Container::Mp4 => matches!(self, Codec::H264 | Codec::H265 | Codec::AV1),
            Container::Mkv => true,
        }
    }
}

/// Audio codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Vorbis,
    Aac,
}

impl AudioCodec {
    pub fn name(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "Opus",
            AudioCodec::Vorbis => "Vorbis",
            AudioCodec::Aac => "AAC",
        }
    }

    pub fn fits(&self, container: Container) -> bool {
        match container {
            Container::Webm => matches!(self, AudioCodec::Opus | AudioCodec::Vorbis),
            Container::Mp4 => matches!(self, AudioCodec::Aac),
            Container::Mkv => true,
        }
    }
}

/// How an encoder element takes its target bitrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateProperty {
    pub name: &'static str,
    /// Property is in kbit/s rather than bit/s
    pub kbps: bool,
}

impl BitrateProperty {
    const fn bps(name: &'static str) -> Self {
        Self { name, kbps: false }
    }

    const fn kbps(name: &'static str) -> Self {
        Self { name, kbps: true }
    }

    /// Property value for a bitrate in bits per second
    pub fn value(&self, bits_per_second: u32) -> u32 {
        if self.kbps {
            (bits_per_second / 1000).max(1)
        } else {
            bits_per_second
        }
    }
}

/// Information about an available video encoder
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    /// Human-readable name (e.g., "VA-API H.264")
    pub name: String,
    /// GStreamer element name (e.g., "vaapih264enc")
    pub gst_element: String,
    /// Codec type
    pub codec: Codec,
    /// Whether this is hardware-accelerated
    pub hardware: bool,
    /// Priority (lower = better, hardware encoders have lower priority)
    pub priority: u8,
    pub bitrate: BitrateProperty,
}

impl EncoderInfo {
    /// Display name with hardware/software indicator
    pub fn display_name(&self) -> String {
        let hw_indicator = if self.hardware {
            " (Hardware)"
        } else {
            " (Software)"
        };
        format!("{}{}", self.name, hw_indicator)
    }
}

/// Information about an available audio encoder
#[derive(Debug, Clone)]
pub struct AudioEncoderInfo {
    pub name: String,
    pub gst_element: String,
    pub codec: AudioCodec,
    pub priority: u8,
    pub bitrate: BitrateProperty,
}

struct Candidate<C> {
    name: &'static str,
    element: &'static str,
    codec: C,
    hardware: bool,
    priority: u8,
    bitrate: BitrateProperty,
}

const fn hw<C>(
    name: &'static str,
    element: &'static str,
    codec: C,
    priority: u8,
    bitrate: BitrateProperty,
) -> Candidate<C> {
    Candidate {
        name,
        element,
        codec,
        hardware: true,
        priority,
        bitrate,
    }
}

const fn sw<C>(
    name: &'static str,
    element: &'static str,
    codec: C,
    priority: u8,
    bitrate: BitrateProperty,
) -> Candidate<C> {
    Candidate {
        name,
        element,
        codec,
        hardware: false,
        priority,
        bitrate,
    }
}

const KBPS: BitrateProperty = BitrateProperty::kbps("bitrate");

const VIDEO_CANDIDATES: &[Candidate<Codec>] = &[
    // VA-API encoders (Intel/AMD) - priority 10
    hw("VA-API H.264", "vaapih264enc", Codec::H264, 10, KBPS),
    hw("VA-API H.265", "vaapih265enc", Codec::H265, 11, KBPS),
    hw("VA-API VP9", "vaapivp9enc", Codec::VP9, 12, KBPS),
    hw("VA-API VP8", "vaapivp8enc", Codec::VP8, 13, KBPS),
    // NVENC encoders (NVIDIA) - priority 20
    hw("NVENC H.264", "nvh264enc", Codec::H264, 20, KBPS),
    hw("NVENC H.265", "nvh265enc", Codec::H265, 21, KBPS),
    // Software fallbacks - priority 100+
    sw("VP8", "vp8enc", Codec::VP8, 100, BitrateProperty::bps("target-bitrate")),
    sw("x264 H.264", "x264enc", Codec::H264, 101, KBPS),
    sw("VP9", "vp9enc", Codec::VP9, 102, BitrateProperty::bps("target-bitrate")),
    sw("AOM AV1", "av1enc", Codec::AV1, 110, BitrateProperty::kbps("target-bitrate")),
];

const BPS: BitrateProperty = BitrateProperty::bps("bitrate");

const AUDIO_CANDIDATES: &[Candidate<AudioCodec>] = &[
    sw("Opus", "opusenc", AudioCodec::Opus, 10, BPS),
    sw("Vorbis", "vorbisenc", AudioCodec::Vorbis, 11, BPS),
    sw("FDK AAC", "fdkaacenc", AudioCodec::Aac, 20, BPS),
    sw("FFmpeg AAC", "avenc_aac", AudioCodec::Aac, 21, BPS),
    sw("VisualOn AAC", "voaacenc", AudioCodec::Aac, 22, BPS),
];

/// Detect available video encoders
pub fn detect_encoders() -> Result<Vec<EncoderInfo>> {
    gst::init().context("Failed to initialize GStreamer")?;

    let mut encoders: Vec<EncoderInfo> = VIDEO_CANDIDATES
        .iter()
        .filter(|c| encoder_available(c.element))
        .map(|c| EncoderInfo {
            name: c.name.to_string(),
            gst_element: c.element.to_string(),
            codec: c.codec,
            hardware: c.hardware,
            priority: c.priority,
            bitrate: c.bitrate,
        })
        .collect();

    // Sort by priority (lower first)
    encoders.sort_by_key(|e| e.priority);

    Ok(encoders)
}

/// Detect available audio encoders
pub fn detect_audio_encoders() -> Result<Vec<AudioEncoderInfo>> {
    gst::init().context("Failed to initialize GStreamer")?;

    let mut encoders: Vec<AudioEncoderInfo> = AUDIO_CANDIDATES
        .iter()
        .filter(|c| encoder_available(c.element))
        .map(|c| AudioEncoderInfo {
            name: c.name.to_string(),
            gst_element: c.element.to_string(),
            codec: c.codec,
            priority: c.priority,
            bitrate: c.bitrate,
        })
        .collect();

    encoders.sort_by_key(|e| e.priority);

    Ok(encoders)
}

/// Check if a GStreamer encoder element is available
fn encoder_available(element_name: &str) -> bool {
    gst::ElementFactory::find(element_name).is_some()
}

/// Pick the video encoder for `container`
///
/// A `preferred` element wins when it is installed and fits the container,
/// otherwise the best-ranked fitting encoder is used.
pub fn select_encoder(container: Container, preferred: Option<&str>) -> Result<EncoderInfo> {
    let encoders: Vec<_> = detect_encoders()?
        .into_iter()
        .filter(|e| e.codec.fits(container))
        .collect();

    if let Some(preferred) = preferred {
        match encoders.iter().find(|e| e.gst_element == preferred) {
            Some(encoder) => return Ok(encoder.clone()),
            None => log::warn!(
                "Encoder '{}' is not available for {:?}, auto-detecting",
                preferred,
                container
            ),
        }
    }

    encoders
        .into_iter()
        .next()
        .with_context(|| format!("No video encoder available for {:?}", container))
}

/// Pick the audio encoder for `container`
pub fn select_audio_encoder(container: Container) -> Result<AudioEncoderInfo> {
    detect_audio_encoders()?
        .into_iter()
        .find(|e| e.codec.fits(container))
        .with_context(|| format!("No audio encoder available for {:?}", container))
}

/// Apply a bitrate to an encoder element if it exposes the property
pub fn apply_bitrate(element: &gst::Element, property: BitrateProperty, bits_per_second: u32) {
    if element.find_property(property.name).is_none() {
        log::warn!(
            "{} has no '{}' property, bitrate not applied",
            element.name(),
            property.name
        );
        return;
    }
    element.set_property_from_str(property.name, &property.value(bits_per_second).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_name() {
        assert_eq!(Codec::H264.name(), "H.264");
        assert_eq!(Codec::VP8.name(), "VP8");
        assert_eq!(Codec::AV1.name(), "AV1");
        assert_eq!(AudioCodec::Opus.name(), "Opus");
    }

    #[test]
    fn test_codec_container_fit() {
        assert!(Codec::VP8.fits(Container::Webm));
        assert!(!Codec::H264.fits(Container::Webm));
        assert!(Codec::H264.fits(Container::Mp4));
        assert!(!Codec::VP8.fits(Container::Mp4));
        assert!(Codec::VP8.fits(Container::Mkv));
        assert!(AudioCodec::Vorbis.fits(Container::Webm));
        assert!(!AudioCodec::Aac.fits(Container::Webm));
        assert!(AudioCodec::Aac.fits(Container::Mp4));
    }

    #[test]
    fn test_bitrate_units() {
        assert_eq!(BitrateProperty::bps("target-bitrate").value(8_192_000), 8_192_000);
        assert_eq!(BitrateProperty::kbps("bitrate").value(8_192_000), 8_192);
        assert_eq!(BitrateProperty::kbps("bitrate").value(500), 1);
    }

    #[test]
    fn test_encoder_info_display_name() {
        let hw_encoder = EncoderInfo {
            name: "VA-API H.264".to_string(),
            gst_element: "vaapih264enc".to_string(),
            codec: Codec::H264,
            hardware: true,
            priority: 10,
            bitrate: BitrateProperty::kbps("bitrate"),
        };
        assert_eq!(hw_encoder.display_name(), "VA-API H.264 (Hardware)");

        let sw_encoder = EncoderInfo {
            name: "VP8".to_string(),
            gst_element: "vp8enc".to_string(),
            codec: Codec::VP8,
            hardware: false,
            priority: 100,
            bitrate: BitrateProperty::bps("target-bitrate"),
        };
        assert_eq!(sw_encoder.display_name(), "VP8 (Software)");
    }

    #[test]
    fn test_candidates_ranked_hardware_first() {
        let first_software = VIDEO_CANDIDATES.iter().position(|c| !c.hardware).unwrap();
        assert!(VIDEO_CANDIDATES[..first_software].iter().all(|c| c.hardware));
        assert!(VIDEO_CANDIDATES[first_software..].iter().all(|c| !c.hardware));
    }

    #[test]
    fn test_detect_encoders_returns_sorted_list() {
        // GStreamer may be missing on the test machine
        let Ok(encoders) = detect_encoders() else {
            return;
        };
        for i in 1..encoders.len() {
            assert!(encoders[i - 1].priority <= encoders[i].priority);
        }
    }

    #[test]
    fn test_select_encoder_fits_container() {
        // Succeeds only with plugins installed, which is acceptable
        if let Ok(encoder) = select_encoder(Container::Webm, Some("not-an-encoder")) {
            assert!(encoder.codec.fits(Container::Webm));
        }
        if let Ok(encoder) = select_audio_encoder(Container::Mp4) {
            assert_eq!(encoder.codec, AudioCodec::Aac);
        }
    }
}
