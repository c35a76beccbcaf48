//! Per-track source formats reported by an asset loader.

use bytes::Bytes;

/// MIME types and helpers. Types follow the names used by the container
/// writers and codec registries the loaders map from.
pub mod mime {
    use super::TrackType;

    pub const VIDEO_H263: &str = "video/3gpp";
    pub const VIDEO_H264: &str = "video/avc";
    pub const VIDEO_H265: &str = "video/hevc";
    pub const VIDEO_MP4V: &str = "video/mp4v-es";
    pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    pub const VIDEO_AV1: &str = "video/av01";

    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_MPEG: &str = "audio/mpeg";
    pub const AUDIO_AMR_NB: &str = "audio/3gpp";
    pub const AUDIO_AMR_WB: &str = "audio/amr-wb";
    pub const AUDIO_OPUS: &str = "audio/opus";
    pub const AUDIO_VORBIS: &str = "audio/vorbis";
    pub const AUDIO_FLAC: &str = "audio/flac";
    pub const AUDIO_AC3: &str = "audio/ac3";
    pub const AUDIO_RAW: &str = "audio/raw";

    /// Returns the part before the `/`, e.g. `video` for `video/avc`.
    pub fn top_level_type(mime_type: &str) -> Option<&str> {
        mime_type.split_once('/').map(|(top, _)| top)
    }

    pub fn is_audio(mime_type: &str) -> bool {
        top_level_type(mime_type) == Some("audio")
    }

    pub fn is_video(mime_type: &str) -> bool {
        top_level_type(mime_type) == Some("video")
    }

    pub fn track_type(mime_type: &str) -> TrackType {
        if is_audio(mime_type) {
            TrackType::Audio
        } else if is_video(mime_type) {
            TrackType::Video
        } else {
            TrackType::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
    Other,
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackType::Audio => write!(f, "audio"),
            TrackType::Video => write!(f, "video"),
            TrackType::Other => write!(f, "other"),
        }
    }
}

/// A section of a slow motion recording, played back `speed_divisor` times
/// slower than it was captured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowMotionSegment {
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub speed_divisor: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEntry {
    /// Marks the track as a slow motion recording.
    SlowMotion { segments: Vec<SlowMotionSegment> },
    /// Any other key/value entry found in the container.
    Tag { key: String, value: String },
}

/// Description of one source track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    pub sample_mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_width_height_ratio: f32,
    /// Clockwise rotation to apply to encoded frames for display.
    pub rotation_degrees: i32,
    pub frame_rate: Option<f32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    pub average_bitrate: Option<u32>,
    /// Codec specific setup data (e.g. `avcC` / `AudioSpecificConfig`).
    pub initialization_data: Option<Bytes>,
    pub metadata: Vec<MetadataEntry>,
}

impl TrackFormat {
    pub fn new(sample_mime_type: impl Into<String>) -> Self {
        Self {
            sample_mime_type: sample_mime_type.into(),
            width: None,
            height: None,
            pixel_width_height_ratio: 1.0,
            rotation_degrees: 0,
            frame_rate: None,
            sample_rate: None,
            channel_count: None,
            average_bitrate: None,
            initialization_data: None,
            metadata: Vec::new(),
        }
    }

    pub fn video(sample_mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::new(sample_mime_type)
        }
    }

    pub fn audio(sample_mime_type: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Self::new(sample_mime_type)
        }
    }

    pub fn with_rotation(mut self, rotation_degrees: i32) -> Self {
        self.rotation_degrees = rotation_degrees;
        self
    }

    pub fn with_pixel_width_height_ratio(mut self, ratio: f32) -> Self {
        self.pixel_width_height_ratio = ratio;
        self
    }

    pub fn with_metadata(mut self, entry: MetadataEntry) -> Self {
        self.metadata.push(entry);
        self
    }

    pub fn track_type(&self) -> TrackType {
        mime::track_type(&self.sample_mime_type)
    }

    pub fn is_slow_motion(&self) -> bool {
        self.metadata
            .iter()
            .any(|entry| matches!(entry, MetadataEntry::SlowMotion { .. }))
    }

    /// Height of the frames once the decoder has rotated them for display.
    ///
    /// Rotations that are not a multiple of 180 degrees swap the axes. Loaders
    /// are expected to report rotations as multiples of 90.
    pub fn display_height(&self) -> Option<u32> {
        if self.rotation_degrees % 180 == 0 {
            self.height
        } else {
            self.width
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_type_follows_top_level_mime_type() {
        assert_eq!(TrackFormat::new(mime::AUDIO_AAC).track_type(), TrackType::Audio);
        assert_eq!(TrackFormat::new(mime::VIDEO_H264).track_type(), TrackType::Video);
        assert_eq!(TrackFormat::new("application/id3").track_type(), TrackType::Other);
        assert_eq!(TrackFormat::new("garbage").track_type(), TrackType::Other);
    }

    #[test]
    fn display_height_swaps_axes_for_quarter_turns() {
        let format = TrackFormat::video(mime::VIDEO_H264, 1920, 1080);
        assert_eq!(format.display_height(), Some(1080));
        assert_eq!(format.clone().with_rotation(180).display_height(), Some(1080));
        assert_eq!(format.clone().with_rotation(90).display_height(), Some(1920));
        assert_eq!(format.with_rotation(-90).display_height(), Some(1920));
    }

    #[test]
    fn slow_motion_is_read_from_metadata() {
        let format = TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2).with_metadata(MetadataEntry::Tag {
            key: "title".into(),
            value: "clip".into(),
        });
        assert!(!format.is_slow_motion());

        let format = format.with_metadata(MetadataEntry::SlowMotion {
            segments: vec![SlowMotionSegment {
                start_time_ms: 0,
                end_time_ms: 1_000,
                speed_divisor: 4,
            }],
        });
        assert!(format.is_slow_motion());
    }
}
