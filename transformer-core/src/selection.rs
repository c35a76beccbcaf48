//! Per-track choice between copying samples and re-encoding them.
//!
//! The functions here are pure: the same format, timing and context always
//! produce the same decision.

use crate::effect::Effect;
use crate::format::{TrackFormat, TrackType};
use crate::pipeline::PipelineKind;
use crate::request::{HdrMode, TransformationRequest};

/// Encoder capabilities the selection depends on.
pub trait EncoderFactory: Send + Sync {
    /// Whether audio must always be re-encoded, whatever the request.
    fn audio_needs_encoding(&self) -> bool {
        false
    }

    /// Whether video must always be re-encoded, whatever the request.
    fn video_needs_encoding(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEncoderFactory {
    pub force_audio_encoding: bool,
    pub force_video_encoding: bool,
}

impl EncoderFactory for DefaultEncoderFactory {
    fn audio_needs_encoding(&self) -> bool {
        self.force_audio_encoding
    }

    fn video_needs_encoding(&self) -> bool {
        self.force_video_encoding
    }
}

/// Inputs shared by every track of a run.
pub struct SelectionContext<'a> {
    pub request: &'a TransformationRequest,
    pub audio_processors: &'a [Effect],
    pub video_effects: &'a [Effect],
    pub starts_at_key_frame: bool,
    pub encoder_factory: &'a dyn EncoderFactory,
    /// Whether the output container accepts samples of a MIME type as is.
    pub supports_sample_mime_type: &'a dyn Fn(&str) -> bool,
}

/// First condition found that forces a track to be re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeReason {
    EncoderForced,
    MimeTypeMismatch,
    ContainerUnsupported,
    SlowMotion,
    AudioProcessors,
    ClippedOffKeyFrame,
    HdrMode,
    PixelAspectRatio,
    Rotation,
    Scale,
    OutputHeight,
    VideoEffects,
}

impl SelectionContext<'_> {
    fn mime_type_reason(
        &self,
        source_mime_type: &str,
        requested: Option<&str>,
    ) -> Option<TranscodeReason> {
        match requested {
            Some(requested) if requested != source_mime_type => {
                Some(TranscodeReason::MimeTypeMismatch)
            }
            Some(_) => None,
            None if !(self.supports_sample_mime_type)(source_mime_type) => {
                Some(TranscodeReason::ContainerUnsupported)
            }
            None => None,
        }
    }
}

pub fn audio_transcode_reason(
    format: &TrackFormat,
    ctx: &SelectionContext<'_>,
) -> Option<TranscodeReason> {
    if ctx.encoder_factory.audio_needs_encoding() {
        return Some(TranscodeReason::EncoderForced);
    }
    if let Some(reason) = ctx.mime_type_reason(
        &format.sample_mime_type,
        ctx.request.audio_mime_type.as_deref(),
    ) {
        return Some(reason);
    }
    if ctx.request.flatten_for_slow_motion && format.is_slow_motion() {
        return Some(TranscodeReason::SlowMotion);
    }
    if !ctx.audio_processors.is_empty() {
        return Some(TranscodeReason::AudioProcessors);
    }
    None
}

pub fn video_transcode_reason(
    format: &TrackFormat,
    stream_start_position_us: i64,
    stream_offset_us: i64,
    ctx: &SelectionContext<'_>,
) -> Option<TranscodeReason> {
    let request = ctx.request;
    if stream_start_position_us - stream_offset_us != 0 && !ctx.starts_at_key_frame {
        return Some(TranscodeReason::ClippedOffKeyFrame);
    }
    if ctx.encoder_factory.video_needs_encoding() {
        return Some(TranscodeReason::EncoderForced);
    }
    if request.hdr_mode != HdrMode::KeepHdr {
        return Some(TranscodeReason::HdrMode);
    }
    if let Some(reason) =
        ctx.mime_type_reason(&format.sample_mime_type, request.video_mime_type.as_deref())
    {
        return Some(reason);
    }
    if format.pixel_width_height_ratio != 1.0 {
        return Some(TranscodeReason::PixelAspectRatio);
    }
    if request.rotation_degrees != 0.0 {
        return Some(TranscodeReason::Rotation);
    }
    if request.scale_x != 1.0 || request.scale_y != 1.0 {
        return Some(TranscodeReason::Scale);
    }
    if let Some(output_height) = request.output_height {
        if format.display_height() != Some(output_height) {
            return Some(TranscodeReason::OutputHeight);
        }
    }
    if !ctx.video_effects.is_empty() {
        return Some(TranscodeReason::VideoEffects);
    }
    None
}

/// Picks the pipeline for a newly added track.
pub fn select_pipeline(
    format: &TrackFormat,
    stream_start_position_us: i64,
    stream_offset_us: i64,
    ctx: &SelectionContext<'_>,
) -> PipelineKind {
    let (kind, reason) = match format.track_type() {
        TrackType::Audio => match audio_transcode_reason(format, ctx) {
            Some(reason) => (PipelineKind::AudioTranscode, Some(reason)),
            None => (PipelineKind::Passthrough, None),
        },
        TrackType::Video => {
            match video_transcode_reason(format, stream_start_position_us, stream_offset_us, ctx) {
                Some(reason) => (PipelineKind::VideoTranscode, Some(reason)),
                None => (PipelineKind::Passthrough, None),
            }
        }
        TrackType::Other => (PipelineKind::Passthrough, None),
    };
    log::debug!(
        "{} track ({}): {} {:?}",
        format.track_type(),
        format.sample_mime_type,
        kind,
        reason
    );
    kind
}

#[cfg(test)]
#[path = "selection_test.rs"]
mod selection_test;
