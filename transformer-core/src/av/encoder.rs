use ffmpeg_next::codec::{self, Id};
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::{Codec, Dictionary, Rational};

use super::codec::codec_id_for;
use super::{MICROS, hw};
use crate::error::{ErrorCode, TransformationError};
use crate::format::mime;
use crate::selection::EncoderFactory;

const DEFAULT_VIDEO_MIME_TYPE: &str = mime::VIDEO_H264;
const DEFAULT_AUDIO_MIME_TYPE: &str = mime::AUDIO_AAC;
const DEFAULT_FRAME_RATE: Rational = Rational(30, 1);

/// Opens FFmpeg encoders for the transcoding pipelines.
///
/// Hardware encoders are tried first, then software ones. When no encoder
/// can produce the requested MIME type and `enable_fallback` is set, the
/// default type (H.264 or AAC) is used instead and reported as a fallback by
/// the pipeline.
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    pub force_audio_encoding: bool,
    pub force_video_encoding: bool,
    pub enable_fallback: bool,
}

impl Default for FfmpegEncoderFactory {
    fn default() -> Self {
        Self {
            force_audio_encoding: false,
            force_video_encoding: false,
            enable_fallback: true,
        }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn audio_needs_encoding(&self) -> bool {
        self.force_audio_encoding
    }

    fn video_needs_encoding(&self) -> bool {
        self.force_video_encoding
    }
}

pub(crate) struct VideoEncoder {
    pub encoder: codec::encoder::video::Encoder,
    pub mime_type: String,
    pub codec_name: String,
    pub pixel_format: Pixel,
    pub time_base: Rational,
    pub frame_rate: Rational,
}

pub(crate) struct AudioEncoder {
    pub encoder: codec::encoder::audio::Encoder,
    pub mime_type: String,
    pub codec_name: String,
    pub time_base: Rational,
}

// Encoder contexts are only used behind the pipeline mutex.
unsafe impl Send for VideoEncoder {}
unsafe impl Send for AudioEncoder {}

#[derive(Debug, Clone, Copy)]
pub(crate) struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f32>,
    pub bitrate: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: Option<u32>,
}

impl FfmpegEncoderFactory {
    pub(crate) fn open_video_encoder(
        &self,
        mime_type: &str,
        settings: VideoSettings,
    ) -> anyhow::Result<VideoEncoder> {
        self.with_fallback(mime_type, DEFAULT_VIDEO_MIME_TYPE, |mime_type| {
            open_first(mime_type, video_candidates, |codec| {
                open_video(codec, mime_type, settings)
            })
        })
    }

    pub(crate) fn open_audio_encoder(
        &self,
        mime_type: &str,
        settings: AudioSettings,
    ) -> anyhow::Result<AudioEncoder> {
        self.with_fallback(mime_type, DEFAULT_AUDIO_MIME_TYPE, |mime_type| {
            open_first(mime_type, audio_candidates, |codec| {
                open_audio(codec, mime_type, settings)
            })
        })
    }

    fn with_fallback<T>(
        &self,
        mime_type: &str,
        default_mime_type: &str,
        open: impl Fn(&str) -> Result<T, TransformationError>,
    ) -> anyhow::Result<T> {
        match open(mime_type) {
            Ok(encoder) => Ok(encoder),
            Err(e) if self.enable_fallback && mime_type != default_mime_type => {
                log::warn!("{}, falling back to {}", e, default_mime_type);
                Ok(open(default_mime_type)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn video_candidates(id: Id) -> Vec<Codec> {
    let software: &[&str] = match id {
        Id::H264 => &["libx264", "libopenh264"],
        Id::HEVC => &["libx265"],
        Id::VP8 => &["libvpx"],
        Id::VP9 => &["libvpx-vp9"],
        Id::AV1 => &["libsvtav1", "libaom-av1", "librav1e"],
        Id::MPEG4 => &["mpeg4", "libxvid"],
        Id::H263 => &["h263"],
        _ => &[],
    };
    let mut candidates: Vec<Codec> = hw::find_hw_encoder(id).into_iter().collect();
    candidates.extend(software.iter().filter_map(|name| ffmpeg_next::encoder::find_by_name(name)));
    candidates.extend(ffmpeg_next::encoder::find(id));
    dedup(candidates)
}

fn audio_candidates(id: Id) -> Vec<Codec> {
    let software: &[&str] = match id {
        Id::AAC => &["aac", "libfdk_aac"],
        Id::OPUS => &["libopus", "opus"],
        Id::VORBIS => &["libvorbis", "vorbis"],
        Id::MP3 => &["libmp3lame"],
        Id::FLAC => &["flac"],
        Id::AC3 => &["ac3"],
        Id::AMR_NB => &["libopencore_amrnb"],
        Id::AMR_WB => &["libvo_amrwbenc"],
        _ => &[],
    };
    let mut candidates: Vec<Codec> = software
        .iter()
        .filter_map(|name| ffmpeg_next::encoder::find_by_name(name))
        .collect();
    candidates.extend(ffmpeg_next::encoder::find(id));
    dedup(candidates)
}

fn dedup(candidates: Vec<Codec>) -> Vec<Codec> {
    let mut unique: Vec<Codec> = Vec::with_capacity(candidates.len());
    for codec in candidates {
        if !unique.iter().any(|c| c.name() == codec.name()) {
            unique.push(codec);
        }
    }
    unique
}

/// Opens the first candidate encoder for `mime_type` that accepts the
/// settings.
fn open_first<T>(
    mime_type: &str,
    candidates: fn(Id) -> Vec<Codec>,
    open: impl Fn(Codec) -> anyhow::Result<T>,
) -> Result<T, TransformationError> {
    let id = codec_id_for(mime_type).ok_or_else(|| {
        TransformationError::new(
            ErrorCode::EncodingFormatUnsupported,
            format!("unknown output MIME type {}", mime_type),
        )
    })?;
    let candidates = candidates(id);
    if candidates.is_empty() {
        return Err(TransformationError::new(
            ErrorCode::EncodingFormatUnsupported,
            format!("no encoder for {}", mime_type),
        ));
    }

    let mut last_error = None;
    for codec in candidates {
        match open(codec) {
            Ok(encoder) => {
                log::info!("encoder opened successfully: {}", codec.name());
                return Ok(encoder);
            }
            Err(e) => {
                log::warn!("encoder {} failed to open: {:#}", codec.name(), e);
                last_error = Some(e);
            }
        }
    }
    let cause = last_error.unwrap_or_else(|| anyhow::anyhow!("no encoder opened"));
    Err(TransformationError::with_cause(
        ErrorCode::EncoderInitFailed,
        format!("no {} encoder could be opened", mime_type),
        cause,
    ))
}

/// Time base of the encoder. MPEG-4 part 2 and H.263 limit the denominator
/// to 16 bits.
fn video_time_base(id: Id, frame_rate: Rational) -> Rational {
    match id {
        Id::MPEG4 | Id::H263 => {
            let fps = f64::from(frame_rate).round().max(1.0) as i32;
            Rational(1, (fps * 1_000).min(65_535))
        }
        _ => MICROS,
    }
}

fn open_video(codec: Codec, mime_type: &str, settings: VideoSettings) -> anyhow::Result<VideoEncoder> {
    let pixel_format = hw::pixel_format_for_encoder(&codec);
    let frame_rate = settings
        .frame_rate
        .filter(|fps| *fps > 0.0)
        .map(|fps| Rational::from(f64::from(fps)))
        .unwrap_or(DEFAULT_FRAME_RATE);
    let time_base = video_time_base(codec.id(), frame_rate);

    let mut encoder = codec::Context::new_with_codec(codec).encoder().video()?;
    encoder.set_width(settings.width);
    encoder.set_height(settings.height);
    encoder.set_format(pixel_format);
    encoder.set_frame_rate(Some(frame_rate));
    encoder.set_time_base(time_base);
    if let Some(bitrate) = settings.bitrate {
        encoder.set_bit_rate(bitrate as usize);
    }
    encoder.set_flags(codec::Flags::GLOBAL_HEADER);

    let mut opts = Dictionary::new();
    if matches!(codec.name(), "libx264" | "libx265") {
        opts.set("preset", "veryfast");
    }
    let encoder = encoder.open_with(opts)?;
    let time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };
    Ok(VideoEncoder {
        encoder,
        mime_type: mime_type.to_string(),
        codec_name: codec.name().to_string(),
        pixel_format,
        time_base,
        frame_rate,
    })
}

fn open_audio(codec: Codec, mime_type: &str, settings: AudioSettings) -> anyhow::Result<AudioEncoder> {
    let audio = codec.audio()?;
    let sample_format = audio
        .formats()
        .and_then(|mut formats| formats.next())
        .unwrap_or(Sample::F32(ffmpeg_next::format::sample::Type::Planar));
    let sample_rate = match audio.rates() {
        Some(rates) => closest_rate(rates.collect(), settings.sample_rate),
        None => settings.sample_rate,
    };

    let mut encoder = codec::Context::new_with_codec(codec).encoder().audio()?;
    encoder.set_rate(sample_rate as i32);
    encoder.set_format(sample_format);
    unsafe {
        ffmpeg_next::ffi::av_channel_layout_default(
            &mut (*encoder.as_mut_ptr()).ch_layout,
            settings.channels.max(1) as i32,
        );
    }
    encoder.set_time_base(Rational(1, sample_rate as i32));
    if let Some(bitrate) = settings.bitrate {
        encoder.set_bit_rate(bitrate as usize);
    }
    encoder.set_flags(codec::Flags::GLOBAL_HEADER);

    let encoder = encoder.open_with(Dictionary::new())?;
    let time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };
    Ok(AudioEncoder {
        encoder,
        mime_type: mime_type.to_string(),
        codec_name: codec.name().to_string(),
        time_base,
    })
}

/// Supported rate closest to `wanted`, preferring higher rates on ties.
fn closest_rate(rates: Vec<i32>, wanted: u32) -> u32 {
    rates
        .into_iter()
        .filter(|rate| *rate > 0)
        .map(|rate| rate as u32)
        .min_by_key(|rate| (rate.abs_diff(wanted), std::cmp::Reverse(*rate)))
        .unwrap_or(wanted)
}
