use std::path::Path;

use ffmpeg_next::Rational;

use super::MICROS;
use super::codec::{packet_from_sample, parameters_for};
use crate::error::MuxerError;
use crate::format::{TrackFormat, TrackType, mime};
use crate::muxer::Muxer;
use crate::pipeline::Sample;

const MP4_VIDEO: &[&str] = &[
    mime::VIDEO_H263,
    mime::VIDEO_H264,
    mime::VIDEO_H265,
    mime::VIDEO_MP4V,
    mime::VIDEO_AV1,
];
const MP4_AUDIO: &[&str] = &[mime::AUDIO_AAC, mime::AUDIO_AMR_NB, mime::AUDIO_AMR_WB];
const MATROSKA_VIDEO: &[&str] = &[
    mime::VIDEO_VP8,
    mime::VIDEO_VP9,
    mime::VIDEO_AV1,
    mime::VIDEO_H264,
    mime::VIDEO_H265,
];
const MATROSKA_AUDIO: &[&str] = &[
    mime::AUDIO_OPUS,
    mime::AUDIO_VORBIS,
    mime::AUDIO_AAC,
    mime::AUDIO_FLAC,
];
const WEBM_VIDEO: &[&str] = &[mime::VIDEO_VP8, mime::VIDEO_VP9, mime::VIDEO_AV1];
const WEBM_AUDIO: &[&str] = &[mime::AUDIO_OPUS, mime::AUDIO_VORBIS];

/// Sample MIME types a container accepts, keyed by libavformat muxer name.
fn supported_mime_types(container: &str, track_type: TrackType) -> &'static [&'static str] {
    let (video, audio) = match container {
        "webm" => (WEBM_VIDEO, WEBM_AUDIO),
        "matroska" => (MATROSKA_VIDEO, MATROSKA_AUDIO),
        _ => (MP4_VIDEO, MP4_AUDIO),
    };
    match track_type {
        TrackType::Video => video,
        TrackType::Audio => audio,
        TrackType::Other => &[],
    }
}

/// Stores a clockwise display rotation as a display matrix.
unsafe fn set_display_rotation(
    codecpar: *mut ffmpeg_next::ffi::AVCodecParameters,
    clockwise_degrees: i32,
) -> Result<(), MuxerError> {
    unsafe {
        let side_data = ffmpeg_next::ffi::av_packet_side_data_new(
            &mut (*codecpar).coded_side_data,
            &mut (*codecpar).nb_coded_side_data,
            ffmpeg_next::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
            9 * 4,
            0,
        );
        if side_data.is_null() {
            return Err(MuxerError::Write("failed to allocate display matrix".into()));
        }
        // the matrix holds a counterclockwise angle
        ffmpeg_next::ffi::av_display_rotation_set(
            (*side_data).data as *mut i32,
            -f64::from(clockwise_degrees),
        );
    }
    Ok(())
}

/// [`Muxer`] over a libavformat output context. The container is picked
/// from the file extension.
pub struct AvMuxer {
    inner: ffmpeg_next::format::context::Output,
    container: String,
    /// Output stream time base per track, known once the header is written.
    time_bases: Vec<Rational>,
    have_written_header: bool,
    have_written_trailer: bool,
    samples_written: u64,
}

// Only used behind the muxer wrapper's mutex.
unsafe impl Send for AvMuxer {}

impl AvMuxer {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let inner = ffmpeg_next::format::output(&path).map_err(|e| {
            anyhow::anyhow!("failed to create output {}: {}", path.display(), e)
        })?;
        let container = inner.format().name().to_string();
        log::debug!("output {} uses {} container", path.display(), container);
        Ok(Self {
            inner,
            container,
            time_bases: Vec::new(),
            have_written_header: false,
            have_written_trailer: false,
            samples_written: 0,
        })
    }

    fn write_header(&mut self) -> Result<(), MuxerError> {
        self.inner
            .write_header()
            .map_err(|e| MuxerError::Write(format!("write header: {}", e)))?;
        self.have_written_header = true;
        self.time_bases = self.inner.streams().map(|s| s.time_base()).collect();
        Ok(())
    }
}

impl Muxer for AvMuxer {
    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String> {
        supported_mime_types(&self.container, track_type)
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
        if self.have_written_header {
            return Err(MuxerError::InvalidState("track added after samples were written".into()));
        }
        let supported = supported_mime_types(&self.container, format.track_type());
        if !supported.contains(&format.sample_mime_type.as_str()) {
            return Err(MuxerError::UnsupportedFormat(format!(
                "{} cannot hold {}",
                self.container, format.sample_mime_type
            )));
        }
        let params = parameters_for(format).map_err(MuxerError::Other)?;
        let mut stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(params.id()))
            .map_err(|e| MuxerError::Write(format!("add stream: {}", e)))?;
        stream.set_parameters(params);
        stream.set_time_base(MICROS);
        unsafe {
            let codecpar = (*stream.as_mut_ptr()).codecpar;
            (*codecpar).codec_tag = 0;
            if format.rotation_degrees != 0 {
                set_display_rotation(codecpar, format.rotation_degrees)?;
            }
        }
        Ok(stream.index())
    }

    fn write_sample(&mut self, track_index: usize, sample: &Sample) -> Result<(), MuxerError> {
        if self.have_written_trailer {
            return Err(MuxerError::InvalidState("sample written after release".into()));
        }
        if !self.have_written_header {
            self.write_header()?;
        }
        let time_base = *self
            .time_bases
            .get(track_index)
            .ok_or_else(|| MuxerError::InvalidState(format!("unknown track {}", track_index)))?;
        let mut packet = packet_from_sample(sample);
        packet.set_stream(track_index);
        packet.set_position(-1);
        packet.rescale_ts(MICROS, time_base);
        packet
            .write_interleaved(&mut self.inner)
            .map_err(|e| MuxerError::Write(e.to_string()))?;
        self.samples_written += 1;
        Ok(())
    }

    fn release(&mut self, for_cancellation: bool) -> Result<(), MuxerError> {
        if self.have_written_trailer {
            return Ok(());
        }
        self.have_written_trailer = true;
        if !self.have_written_header {
            if for_cancellation {
                return Ok(());
            }
            return Err(MuxerError::InvalidState("no samples were written".into()));
        }
        self.inner
            .write_trailer()
            .map_err(|e| MuxerError::Write(format!("write trailer: {}", e)))?;
        log::debug!("output closed after {} samples", self.samples_written);
        Ok(())
    }
}
