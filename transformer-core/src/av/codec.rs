//! Mapping between MIME types, FFmpeg codec ids and codec parameters.

use bytes::Bytes;
use ffmpeg_next::codec::{Id, Parameters};
use ffmpeg_next::media::Type;
use ffmpeg_next::util::mathematics::Rescale;
use ffmpeg_next::{Packet, Rational};

use super::MICROS;
use crate::format::{TrackFormat, TrackType, mime};
use crate::pipeline::Sample;

const FFMPEG_MIME_PREFIX: &str = "x-ffmpeg-";

const KNOWN: &[(&str, Id)] = &[
    (mime::VIDEO_H263, Id::H263),
    (mime::VIDEO_H264, Id::H264),
    (mime::VIDEO_H265, Id::HEVC),
    (mime::VIDEO_MP4V, Id::MPEG4),
    (mime::VIDEO_VP8, Id::VP8),
    (mime::VIDEO_VP9, Id::VP9),
    (mime::VIDEO_AV1, Id::AV1),
    (mime::AUDIO_AAC, Id::AAC),
    (mime::AUDIO_MPEG, Id::MP3),
    (mime::AUDIO_AMR_NB, Id::AMR_NB),
    (mime::AUDIO_AMR_WB, Id::AMR_WB),
    (mime::AUDIO_OPUS, Id::OPUS),
    (mime::AUDIO_VORBIS, Id::VORBIS),
    (mime::AUDIO_FLAC, Id::FLAC),
    (mime::AUDIO_AC3, Id::AC3),
];

/// MIME type of a codec. Codecs without a registered MIME type get a
/// `<medium>/x-ffmpeg-<codec>` name so they still round-trip.
pub fn mime_type_for(id: Id, medium: Type) -> String {
    if let Some((mime_type, _)) = KNOWN.iter().find(|(_, known)| *known == id) {
        return mime_type.to_string();
    }
    let top = match medium {
        Type::Video => "video",
        Type::Audio => "audio",
        Type::Subtitle => "text",
        _ => "application",
    };
    format!("{}/{}{}", top, FFMPEG_MIME_PREFIX, id.name())
}

pub fn codec_id_for(mime_type: &str) -> Option<Id> {
    if let Some((_, id)) = KNOWN.iter().find(|(known, _)| *known == mime_type) {
        return Some(*id);
    }
    let (_, subtype) = mime_type.split_once('/')?;
    let name = subtype.strip_prefix(FFMPEG_MIME_PREFIX)?;
    ffmpeg_next::decoder::find_by_name(name)
        .or_else(|| ffmpeg_next::encoder::find_by_name(name))
        .map(|codec| codec.id())
}

/// Builds codec parameters describing `format`, for decoders and muxers.
pub fn parameters_for(format: &TrackFormat) -> anyhow::Result<Parameters> {
    let id = codec_id_for(&format.sample_mime_type)
        .ok_or_else(|| anyhow::anyhow!("no codec for {}", format.sample_mime_type))?;
    let mut params = Parameters::new();
    unsafe {
        let ptr = params.as_mut_ptr();
        (*ptr).codec_id = id.into();
        match format.track_type() {
            TrackType::Video => {
                (*ptr).codec_type = Type::Video.into();
                (*ptr).width = format.width.unwrap_or(0) as i32;
                (*ptr).height = format.height.unwrap_or(0) as i32;
                (*ptr).sample_aspect_ratio =
                    Rational::from(f64::from(format.pixel_width_height_ratio)).into();
            }
            TrackType::Audio => {
                (*ptr).codec_type = Type::Audio.into();
                (*ptr).sample_rate = format.sample_rate.unwrap_or(0) as i32;
                ffmpeg_next::ffi::av_channel_layout_default(
                    &mut (*ptr).ch_layout,
                    format.channel_count.unwrap_or(2) as i32,
                );
            }
            TrackType::Other => {
                (*ptr).codec_type = Type::Subtitle.into();
            }
        }
        if let Some(bitrate) = format.average_bitrate {
            (*ptr).bit_rate = i64::from(bitrate);
        }
        if let Some(data) = &format.initialization_data {
            set_extradata(ptr, data)?;
        }
    }
    Ok(params)
}

/// Copies `data` into FFmpeg-owned, padded extradata of `params`.
unsafe fn set_extradata(
    params: *mut ffmpeg_next::ffi::AVCodecParameters,
    data: &[u8],
) -> anyhow::Result<()> {
    let padded = data.len() + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    unsafe {
        let buf = ffmpeg_next::ffi::av_mallocz(padded) as *mut u8;
        if buf.is_null() {
            anyhow::bail!("failed to allocate {} bytes of extradata", padded);
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());
        ffmpeg_next::ffi::av_freep(&mut (*params).extradata as *mut *mut u8 as *mut std::ffi::c_void);
        (*params).extradata = buf;
        (*params).extradata_size = data.len() as i32;
    }
    Ok(())
}

/// Reads the extradata of `params`, if any.
pub fn extradata_of(params: &Parameters) -> Option<Bytes> {
    unsafe {
        let ptr = params.as_ptr();
        if (*ptr).extradata.is_null() || (*ptr).extradata_size <= 0 {
            return None;
        }
        let data = std::slice::from_raw_parts((*ptr).extradata, (*ptr).extradata_size as usize);
        Some(Bytes::copy_from_slice(data))
    }
}

/// Reads the extradata an opened encoder produced, if any.
pub fn extradata_of_context(ctx: &ffmpeg_next::codec::Context) -> Option<Bytes> {
    unsafe {
        let ptr = ctx.as_ptr();
        if (*ptr).extradata.is_null() || (*ptr).extradata_size <= 0 {
            return None;
        }
        let data = std::slice::from_raw_parts((*ptr).extradata, (*ptr).extradata_size as usize);
        Some(Bytes::copy_from_slice(data))
    }
}

/// Converts a demuxed or encoded packet in `time_base` to a [`Sample`].
pub fn sample_from_packet(packet: &Packet, time_base: Rational) -> Sample {
    let dts = packet.dts().or(packet.pts()).unwrap_or(0);
    let pts = packet.pts().unwrap_or(dts);
    Sample {
        data: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
        pts_us: pts.rescale(time_base, MICROS),
        dts_us: dts.rescale(time_base, MICROS),
        duration_us: packet.duration().rescale(time_base, MICROS),
        is_key_frame: packet.is_key(),
    }
}

/// Converts a [`Sample`] to a packet with microsecond timestamps.
pub fn packet_from_sample(sample: &Sample) -> Packet {
    let mut packet = Packet::copy(&sample.data);
    packet.set_pts(Some(sample.pts_us));
    packet.set_dts(Some(sample.dts_us));
    packet.set_duration(sample.duration_us);
    if sample.is_key_frame {
        packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
    }
    packet
}
