//! Hardware encoder discovery.

use ffmpeg_next::codec::Id;

/// Hardware encoders to try, in order, before the software encoder of `id`.
fn hw_encoder_names(id: Id) -> &'static [&'static str] {
    match id {
        Id::H264 => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_videotoolbox", "h264_v4l2m2m"],
        Id::HEVC => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_videotoolbox", "hevc_v4l2m2m"],
        Id::VP9 => &["vp9_vaapi", "vp9_qsv"],
        Id::AV1 => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    }
}

/// First hardware encoder for `id` compiled into FFmpeg.
pub fn find_hw_encoder(id: Id) -> Option<ffmpeg_next::Codec> {
    hw_encoder_names(id).iter().find_map(|name| {
        let codec = ffmpeg_next::encoder::find_by_name(name)?;
        log::debug!("found hardware encoder: {}", name);
        Some(codec)
    })
}

/// Whether `codec_name` runs on a hardware encoder.
pub fn is_hw_encoder(codec_name: &str) -> bool {
    ["nvenc", "vaapi", "qsv", "videotoolbox", "v4l2m2m"]
        .iter()
        .any(|suffix| codec_name.ends_with(suffix))
}

/// Pixel format fed to a video encoder. Hardware encoders commonly want NV12.
pub fn pixel_format_for_encoder(codec: &ffmpeg_next::Codec) -> ffmpeg_next::format::Pixel {
    use ffmpeg_next::format::Pixel;

    let preferred = if is_hw_encoder(codec.name()) {
        Pixel::NV12
    } else {
        Pixel::YUV420P
    };
    let supported: Option<Vec<Pixel>> = codec
        .video()
        .ok()
        .and_then(|video| video.formats().map(|formats| formats.collect()));
    match supported {
        Some(formats) if !formats.is_empty() && !formats.contains(&preferred) => formats[0],
        _ => preferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hw_encoder_names_by_suffix() {
        assert!(is_hw_encoder("h264_nvenc"));
        assert!(is_hw_encoder("hevc_vaapi"));
        assert!(!is_hw_encoder("libx264"));
        assert!(hw_encoder_names(Id::AAC).is_empty());
    }
}
