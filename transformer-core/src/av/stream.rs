use ffmpeg_next::format::stream::Stream;
use ffmpeg_next::media::Type;
use ffmpeg_next::util::mathematics::Rescale;

use super::MICROS;
use super::codec::{extradata_of, mime_type_for};
use crate::format::{MetadataEntry, SlowMotionSegment, TrackFormat};

/// Capture frame rate tag written by Android cameras for slow motion clips.
const CAPTURE_FPS_TAG: &str = "com.android.capture.fps";
/// Recordings captured above this rate are treated as slow motion.
const NORMAL_CAPTURE_FPS: f32 = 30.0;

/// Describes a demuxed stream as a [`TrackFormat`].
pub fn track_format(stream: &Stream<'_>, container_tags: &[(String, String)]) -> TrackFormat {
    let params = stream.parameters();
    let medium = params.medium();
    let mut format = TrackFormat::new(mime_type_for(params.id(), medium));
    format.initialization_data = extradata_of(&params);

    unsafe {
        let ptr = params.as_ptr();
        if (*ptr).bit_rate > 0 {
            format.average_bitrate = u32::try_from((*ptr).bit_rate).ok();
        }
        match medium {
            Type::Video => {
                if (*ptr).width > 0 && (*ptr).height > 0 {
                    format.width = Some((*ptr).width as u32);
                    format.height = Some((*ptr).height as u32);
                }
                let sar = (*ptr).sample_aspect_ratio;
                if sar.num > 0 && sar.den > 0 {
                    format.pixel_width_height_ratio = sar.num as f32 / sar.den as f32;
                }
            }
            Type::Audio => {
                if (*ptr).sample_rate > 0 {
                    format.sample_rate = Some((*ptr).sample_rate as u32);
                }
                if (*ptr).ch_layout.nb_channels > 0 {
                    format.channel_count = Some((*ptr).ch_layout.nb_channels as u32);
                }
            }
            _ => {}
        }
    }

    if medium == Type::Video {
        let rate = stream.avg_frame_rate();
        if rate.numerator() > 0 && rate.denominator() > 0 {
            format.frame_rate = Some(rate.numerator() as f32 / rate.denominator() as f32);
        }
        format.rotation_degrees = rotation_degrees(stream);
    }

    let tags: Vec<(String, String)> = stream
        .metadata()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(container_tags.iter().cloned())
        .collect();
    for (key, value) in tags {
        if key == CAPTURE_FPS_TAG {
            if let Ok(fps) = value.parse::<f32>() {
                if fps > NORMAL_CAPTURE_FPS && !format.is_slow_motion() {
                    format.metadata.push(MetadataEntry::SlowMotion {
                        segments: vec![SlowMotionSegment {
                            start_time_ms: 0,
                            end_time_ms: duration_ms(stream).unwrap_or(0),
                            speed_divisor: (fps / NORMAL_CAPTURE_FPS).round() as u32,
                        }],
                    });
                }
            }
        }
        if key != "rotate" {
            format.metadata.push(MetadataEntry::Tag { key, value });
        }
    }
    format
}

/// Clockwise rotation to display the stream, rounded to quarter turns.
fn rotation_degrees(stream: &Stream<'_>) -> i32 {
    let from_matrix = unsafe {
        let par = stream.parameters();
        let ptr = par.as_ptr();
        let side_data = ffmpeg_next::ffi::av_packet_side_data_get(
            (*ptr).coded_side_data,
            (*ptr).nb_coded_side_data,
            ffmpeg_next::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null() || (*side_data).size < 9 * 4 {
            None
        } else {
            // counterclockwise angle
            let angle = ffmpeg_next::ffi::av_display_rotation_get((*side_data).data as *const i32);
            angle.is_finite().then_some(-angle)
        }
    };
    let degrees = from_matrix.or_else(|| {
        stream
            .metadata()
            .get("rotate")
            .and_then(|v| v.parse::<f64>().ok())
    });
    match degrees {
        Some(degrees) => (((degrees / 90.0).round() as i32) * 90).rem_euclid(360),
        None => 0,
    }
}

/// Timestamp of the first sample of the stream, in microseconds.
pub fn start_time_us(stream: &Stream<'_>) -> i64 {
    let start = stream.start_time();
    if start == ffmpeg_next::ffi::AV_NOPTS_VALUE {
        0
    } else {
        start.rescale(stream.time_base(), MICROS)
    }
}

fn duration_ms(stream: &Stream<'_>) -> Option<u64> {
    let duration = stream.duration();
    if duration == ffmpeg_next::ffi::AV_NOPTS_VALUE || duration <= 0 {
        return None;
    }
    Some((duration.rescale(stream.time_base(), MICROS) / 1_000) as u64)
}
