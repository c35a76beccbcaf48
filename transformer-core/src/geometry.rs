//! Frame size computations for re-encoded video.

use crate::format::TrackFormat;
use crate::request::TransformationRequest;

/// Size of the frames a video transcode produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Computes the encoded output size of a video track.
///
/// Steps, in order: square the pixels, apply the source rotation, scale,
/// apply the requested rotation (bounding box for angles that are not
/// quarter turns), fit to the requested output height keeping the aspect
/// ratio, then round both sides to even values as most encoders need.
pub fn output_frame_size(format: &TrackFormat, request: &TransformationRequest) -> Option<FrameSize> {
    let mut width = f64::from(format.width?);
    let mut height = f64::from(format.height?);
    if width <= 0.0 || height <= 0.0 {
        return None;
    }

    let par = f64::from(format.pixel_width_height_ratio);
    if par > 1.0 {
        width *= par;
    } else if par > 0.0 && par < 1.0 {
        height /= par;
    }

    if format.rotation_degrees % 180 != 0 {
        std::mem::swap(&mut width, &mut height);
    }

    width *= f64::from(request.scale_x).abs();
    height *= f64::from(request.scale_y).abs();

    let radians = f64::from(request.rotation_degrees).to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let (rotated_width, rotated_height) = (width * cos + height * sin, width * sin + height * cos);
    width = rotated_width;
    height = rotated_height;

    if let Some(output_height) = request.output_height {
        width = width * f64::from(output_height) / height;
        height = f64::from(output_height);
    }

    Some(FrameSize {
        width: round_even(width),
        height: round_even(height),
    })
}

fn round_even(value: f64) -> u32 {
    let rounded = (value / 2.0).round() as u32 * 2;
    rounded.max(2)
}

/// Number of clockwise quarter turns for `degrees`, if it is a multiple of 90.
pub fn quarter_turns(degrees: f32) -> Option<u32> {
    let turns = degrees / 90.0;
    if (turns - turns.round()).abs() > 1e-3 {
        return None;
    }
    Some((turns.round() as i64).rem_euclid(4) as u32)
}
