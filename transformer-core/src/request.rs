use serde::{Deserialize, Serialize};

use crate::format::mime;

/// How HDR input is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrMode {
    /// Keep HDR content as it is.
    #[default]
    KeepHdr,
    /// Tone map HDR content to SDR.
    ToneMapHdrToSdr,
    /// Decode HDR content as if it were SDR.
    ExperimentalForceInterpretHdrAsSdr,
}

/// Requested output parameters of a transformation.
///
/// `None` MIME types mean "keep the source format if the container accepts
/// it". Values are supplied once and never changed by the transformer; a
/// pipeline that cannot honour them reports what it applied instead to the
/// [`FallbackListener`](crate::FallbackListener).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationRequest {
    pub audio_mime_type: Option<String>,
    pub video_mime_type: Option<String>,
    pub hdr_mode: HdrMode,
    pub rotation_degrees: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub output_height: Option<u32>,
    pub flatten_for_slow_motion: bool,
}

impl Default for TransformationRequest {
    fn default() -> Self {
        Self {
            audio_mime_type: None,
            video_mime_type: None,
            hdr_mode: HdrMode::KeepHdr,
            rotation_degrees: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            output_height: None,
            flatten_for_slow_motion: false,
        }
    }
}

impl TransformationRequest {
    pub fn builder() -> TransformationRequestBuilder {
        TransformationRequestBuilder::default()
    }

    pub fn to_builder(&self) -> TransformationRequestBuilder {
        TransformationRequestBuilder {
            request: self.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TransformationRequestBuilder {
    request: TransformationRequest,
}

impl TransformationRequestBuilder {
    pub fn audio_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.request.audio_mime_type = Some(mime_type.into());
        self
    }

    pub fn video_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.request.video_mime_type = Some(mime_type.into());
        self
    }

    pub fn hdr_mode(mut self, hdr_mode: HdrMode) -> Self {
        self.request.hdr_mode = hdr_mode;
        self
    }

    pub fn rotation_degrees(mut self, degrees: f32) -> Self {
        self.request.rotation_degrees = degrees;
        self
    }

    pub fn scale(mut self, scale_x: f32, scale_y: f32) -> Self {
        self.request.scale_x = scale_x;
        self.request.scale_y = scale_y;
        self
    }

    pub fn output_height(mut self, height: u32) -> Self {
        self.request.output_height = Some(height);
        self
    }

    pub fn flatten_for_slow_motion(mut self, flatten: bool) -> Self {
        self.request.flatten_for_slow_motion = flatten;
        self
    }

    pub fn build(self) -> anyhow::Result<TransformationRequest> {
        let request = self.request;
        if let Some(mime_type) = &request.audio_mime_type {
            if !mime::is_audio(mime_type) {
                anyhow::bail!("not an audio MIME type: {}", mime_type);
            }
        }
        if let Some(mime_type) = &request.video_mime_type {
            if !mime::is_video(mime_type) {
                anyhow::bail!("not a video MIME type: {}", mime_type);
            }
        }
        // negative factors mirror the frame
        let valid = |f: f32| f.is_finite() && f != 0.0;
        if !(valid(request.scale_x) && valid(request.scale_y)) {
            anyhow::bail!(
                "scale factors must be finite and non-zero, got {}x{}",
                request.scale_x,
                request.scale_y
            );
        }
        if request.output_height == Some(0) {
            anyhow::bail!("output height must be positive");
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_keeps_everything() {
        let request = TransformationRequest::builder().build().unwrap();
        assert_eq!(request, TransformationRequest::default());
        assert_eq!(request.scale_x, 1.0);
        assert_eq!(request.scale_y, 1.0);
        assert_eq!(request.hdr_mode, HdrMode::KeepHdr);
        assert!(request.output_height.is_none());
    }

    #[test]
    fn builder_rejects_mime_type_of_wrong_kind() {
        let err = TransformationRequest::builder()
            .audio_mime_type(mime::VIDEO_H264)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not an audio MIME type"));

        let err = TransformationRequest::builder()
            .video_mime_type(mime::AUDIO_AAC)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not a video MIME type"));
    }

    #[test]
    fn builder_rejects_bad_geometry() {
        assert!(TransformationRequest::builder().scale(0.0, 1.0).build().is_err());
        assert!(TransformationRequest::builder().scale(1.0, f32::NAN).build().is_err());
        assert!(TransformationRequest::builder().scale(f32::INFINITY, 1.0).build().is_err());
        assert!(TransformationRequest::builder().output_height(0).build().is_err());
    }

    #[test]
    fn negative_scale_mirrors() {
        let request = TransformationRequest::builder().scale(-1.0, 1.0).build().unwrap();
        assert_eq!((request.scale_x, request.scale_y), (-1.0, 1.0));
    }

    #[test]
    fn to_builder_round_trips_fields() {
        let request = TransformationRequest::builder()
            .video_mime_type(mime::VIDEO_H265)
            .output_height(720)
            .rotation_degrees(90.0)
            .build()
            .unwrap();
        let copy = request.to_builder().build().unwrap();
        assert_eq!(request, copy);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let request: TransformationRequest =
            serde_json::from_str(r#"{"output_height": 480, "hdr_mode": "tone_map_hdr_to_sdr"}"#)
                .unwrap();
        assert_eq!(request.output_height, Some(480));
        assert_eq!(request.hdr_mode, HdrMode::ToneMapHdrToSdr);
        assert_eq!(request.scale_x, 1.0);
        assert!(request.video_mime_type.is_none());
    }
}
