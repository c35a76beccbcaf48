use serde::Serialize;

/// Statistics of a successfully completed transformation.
///
/// Values that could not be determined are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformationResult {
    pub duration_ms: Option<u64>,
    pub average_audio_bitrate: Option<u32>,
    pub average_video_bitrate: Option<u32>,
    pub video_frame_count: u64,
    pub file_size_bytes: Option<u64>,
}

impl TransformationResult {
    pub fn builder() -> TransformationResultBuilder {
        TransformationResultBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct TransformationResultBuilder {
    result: TransformationResult,
}

impl TransformationResultBuilder {
    pub fn duration_ms(mut self, duration_ms: Option<u64>) -> Self {
        self.result.duration_ms = duration_ms;
        self
    }

    pub fn average_audio_bitrate(mut self, bitrate: Option<u32>) -> Self {
        self.result.average_audio_bitrate = bitrate;
        self
    }

    pub fn average_video_bitrate(mut self, bitrate: Option<u32>) -> Self {
        self.result.average_video_bitrate = bitrate;
        self
    }

    pub fn video_frame_count(mut self, count: u64) -> Self {
        self.result.video_frame_count = count;
        self
    }

    pub fn file_size_bytes(mut self, size: Option<u64>) -> Self {
        self.result.file_size_bytes = size;
        self
    }

    pub fn build(self) -> TransformationResult {
        self.result
    }
}
