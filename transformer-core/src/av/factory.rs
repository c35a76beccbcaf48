use std::sync::Arc;

use super::encoder::FfmpegEncoderFactory;
use super::transcode::{AudioTranscodeSamplePipeline, VideoTranscodeSamplePipeline};
use crate::pipeline::{PassthroughSamplePipeline, PipelineFactory, PipelineKind, PipelineParams, SamplePipeline};

/// Builds passthrough or FFmpeg transcoding pipelines.
#[derive(Debug, Clone, Default)]
pub struct FfmpegPipelineFactory {
    encoders: FfmpegEncoderFactory,
}

impl FfmpegPipelineFactory {
    pub fn new(encoders: FfmpegEncoderFactory) -> Self {
        Self { encoders }
    }

    pub fn encoder_factory(&self) -> &FfmpegEncoderFactory {
        &self.encoders
    }
}

impl PipelineFactory for FfmpegPipelineFactory {
    fn create(
        &self,
        kind: PipelineKind,
        params: PipelineParams,
    ) -> anyhow::Result<Arc<dyn SamplePipeline>> {
        let pipeline: Arc<dyn SamplePipeline> = match kind {
            PipelineKind::Passthrough => Arc::new(PassthroughSamplePipeline::new(params)?),
            PipelineKind::AudioTranscode => {
                Arc::new(AudioTranscodeSamplePipeline::new(params, &self.encoders)?)
            }
            PipelineKind::VideoTranscode => {
                Arc::new(VideoTranscodeSamplePipeline::new(params, &self.encoders)?)
            }
        };
        Ok(pipeline)
    }
}
