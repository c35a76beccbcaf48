use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use bytes::Bytes;

use crate::effect::Effect;
use crate::fallback::FallbackListener;
use crate::format::{TrackFormat, TrackType};
use crate::muxer::MuxerWrapper;
use crate::request::TransformationRequest;

/// How the samples of one track get into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Samples are copied to the output unchanged.
    Passthrough,
    AudioTranscode,
    VideoTranscode,
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineKind::Passthrough => write!(f, "passthrough"),
            PipelineKind::AudioTranscode => write!(f, "audio transcode"),
            PipelineKind::VideoTranscode => write!(f, "video transcode"),
        }
    }
}

/// One encoded access unit. Timestamps are in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub data: Bytes,
    pub pts_us: i64,
    pub dts_us: i64,
    pub duration_us: i64,
    pub is_key_frame: bool,
}

/// Per-track path from the asset loader to the muxer.
///
/// The loader feeds samples from its own thread while the control task
/// reads the position for progress, so implementations publish their
/// position atomically.
pub trait SamplePipeline: Send + Sync {
    fn kind(&self) -> PipelineKind;

    fn queue_input(&self, sample: Sample) -> anyhow::Result<()>;

    /// Signals that no more samples follow. Flushes anything buffered.
    fn end_of_input(&self) -> anyhow::Result<()>;

    /// Presentation time of the latest output, relative to the stream start.
    fn current_position_ms(&self) -> i64;

    fn is_ended(&self) -> bool;

    fn release(&self) -> anyhow::Result<()>;
}

/// Everything a pipeline needs to be built for one track.
#[derive(Clone)]
pub struct PipelineParams {
    pub format: TrackFormat,
    /// Source timestamp of the first sample to output.
    pub stream_start_position_us: i64,
    /// Source timestamp that corresponds to the start of the stream.
    pub stream_offset_us: i64,
    pub request: TransformationRequest,
    pub audio_processors: Vec<Effect>,
    pub video_effects: Vec<Effect>,
    pub muxer: Arc<MuxerWrapper>,
    pub fallback: Arc<FallbackListener>,
}

/// Builds the pipeline chosen for a track.
pub trait PipelineFactory: Send + Sync {
    fn create(&self, kind: PipelineKind, params: PipelineParams)
    -> anyhow::Result<Arc<dyn SamplePipeline>>;
}

/// Copies samples to the muxer, shifted so the output starts at zero.
pub struct PassthroughSamplePipeline {
    track_type: TrackType,
    stream_start_position_us: i64,
    muxer: Arc<MuxerWrapper>,
    position_us: AtomicI64,
    ended: AtomicBool,
}

impl PassthroughSamplePipeline {
    pub fn new(params: PipelineParams) -> anyhow::Result<Self> {
        params.muxer.add_track_format(&params.format)?;
        params
            .fallback
            .on_transformation_request_finalized(&params.request)?;
        Ok(Self {
            track_type: params.format.track_type(),
            stream_start_position_us: params.stream_start_position_us,
            muxer: params.muxer,
            position_us: AtomicI64::new(0),
            ended: AtomicBool::new(false),
        })
    }
}

impl SamplePipeline for PassthroughSamplePipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Passthrough
    }

    fn queue_input(&self, mut sample: Sample) -> anyhow::Result<()> {
        if self.ended.load(Ordering::Acquire) {
            anyhow::bail!("{} passthrough received input after end of input", self.track_type);
        }
        if sample.pts_us < self.stream_start_position_us {
            return Ok(());
        }
        sample.pts_us -= self.stream_start_position_us;
        sample.dts_us -= self.stream_start_position_us;
        self.muxer.write_sample(self.track_type, &sample)?;
        self.position_us.fetch_max(sample.pts_us, Ordering::AcqRel);
        Ok(())
    }

    fn end_of_input(&self) -> anyhow::Result<()> {
        if !self.ended.swap(true, Ordering::AcqRel) {
            self.muxer.end_track(self.track_type);
        }
        Ok(())
    }

    fn current_position_ms(&self) -> i64 {
        self.position_us.load(Ordering::Acquire) / 1_000
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn release(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
