//! In-memory collaborators shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::asset_loader::{AssetLoader, EventSender};
use crate::error::{MuxerError, TransformationError};
use crate::format::{TrackFormat, TrackType, mime};
use crate::listener::{Listener, Outcome};
use crate::muxer::Muxer;
use crate::pipeline::{
    PassthroughSamplePipeline, PipelineFactory, PipelineKind, PipelineParams, Sample,
    SamplePipeline,
};
use crate::request::TransformationRequest;
use crate::result::TransformationResult;

#[derive(Default)]
pub struct RecordingListener {
    pub outcomes: Mutex<Vec<Outcome>>,
    pub fallbacks: Mutex<Vec<TransformationRequest>>,
    pub notify: Notify,
}

impl RecordingListener {
    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn single_outcome(&self) -> Outcome {
        let outcomes = self.outcomes.lock();
        assert_eq!(outcomes.len(), 1, "expected exactly one terminal callback");
        outcomes[0].clone()
    }

    pub async fn wait_for_outcome(&self) -> Outcome {
        loop {
            let notified = self.notify.notified();
            if let Some(outcome) = self.outcomes.lock().first().cloned() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl Listener for RecordingListener {
    fn on_completed(&self, result: TransformationResult) {
        self.outcomes.lock().push(Ok(result));
        self.notify.notify_waiters();
    }

    fn on_error(&self, error: TransformationError) {
        self.outcomes.lock().push(Err(error));
        self.notify.notify_waiters();
    }

    fn on_fallback_applied(&self, _original: &TransformationRequest, fallback: &TransformationRequest) {
        self.fallbacks.lock().push(fallback.clone());
    }
}

#[derive(Default)]
pub struct MuxerLog {
    pub tracks: Vec<TrackFormat>,
    pub samples: usize,
    pub releases: Vec<bool>,
}

/// MP4-like muxer keeping only counters.
pub struct FakeMuxer {
    pub log: Arc<Mutex<MuxerLog>>,
    pub fail_release: bool,
}

impl FakeMuxer {
    pub fn new() -> (Self, Arc<Mutex<MuxerLog>>) {
        let log = Arc::new(Mutex::new(MuxerLog::default()));
        (
            Self {
                log: log.clone(),
                fail_release: false,
            },
            log,
        )
    }

    pub fn failing_release() -> (Self, Arc<Mutex<MuxerLog>>) {
        let (mut muxer, log) = Self::new();
        muxer.fail_release = true;
        (muxer, log)
    }
}

impl Muxer for FakeMuxer {
    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String> {
        match track_type {
            TrackType::Audio => vec![mime::AUDIO_AAC.into()],
            TrackType::Video => vec![mime::VIDEO_H264.into(), mime::VIDEO_H265.into()],
            TrackType::Other => vec![],
        }
    }

    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
        let mut log = self.log.lock();
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn write_sample(&mut self, _track_index: usize, _sample: &Sample) -> Result<(), MuxerError> {
        self.log.lock().samples += 1;
        Ok(())
    }

    fn release(&mut self, for_cancellation: bool) -> Result<(), MuxerError> {
        let mut log = self.log.lock();
        log.releases.push(for_cancellation);
        if self.fail_release {
            return Err(MuxerError::Write("trailer".into()));
        }
        if log.samples == 0 && !for_cancellation {
            return Err(MuxerError::InvalidState("no samples written".into()));
        }
        Ok(())
    }
}

/// Builds passthrough pipelines for every kind and records which kind was
/// asked for.
#[derive(Default)]
pub struct RecordingPipelineFactory {
    pub created: Mutex<Vec<PipelineKind>>,
    pub pipelines: Mutex<Vec<Arc<ReleaseTracking>>>,
    pub fail: AtomicBool,
}

impl PipelineFactory for RecordingPipelineFactory {
    fn create(&self, kind: PipelineKind, params: PipelineParams) -> anyhow::Result<Arc<dyn SamplePipeline>> {
        if self.fail.load(Ordering::Acquire) {
            anyhow::bail!("encoder not available");
        }
        self.created.lock().push(kind);
        let pipeline = Arc::new(ReleaseTracking {
            inner: PassthroughSamplePipeline::new(params)?,
            releases: AtomicUsize::new(0),
        });
        self.pipelines.lock().push(pipeline.clone());
        Ok(pipeline)
    }
}

pub struct ReleaseTracking {
    inner: PassthroughSamplePipeline,
    pub releases: AtomicUsize,
}

impl SamplePipeline for ReleaseTracking {
    fn kind(&self) -> PipelineKind {
        self.inner.kind()
    }
    fn queue_input(&self, sample: Sample) -> anyhow::Result<()> {
        self.inner.queue_input(sample)
    }
    fn end_of_input(&self) -> anyhow::Result<()> {
        self.inner.end_of_input()
    }
    fn current_position_ms(&self) -> i64 {
        self.inner.current_position_ms()
    }
    fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }
    fn release(&self) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::AcqRel);
        self.inner.release()
    }
}

/// Loader that remembers its event sender so the test can play the source.
#[derive(Default)]
pub struct HandleLoader {
    pub events: Arc<Mutex<Option<EventSender>>>,
    pub releases: Arc<AtomicUsize>,
    pub fail_start: bool,
}

impl AssetLoader for HandleLoader {
    fn start(&mut self, events: EventSender) -> anyhow::Result<()> {
        if self.fail_start {
            return Err(crate::error::SourceError::Open {
                uri: "missing.mp4".into(),
                reason: "no such file".into(),
            }
            .into());
        }
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::AcqRel);
    }
}

pub fn h264() -> TrackFormat {
    TrackFormat::video(mime::VIDEO_H264, 1280, 720)
}

pub fn aac() -> TrackFormat {
    TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2)
}

pub fn sample(pts_us: i64, len: usize) -> Sample {
    Sample {
        data: Bytes::from(vec![7u8; len]),
        pts_us,
        dts_us: pts_us,
        duration_us: 40_000,
        is_key_frame: pts_us == 0,
    }
}
