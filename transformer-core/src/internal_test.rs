use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::error::{ErrorCode, SourceError};
use crate::pipeline::PipelineKind;
use crate::progress::Progress;
use crate::selection::DefaultEncoderFactory;
use crate::testing::*;

struct Harness {
    internal: TransformerInternal,
    progress: watch::Receiver<ProgressSnapshot>,
    listener: Arc<RecordingListener>,
    factory: Arc<RecordingPipelineFactory>,
    muxer_log: Arc<Mutex<MuxerLog>>,
    loader_events: Arc<Mutex<Option<EventSender>>>,
    loader_releases: Arc<AtomicUsize>,
    rx: UnboundedReceiver<Command>,
}

fn harness_with(
    muxer: FakeMuxer,
    muxer_log: Arc<Mutex<MuxerLog>>,
    loader: HandleLoader,
    request: TransformationRequest,
) -> Harness {
    let listener = Arc::new(RecordingListener::default());
    let factory = Arc::new(RecordingPipelineFactory::default());
    let loader_events = loader.events.clone();
    let loader_releases = loader.releases.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    let (internal, progress) = TransformerInternal::new(
        InternalParams {
            media_item: MediaItem::new("memory://clip.mp4"),
            request,
            audio_processors: vec![],
            video_effects: vec![],
            asset_loader: Box::new(loader),
            muxer: Box::new(muxer),
            pipeline_factory: factory.clone(),
            encoder_factory: Arc::new(DefaultEncoderFactory::default()),
            listener: listener.clone(),
            output: OutputDestination::Path(std::env::temp_dir().join("transformer-internal-test-absent.mp4")),
        },
        EventSender::new(tx),
    );
    Harness {
        internal,
        progress,
        listener,
        factory,
        muxer_log,
        loader_events,
        loader_releases,
        rx,
    }
}

fn harness() -> Harness {
    let (muxer, log) = FakeMuxer::new();
    harness_with(muxer, log, HandleLoader::default(), TransformationRequest::default())
}

impl Harness {
    fn event(&mut self, event: AssetLoaderEvent) {
        self.internal.handle_command(Command::Event(event));
    }

    /// Processes whatever the loader sent through its event sender.
    fn drain(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.internal.handle_command(cmd);
        }
    }

    fn loader(&self) -> EventSender {
        self.loader_events.lock().clone().unwrap()
    }

    fn add_track(&mut self, format: TrackFormat) -> anyhow::Result<Arc<dyn SamplePipeline>> {
        let (result, mut rx) = oneshot::channel();
        self.event(AssetLoaderEvent::TrackAdded {
            format,
            stream_start_position_us: 0,
            stream_offset_us: 0,
            result,
        });
        rx.try_recv().unwrap()
    }

    fn register(&mut self, tracks: usize) {
        for _ in 0..tracks {
            self.event(AssetLoaderEvent::TrackRegistered);
        }
        self.event(AssetLoaderEvent::AllTracksRegistered);
    }

    fn progress(&self) -> Progress {
        self.progress.borrow().progress()
    }
}

#[test]
fn start_arms_loader_and_waits_for_duration() {
    let mut h = harness();
    assert_eq!(h.progress(), Progress::NoTransformation);
    h.internal.start();
    assert!(h.loader_events.lock().is_some());
    assert_eq!(h.progress(), Progress::WaitingForAvailability);
    assert_eq!(h.listener.outcome_count(), 0);
}

#[test]
fn two_tracks_complete_once_with_statistics() {
    let mut h = harness();
    h.internal.start();
    let loader = h.loader();
    loader.on_duration_ms(Some(2_000));
    loader.on_track_registered();
    loader.on_track_registered();
    loader.on_all_tracks_registered();
    h.drain();
    assert_eq!(h.progress(), Progress::Available(0));

    let video = h.add_track(h264()).unwrap();
    let audio = h.add_track(aac()).unwrap();
    assert_eq!(*h.factory.created.lock(), vec![PipelineKind::Passthrough; 2]);

    for i in 0..25 {
        video.queue_input(sample(i * 40_000, 1_000)).unwrap();
    }
    audio.queue_input(sample(0, 100)).unwrap();
    // mean of 960ms and 0ms over 2000ms
    assert_eq!(h.progress(), Progress::Available(24));

    video.end_of_input().unwrap();
    audio.end_of_input().unwrap();
    loader.on_ended();
    h.drain();

    let result = h.listener.single_outcome().unwrap();
    assert_eq!(result.video_frame_count, 25);
    assert_eq!(result.duration_ms, Some(1_000));
    assert_eq!(result.average_video_bitrate, Some(200_000));
    assert_eq!(result.average_audio_bitrate, Some(20_000));
    assert_eq!(result.file_size_bytes, None);

    assert!(h.internal.is_finished());
    assert_eq!(h.progress(), Progress::NoTransformation);
    assert_eq!(h.muxer_log.lock().releases, vec![false]);
    assert_eq!(h.loader_releases.load(Ordering::Acquire), 1);
    for pipeline in h.factory.pipelines.lock().iter() {
        assert_eq!(pipeline.releases.load(Ordering::Acquire), 1);
    }
}

#[test]
fn zero_tracks_fails_with_no_output_tracks() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(Some(1_000)));
    h.event(AssetLoaderEvent::AllTracksRegistered);

    // the muxer also complains on release since nothing was written, the
    // first error still wins
    let error = h.listener.single_outcome().unwrap_err();
    assert_eq!(error.code(), ErrorCode::NoOutputTracks);
    assert_eq!(h.muxer_log.lock().releases, vec![false]);
}

#[test]
fn loader_error_mid_stream_is_reported_once() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(Some(1_000)));
    h.register(1);
    let video = h.add_track(h264()).unwrap();
    video.queue_input(sample(0, 10)).unwrap();

    h.event(AssetLoaderEvent::Error(
        SourceError::Read("unexpected end of stream".into()).into(),
    ));
    h.event(AssetLoaderEvent::Ended);
    h.event(AssetLoaderEvent::Error(anyhow::anyhow!("late")));

    let error = h.listener.single_outcome().unwrap_err();
    assert_eq!(error.code(), ErrorCode::Source);
    assert!(error.message().contains("unexpected end of stream"));
}

#[test]
fn transformation_errors_pass_through_unchanged() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::Error(
        TransformationError::new(ErrorCode::DecodingFailed, "corrupt slice").into(),
    ));
    let error = h.listener.single_outcome().unwrap_err();
    assert_eq!(error.code(), ErrorCode::DecodingFailed);
    assert_eq!(error.message(), "corrupt slice");
}

#[test]
fn loader_start_failure_ends_the_run() {
    let (muxer, log) = FakeMuxer::new();
    let loader = HandleLoader {
        fail_start: true,
        ..Default::default()
    };
    let mut h = harness_with(muxer, log, loader, TransformationRequest::default());
    h.internal.start();
    assert!(h.internal.is_finished());
    assert_eq!(h.listener.single_outcome().unwrap_err().code(), ErrorCode::Source);
}

#[test]
fn unknown_duration_keeps_progress_unavailable() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(None));
    assert_eq!(h.progress(), Progress::Unavailable);

    h.event(AssetLoaderEvent::DurationMs(Some(5_000)));
    assert_eq!(h.progress(), Progress::Unavailable);

    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(Some(0)));
    assert_eq!(h.progress(), Progress::Unavailable);
}

#[test]
fn duration_is_only_taken_once() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(Some(1_000)));
    h.event(AssetLoaderEvent::DurationMs(None));
    assert_eq!(h.progress(), Progress::Available(0));
}

#[test]
fn release_failure_alone_is_muxing_failed() {
    let (muxer, log) = FakeMuxer::failing_release();
    let mut h = harness_with(muxer, log, HandleLoader::default(), TransformationRequest::default());
    h.internal.start();
    h.register(1);
    let audio = h.add_track(aac()).unwrap();
    audio.queue_input(sample(0, 10)).unwrap();
    h.event(AssetLoaderEvent::Ended);

    assert_eq!(
        h.listener.single_outcome().unwrap_err().code(),
        ErrorCode::MuxingFailed
    );
}

#[test]
fn external_release_twice_is_release_once() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(Some(1_000)));
    h.register(1);
    let video = h.add_track(h264()).unwrap();

    assert!(h.internal.release_externally(true).is_ok());
    assert!(h.internal.release_externally(true).is_ok());

    assert_eq!(
        h.listener.single_outcome().unwrap_err().code(),
        ErrorCode::Cancelled
    );
    assert_eq!(h.muxer_log.lock().releases, vec![true]);
    assert_eq!(h.loader_releases.load(Ordering::Acquire), 1);
    assert_eq!(h.factory.pipelines.lock()[0].releases.load(Ordering::Acquire), 1);
    assert_eq!(h.progress(), Progress::NoTransformation);

    // the loader keeps feeding for a moment, which fails at the muxer
    assert!(video.queue_input(sample(0, 10)).is_err());
    h.event(AssetLoaderEvent::Ended);
    assert_eq!(h.listener.outcome_count(), 1);
}

#[test]
fn external_release_without_cancellation_reports_muxer_state() {
    let mut h = harness();
    h.internal.start();
    let error = h.internal.release_externally(false).unwrap_err();
    assert_eq!(error.code(), ErrorCode::MuxingFailed);
    assert_eq!(
        h.listener.single_outcome().unwrap_err().code(),
        ErrorCode::MuxingFailed
    );
}

#[test]
fn release_after_completion_does_not_report_again() {
    let mut h = harness();
    h.internal.start();
    h.register(1);
    let audio = h.add_track(aac()).unwrap();
    audio.queue_input(sample(0, 10)).unwrap();
    h.event(AssetLoaderEvent::Ended);
    assert!(h.internal.release_externally(true).is_ok());
    assert!(h.listener.single_outcome().is_ok());
    assert_eq!(h.muxer_log.lock().releases, vec![false]);
}

#[test]
fn track_added_after_end_is_refused() {
    let mut h = harness();
    h.internal.start();
    h.register(1);
    h.event(AssetLoaderEvent::Error(anyhow::anyhow!("boom")));
    assert!(h.add_track(h264()).is_err());
    assert!(h.factory.created.lock().is_empty());
    assert_eq!(h.listener.outcome_count(), 1);
}

#[test]
fn pipeline_creation_failure_ends_the_run() {
    let mut h = harness();
    h.internal.start();
    h.register(1);
    h.factory.fail.store(true, Ordering::Release);

    let Err(err) = h.add_track(h264()) else {
        panic!("pipeline creation should fail");
    };
    assert!(format!("{:#}", err).contains("encoder not available"));

    let error = h.listener.single_outcome().unwrap_err();
    assert_eq!(error.code(), ErrorCode::Unexpected);
    assert!(h.internal.is_finished());
}

#[test]
fn requested_geometry_selects_video_transcode() {
    let (muxer, log) = FakeMuxer::new();
    let request = TransformationRequest::builder().output_height(480).build().unwrap();
    let mut h = harness_with(muxer, log, HandleLoader::default(), request);
    h.internal.start();
    h.register(2);
    h.add_track(h264()).unwrap();
    h.add_track(aac()).unwrap();
    assert_eq!(
        *h.factory.created.lock(),
        vec![PipelineKind::VideoTranscode, PipelineKind::Passthrough]
    );
}

#[test]
fn progress_never_decreases_while_available() {
    let mut h = harness();
    h.internal.start();
    h.event(AssetLoaderEvent::DurationMs(Some(1_000)));
    h.register(2);
    let video = h.add_track(h264()).unwrap();

    let mut last = 0;
    for i in 0..5 {
        video.queue_input(sample(i * 100_000, 10)).unwrap_err();
        let percent = h.progress().percent().unwrap();
        assert!(percent >= last);
        last = percent;
    }

    let audio = h.add_track(aac()).unwrap();
    for i in 0..20 {
        let pts = i * 50_000;
        video.queue_input(sample(pts, 10)).unwrap();
        audio.queue_input(sample(pts, 10)).unwrap();
        let percent = h.progress().percent().unwrap();
        assert!(percent >= last, "{} < {}", percent, last);
        assert!(percent < 100);
        last = percent;
    }
    assert_eq!(last, 95);
}

#[test]
fn ended_flushes_tracks_left_open() {
    let mut h = harness();
    h.internal.start();
    h.register(2);
    let video = h.add_track(h264()).unwrap();
    let audio = h.add_track(aac()).unwrap();
    video.queue_input(sample(0, 10)).unwrap();
    audio.queue_input(sample(0, 10)).unwrap();
    video.end_of_input().unwrap();
    assert!(!audio.is_ended());

    h.event(AssetLoaderEvent::Ended);

    assert!(audio.is_ended());
    let result = h.listener.single_outcome().unwrap();
    assert_eq!(result.video_frame_count, 1);
}

#[test]
fn ended_before_every_track_was_added_fails() {
    let mut h = harness();
    h.internal.start();
    h.register(2);
    let video = h.add_track(h264()).unwrap();
    video.queue_input(sample(0, 10)).unwrap_err();
    video.end_of_input().unwrap();

    h.event(AssetLoaderEvent::Ended);

    let error = h.listener.single_outcome().unwrap_err();
    assert_eq!(error.code(), ErrorCode::MuxingFailed);
    assert!(error.message().contains("1 of 2 registered tracks"));
}
