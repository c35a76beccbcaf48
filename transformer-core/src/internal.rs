use std::sync::Arc;
use std::sync::atomic::AtomicU8;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::asset_loader::{AssetLoader, AssetLoaderEvent, EventSender, MediaItem};
use crate::effect::Effect;
use crate::error::{ErrorCode, TransformationError};
use crate::fallback::FallbackListener;
use crate::format::{TrackFormat, TrackType};
use crate::listener::Listener;
use crate::muxer::{Muxer, MuxerWrapper};
use crate::output::OutputDestination;
use crate::pipeline::{PipelineFactory, PipelineParams, SamplePipeline};
use crate::progress::{ProgressSnapshot, ProgressState};
use crate::request::TransformationRequest;
use crate::result::TransformationResult;
use crate::selection::{EncoderFactory, SelectionContext, select_pipeline};

/// Everything processed by the control task, in arrival order.
pub(crate) enum Command {
    Event(AssetLoaderEvent),
    Release {
        for_cancellation: bool,
        result: oneshot::Sender<Result<(), TransformationError>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    /// The terminal callback has fired. Nothing else happens after this.
    Finished,
}

pub(crate) struct InternalParams {
    pub media_item: MediaItem,
    pub request: TransformationRequest,
    pub audio_processors: Vec<Effect>,
    pub video_effects: Vec<Effect>,
    pub asset_loader: Box<dyn AssetLoader>,
    pub muxer: Box<dyn Muxer>,
    pub pipeline_factory: Arc<dyn PipelineFactory>,
    pub encoder_factory: Arc<dyn EncoderFactory>,
    pub listener: Arc<dyn Listener>,
    pub output: OutputDestination,
}

/// State machine of one transformation. Owned by the control task; all
/// state below is only touched from there.
pub(crate) struct TransformerInternal {
    media_item: MediaItem,
    request: TransformationRequest,
    audio_processors: Vec<Effect>,
    video_effects: Vec<Effect>,
    asset_loader: Box<dyn AssetLoader>,
    muxer: Arc<MuxerWrapper>,
    pipeline_factory: Arc<dyn PipelineFactory>,
    encoder_factory: Arc<dyn EncoderFactory>,
    fallback: Arc<FallbackListener>,
    listener: Arc<dyn Listener>,
    output: OutputDestination,
    events: EventSender,

    pipelines: Vec<Arc<dyn SamplePipeline>>,
    progress_state: ProgressState,
    duration_ms: Option<u64>,
    high_water: Arc<AtomicU8>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    track_registered: bool,
    phase: Phase,
    released: bool,
}

impl TransformerInternal {
    pub(crate) fn new(
        params: InternalParams,
        events: EventSender,
    ) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let high_water = Arc::new(AtomicU8::new(0));
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::new(high_water.clone()));
        let fallback = Arc::new(FallbackListener::new(
            params.request.clone(),
            params.listener.clone(),
        ));
        let internal = Self {
            media_item: params.media_item,
            request: params.request,
            audio_processors: params.audio_processors,
            video_effects: params.video_effects,
            asset_loader: params.asset_loader,
            muxer: Arc::new(MuxerWrapper::new(params.muxer)),
            pipeline_factory: params.pipeline_factory,
            encoder_factory: params.encoder_factory,
            fallback,
            listener: params.listener,
            output: params.output,
            events,
            pipelines: Vec::new(),
            progress_state: ProgressState::NoTransformation,
            duration_ms: None,
            high_water,
            progress_tx,
            track_registered: false,
            phase: Phase::Idle,
            released: false,
        };
        (internal, progress_rx)
    }

    /// Drives the state machine until it finishes or `cancel` fires.
    pub(crate) async fn run(
        mut self,
        cancel: CancellationToken,
        mut rx: mpsc::UnboundedReceiver<Command>,
    ) {
        self.start();
        while !self.is_finished() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = self.release_externally(true) {
                        log::warn!("release on cancellation failed: {}", e);
                    }
                    break;
                },
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
        }
        log::debug!("transformer control task for {} stopped", self.media_item.uri);
    }

    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.phase, Phase::Idle, "transformer started twice");
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Loading;
        self.progress_state = ProgressState::WaitingForAvailability;
        self.publish_progress();
        log::info!("transforming {}", self.media_item.uri);

        if let Err(e) = self.asset_loader.start(self.events.clone()) {
            self.end(Some(TransformationError::classify(e)));
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub(crate) fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Event(event) => self.handle_event(event),
            Command::Release {
                for_cancellation,
                result,
            } => {
                let outcome = self.release_externally(for_cancellation);
                if result.send(outcome).is_err() {
                    log::debug!("release caller went away");
                }
            }
        }
    }

    fn handle_event(&mut self, event: AssetLoaderEvent) {
        if self.phase == Phase::Finished {
            log::debug!("ignoring {:?} after the transformation ended", event);
            if let AssetLoaderEvent::TrackAdded { result, .. } = event {
                let _ = result.send(Err(anyhow::anyhow!("transformation already ended")));
            }
            return;
        }

        match event {
            AssetLoaderEvent::DurationMs(duration_ms) => self.on_duration_ms(duration_ms),
            AssetLoaderEvent::TrackRegistered => {
                self.track_registered = true;
                if let Err(e) = self.muxer.register_track() {
                    self.end(Some(TransformationError::for_muxer(e)));
                    return;
                }
                self.fallback.register_track();
            }
            AssetLoaderEvent::AllTracksRegistered => {
                if !self.track_registered {
                    self.end(Some(TransformationError::no_output_tracks()));
                }
            }
            AssetLoaderEvent::TrackAdded {
                format,
                stream_start_position_us,
                stream_offset_us,
                result,
            } => match self.add_track(format, stream_start_position_us, stream_offset_us) {
                Ok(pipeline) => {
                    if result.send(Ok(pipeline)).is_err() {
                        log::debug!("asset loader stopped waiting for its pipeline");
                    }
                }
                Err(e) => {
                    let error = TransformationError::classify(e);
                    let _ = result.send(Err(anyhow::Error::new(error.clone())));
                    self.end(Some(error));
                }
            },
            AssetLoaderEvent::Error(e) => self.end(Some(TransformationError::classify(e))),
            AssetLoaderEvent::Ended => {
                let error = self.finish_tracks().err();
                self.end(error);
            }
        }
    }

    fn on_duration_ms(&mut self, duration_ms: Option<u64>) {
        if self.progress_state != ProgressState::WaitingForAvailability {
            return;
        }
        match duration_ms {
            Some(duration_ms) if duration_ms > 0 => {
                self.duration_ms = Some(duration_ms);
                self.progress_state = ProgressState::Available;
            }
            _ => self.progress_state = ProgressState::Unavailable,
        }
        log::debug!("source duration {:?}, progress {:?}", duration_ms, self.progress_state);
        self.publish_progress();
    }

    fn add_track(
        &mut self,
        format: TrackFormat,
        stream_start_position_us: i64,
        stream_offset_us: i64,
    ) -> anyhow::Result<Arc<dyn SamplePipeline>> {
        let muxer = self.muxer.clone();
        let supports = move |mime_type: &str| muxer.supports_sample_mime_type(mime_type);
        let ctx = SelectionContext {
            request: &self.request,
            audio_processors: &self.audio_processors,
            video_effects: &self.video_effects,
            starts_at_key_frame: self.media_item.clipping.starts_at_key_frame,
            encoder_factory: self.encoder_factory.as_ref(),
            supports_sample_mime_type: &supports,
        };
        let kind = select_pipeline(&format, stream_start_position_us, stream_offset_us, &ctx);
        let track_type = format.track_type();

        let params = PipelineParams {
            format,
            stream_start_position_us,
            stream_offset_us,
            request: self.request.clone(),
            audio_processors: self.audio_processors.clone(),
            video_effects: self.video_effects.clone(),
            muxer: self.muxer.clone(),
            fallback: self.fallback.clone(),
        };
        let pipeline = self
            .pipeline_factory
            .create(kind, params)
            .with_context(|| format!("failed to create {} pipeline for {} track", kind, track_type))?;

        self.pipelines.push(pipeline.clone());
        self.publish_progress();
        log::info!("{} track uses {} pipeline", track_type, kind);
        Ok(pipeline)
    }

    /// Ends pipelines the loader left open and checks that every registered
    /// track made it to the muxer.
    fn finish_tracks(&self) -> Result<(), TransformationError> {
        for pipeline in &self.pipelines {
            if !pipeline.is_ended() {
                log::debug!("ending {} pipeline left open by the loader", pipeline.kind());
                pipeline.end_of_input().map_err(TransformationError::classify)?;
            }
        }
        if !self.muxer.is_ended() {
            return Err(TransformationError::new(
                ErrorCode::MuxingFailed,
                format!(
                    "{} of {} registered tracks reached the output",
                    self.pipelines.len(),
                    self.muxer.registered_tracks()
                ),
            ));
        }
        Ok(())
    }

    /// Ends the run. Only the first call has an effect.
    fn end(&mut self, error: Option<TransformationError>) {
        if self.phase == Phase::Finished {
            return;
        }
        self.phase = Phase::Finished;

        let release_result = self.release(false);
        let error = match (error, release_result) {
            (Some(error), Err(release_error)) => {
                log::warn!("release after failure also failed: {}", release_error);
                Some(error)
            }
            (Some(error), Ok(())) => Some(error),
            (None, Err(release_error)) => Some(release_error),
            (None, Ok(())) => None,
        };

        match error {
            Some(error) => {
                log::error!("transformation of {} failed: {}", self.media_item.uri, error);
                self.listener.on_error(error);
            }
            None => {
                let result = self.build_result();
                log::info!("transformation of {} completed: {:?}", self.media_item.uri, result);
                self.listener.on_completed(result);
            }
        }
    }

    fn build_result(&self) -> TransformationResult {
        TransformationResult::builder()
            .duration_ms(self.muxer.duration_ms())
            .average_audio_bitrate(self.muxer.track_average_bitrate(TrackType::Audio))
            .average_video_bitrate(self.muxer.track_average_bitrate(TrackType::Video))
            .video_frame_count(self.muxer.track_sample_count(TrackType::Video))
            .file_size_bytes(self.output.current_size_bytes())
            .build()
    }

    /// Release requested by the owner of the transformer. A run that has not
    /// ended yet ends here with an error.
    pub(crate) fn release_externally(
        &mut self,
        for_cancellation: bool,
    ) -> Result<(), TransformationError> {
        let result = self.release(for_cancellation);
        if self.phase != Phase::Finished {
            self.phase = Phase::Finished;
            let error = match &result {
                Err(error) => error.clone(),
                Ok(()) => TransformationError::cancelled(),
            };
            log::info!("transformation of {} released: {}", self.media_item.uri, error);
            self.listener.on_error(error);
        }
        result
    }

    fn release(&mut self, for_cancellation: bool) -> Result<(), TransformationError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        for pipeline in self.pipelines.drain(..) {
            if let Err(e) = pipeline.release() {
                log::warn!("failed to release {} pipeline: {:#}", pipeline.kind(), e);
            }
        }
        self.progress_state = ProgressState::NoTransformation;
        self.publish_progress();
        self.asset_loader.release();
        self.muxer
            .release(for_cancellation)
            .map_err(TransformationError::for_muxer)
    }

    fn publish_progress(&self) {
        self.progress_tx.send_replace(ProgressSnapshot {
            state: self.progress_state,
            duration_ms: self.duration_ms,
            pipelines: self.pipelines.clone(),
            high_water: self.high_water.clone(),
        });
    }
}

#[cfg(test)]
#[path = "internal_test.rs"]
mod internal_test;
