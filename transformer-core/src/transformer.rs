use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::asset_loader::{AssetLoader, EventSender, MediaItem};
use crate::effect::Effect;
use crate::error::TransformationError;
use crate::internal::{Command, InternalParams, TransformerInternal};
use crate::listener::{Listener, LogListener};
use crate::muxer::Muxer;
use crate::output::OutputDestination;
use crate::pipeline::PipelineFactory;
use crate::progress::{Progress, ProgressSnapshot};
use crate::request::TransformationRequest;
use crate::selection::{DefaultEncoderFactory, EncoderFactory};

pub struct TransformerBuilder {
    media_item: MediaItem,
    asset_loader: Box<dyn AssetLoader>,
    muxer: Box<dyn Muxer>,
    pipeline_factory: Arc<dyn PipelineFactory>,
    output: OutputDestination,
    request: TransformationRequest,
    audio_processors: Vec<Effect>,
    video_effects: Vec<Effect>,
    encoder_factory: Arc<dyn EncoderFactory>,
    listener: Arc<dyn Listener>,
}

impl TransformerBuilder {
    pub fn new(
        media_item: MediaItem,
        asset_loader: Box<dyn AssetLoader>,
        muxer: Box<dyn Muxer>,
        pipeline_factory: Arc<dyn PipelineFactory>,
        output: OutputDestination,
    ) -> Self {
        Self {
            media_item,
            asset_loader,
            muxer,
            pipeline_factory,
            output,
            request: TransformationRequest::default(),
            audio_processors: Vec::new(),
            video_effects: Vec::new(),
            encoder_factory: Arc::new(DefaultEncoderFactory::default()),
            listener: Arc::new(LogListener),
        }
    }

    pub fn request(mut self, request: TransformationRequest) -> Self {
        self.request = request;
        self
    }

    pub fn audio_processors(mut self, processors: Vec<Effect>) -> Self {
        self.audio_processors = processors;
        self
    }

    pub fn video_effects(mut self, effects: Vec<Effect>) -> Self {
        self.video_effects = effects;
        self
    }

    pub fn encoder_factory(mut self, encoder_factory: Arc<dyn EncoderFactory>) -> Self {
        self.encoder_factory = encoder_factory;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = listener;
        self
    }

    /// Starts the transformation on the current tokio runtime.
    pub fn start(self) -> Transformer {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (internal, progress) = TransformerInternal::new(
            InternalParams {
                media_item: self.media_item,
                request: self.request,
                audio_processors: self.audio_processors,
                video_effects: self.video_effects,
                asset_loader: self.asset_loader,
                muxer: self.muxer,
                pipeline_factory: self.pipeline_factory,
                encoder_factory: self.encoder_factory,
                listener: self.listener,
                output: self.output,
            },
            EventSender::new(tx.clone()),
        );

        let cancel_clone = cancel.clone();
        tokio::spawn(async move { internal.run(cancel_clone, rx).await });

        Transformer {
            cancel,
            tx,
            progress,
        }
    }
}

/// Handle to a running transformation. Dropping it cancels the run.
pub struct Transformer {
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Command>,
    progress: watch::Receiver<ProgressSnapshot>,
}

impl Transformer {
    /// Current progress. Never blocks.
    pub fn progress(&self) -> Progress {
        self.progress.borrow().progress()
    }

    /// Releases all resources. A run that has not ended yet ends with a
    /// [`Cancelled`](crate::ErrorCode::Cancelled) error, or with the release
    /// error if releasing failed. Calling it after the run ended, or twice,
    /// is a no-op.
    pub async fn release(&self, for_cancellation: bool) -> Result<(), TransformationError> {
        let (result, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Release {
                for_cancellation,
                result,
            })
            .is_err()
        {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

impl Drop for Transformer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "transformer_test.rs"]
mod transformer_test;
