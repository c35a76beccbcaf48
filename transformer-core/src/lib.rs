//! Orchestration of media transformations.
//!
//! A [`Transformer`] takes a media item from an [`AssetLoader`], decides for
//! every track whether its samples can be copied into the output container
//! unchanged or must be re-encoded, drives the selected [`SamplePipeline`]s
//! and reports exactly one terminal result (or error) to a [`Listener`].
//!
//! The demuxer, codecs and container writer are collaborators behind traits.
//! FFmpeg-backed implementations live in [`av`] behind the `ffmpeg` feature.

/// Registers FFmpeg components. Call once at startup before using [`av`].
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod asset_loader;
#[cfg(feature = "ffmpeg")]
pub mod av;
pub mod effect;
pub mod error;
pub mod fallback;
pub mod format;
pub mod geometry;
mod internal;
pub mod listener;
pub mod muxer;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod result;
pub mod selection;
#[cfg(test)]
mod testing;
pub mod transformer;

pub use asset_loader::{AssetLoader, AssetLoaderEvent, ClippingConfiguration, EventSender, MediaItem};
pub use effect::Effect;
pub use error::{ErrorCode, MuxerError, SourceError, TransformationError};
pub use fallback::FallbackListener;
pub use format::{MetadataEntry, SlowMotionSegment, TrackFormat, TrackType};
pub use listener::{ChannelListener, Listener, LogListener, Outcome};
pub use muxer::{Muxer, MuxerWrapper};
pub use output::OutputDestination;
pub use pipeline::{
    PassthroughSamplePipeline, PipelineFactory, PipelineKind, PipelineParams, Sample,
    SamplePipeline,
};
pub use progress::{Progress, ProgressState};
pub use request::{HdrMode, TransformationRequest, TransformationRequestBuilder};
pub use result::{TransformationResult, TransformationResultBuilder};
pub use selection::{DefaultEncoderFactory, EncoderFactory, SelectionContext, TranscodeReason};
pub use transformer::{Transformer, TransformerBuilder};
