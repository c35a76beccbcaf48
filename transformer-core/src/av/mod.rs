//! FFmpeg-backed collaborators: asset loader, container muxer and the
//! audio/video transcoding pipelines.

pub mod codec;
mod decoder;
pub mod encoder;
pub mod factory;
mod filter;
pub mod hw;
pub mod input;
pub mod output;
pub mod stream;
mod transcode;

pub use encoder::FfmpegEncoderFactory;
pub use factory::FfmpegPipelineFactory;
pub use input::FfmpegAssetLoader;
pub use output::AvMuxer;

/// Time base of every timestamp exchanged with the core.
pub(crate) const MICROS: ffmpeg_next::Rational = ffmpeg_next::Rational(1, 1_000_000);
