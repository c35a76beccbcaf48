use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use transformer_core::{ClippingConfiguration, Effect, HdrMode, MediaItem, TransformationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HdrModeArg {
    /// Keep HDR content as it is.
    Keep,
    /// Tone map HDR content to SDR.
    ToneMap,
    /// Decode HDR content as if it were SDR.
    ForceSdr,
}

impl From<HdrModeArg> for HdrMode {
    fn from(arg: HdrModeArg) -> Self {
        match arg {
            HdrModeArg::Keep => HdrMode::KeepHdr,
            HdrModeArg::ToneMap => HdrMode::ToneMapHdrToSdr,
            HdrModeArg::ForceSdr => HdrMode::ExperimentalForceInterpretHdrAsSdr,
        }
    }
}

/// Transforms a media file: remux when possible, re-encode when needed.
#[derive(Parser, Debug)]
#[command(name = "transformer", version)]
pub struct Args {
    /// Input media file.
    pub input: PathBuf,

    /// Output file. The container follows the extension.
    pub output: PathBuf,

    /// JSON file with a transformation request. Flags override its values.
    #[arg(long)]
    pub request: Option<PathBuf>,

    /// Output audio MIME type, e.g. audio/mp4a-latm.
    #[arg(long)]
    pub audio_mime: Option<String>,

    /// Output video MIME type, e.g. video/hevc.
    #[arg(long)]
    pub video_mime: Option<String>,

    #[arg(long, value_enum)]
    pub hdr_mode: Option<HdrModeArg>,

    /// Counterclockwise rotation in degrees.
    #[arg(long, allow_hyphen_values = true)]
    pub rotate: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    pub scale_x: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    pub scale_y: Option<f32>,

    /// Output height in pixels. The width keeps the aspect ratio.
    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long, default_value_t = false)]
    pub flatten_slow_motion: bool,

    /// libavfilter audio filter, e.g. `volume=0.5`. Repeatable.
    #[arg(long = "audio-filter")]
    pub audio_filters: Vec<String>,

    /// libavfilter video filter, e.g. `hflip`. Repeatable.
    #[arg(long = "video-filter")]
    pub video_filters: Vec<String>,

    #[arg(long)]
    pub clip_start_ms: Option<u64>,

    #[arg(long)]
    pub clip_end_ms: Option<u64>,

    /// The clip start falls on a key frame, so video can still be copied.
    #[arg(long, default_value_t = false)]
    pub starts_at_key_frame: bool,

    #[arg(long, default_value_t = false)]
    pub no_audio: bool,

    #[arg(long, default_value_t = false)]
    pub no_video: bool,

    #[arg(long, default_value_t = false)]
    pub force_audio_encode: bool,

    #[arg(long, default_value_t = false)]
    pub force_video_encode: bool,

    /// How often progress is logged.
    #[arg(long, default_value_t = 500)]
    pub progress_interval_ms: u64,
}

impl Args {
    /// The request file, if any, with the flags applied on top.
    pub fn transformation_request(&self) -> anyhow::Result<TransformationRequest> {
        let base = match &self.request {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read request {}", path.display()))?;
                serde_json::from_str::<TransformationRequest>(&json)
                    .with_context(|| format!("invalid request {}", path.display()))?
            }
            None => TransformationRequest::default(),
        };

        let mut builder = base.to_builder();
        if let Some(mime_type) = &self.audio_mime {
            builder = builder.audio_mime_type(mime_type.clone());
        }
        if let Some(mime_type) = &self.video_mime {
            builder = builder.video_mime_type(mime_type.clone());
        }
        if let Some(hdr_mode) = self.hdr_mode {
            builder = builder.hdr_mode(hdr_mode.into());
        }
        if let Some(degrees) = self.rotate {
            builder = builder.rotation_degrees(degrees);
        }
        if self.scale_x.is_some() || self.scale_y.is_some() {
            builder = builder.scale(
                self.scale_x.unwrap_or(base.scale_x),
                self.scale_y.unwrap_or(base.scale_y),
            );
        }
        if let Some(height) = self.height {
            builder = builder.output_height(height);
        }
        if self.flatten_slow_motion {
            builder = builder.flatten_for_slow_motion(true);
        }
        builder.build()
    }

    pub fn media_item(&self) -> anyhow::Result<MediaItem> {
        let start_position_ms = self.clip_start_ms.unwrap_or(0);
        if let Some(end) = self.clip_end_ms {
            if end <= start_position_ms {
                anyhow::bail!("clip end {}ms is not after clip start {}ms", end, start_position_ms);
            }
        }
        if self.no_audio && self.no_video {
            anyhow::bail!("--no-audio and --no-video leave nothing to transform");
        }
        Ok(MediaItem::new(self.input.to_string_lossy())
            .with_clipping(ClippingConfiguration {
                start_position_ms,
                end_position_ms: self.clip_end_ms,
                starts_at_key_frame: self.starts_at_key_frame,
            })
            .with_remove_audio(self.no_audio)
            .with_remove_video(self.no_video))
    }

    pub fn audio_processors(&self) -> Vec<Effect> {
        self.audio_filters.iter().map(|f| Effect::new(f.as_str())).collect()
    }

    pub fn video_effects(&self) -> Vec<Effect> {
        self.video_filters.iter().map(|f| Effect::new(f.as_str())).collect()
    }
}
