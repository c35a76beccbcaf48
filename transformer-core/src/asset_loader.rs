use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::format::TrackFormat;
use crate::internal::Command;
use crate::pipeline::SamplePipeline;

/// Portion of the source to transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClippingConfiguration {
    pub start_position_ms: u64,
    pub end_position_ms: Option<u64>,
    /// Whether the caller guarantees that the start position falls on a key
    /// frame, so clipped video can still be copied without re-encoding.
    pub starts_at_key_frame: bool,
}

/// Source to transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub uri: String,
    pub clipping: ClippingConfiguration,
    pub remove_audio: bool,
    pub remove_video: bool,
}

impl MediaItem {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            clipping: ClippingConfiguration::default(),
            remove_audio: false,
            remove_video: false,
        }
    }

    pub fn with_clipping(mut self, clipping: ClippingConfiguration) -> Self {
        self.clipping = clipping;
        self
    }

    pub fn with_remove_audio(mut self, remove: bool) -> Self {
        self.remove_audio = remove;
        self
    }

    pub fn with_remove_video(mut self, remove: bool) -> Self {
        self.remove_video = remove;
        self
    }
}

/// Events an asset loader reports, in the order it reports them.
pub enum AssetLoaderEvent {
    /// Duration of the source, `None` if unknown.
    DurationMs(Option<u64>),
    TrackRegistered,
    AllTracksRegistered,
    /// A track is ready for samples. The pipeline built for it is sent back
    /// through `result`.
    TrackAdded {
        format: TrackFormat,
        stream_start_position_us: i64,
        stream_offset_us: i64,
        result: oneshot::Sender<anyhow::Result<Arc<dyn SamplePipeline>>>,
    },
    Error(anyhow::Error),
    /// Every track has been fully fed to its pipeline.
    Ended,
}

impl std::fmt::Debug for AssetLoaderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetLoaderEvent::DurationMs(d) => f.debug_tuple("DurationMs").field(d).finish(),
            AssetLoaderEvent::TrackRegistered => f.write_str("TrackRegistered"),
            AssetLoaderEvent::AllTracksRegistered => f.write_str("AllTracksRegistered"),
            AssetLoaderEvent::TrackAdded {
                format,
                stream_start_position_us,
                stream_offset_us,
                ..
            } => f
                .debug_struct("TrackAdded")
                .field("mime", &format.sample_mime_type)
                .field("stream_start_position_us", stream_start_position_us)
                .field("stream_offset_us", stream_offset_us)
                .finish(),
            AssetLoaderEvent::Error(e) => f.debug_tuple("Error").field(e).finish(),
            AssetLoaderEvent::Ended => f.write_str("Ended"),
        }
    }
}

/// Handle through which an asset loader reports to the transformer. Cheap
/// to clone and usable from any thread.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    fn send(&self, event: AssetLoaderEvent) {
        if self.tx.send(Command::Event(event)).is_err() {
            log::debug!("transformer stopped, asset loader event dropped");
        }
    }

    pub fn on_duration_ms(&self, duration_ms: Option<u64>) {
        self.send(AssetLoaderEvent::DurationMs(duration_ms));
    }

    pub fn on_track_registered(&self) {
        self.send(AssetLoaderEvent::TrackRegistered);
    }

    pub fn on_all_tracks_registered(&self) {
        self.send(AssetLoaderEvent::AllTracksRegistered);
    }

    fn track_added(
        &self,
        format: TrackFormat,
        stream_start_position_us: i64,
        stream_offset_us: i64,
    ) -> oneshot::Receiver<anyhow::Result<Arc<dyn SamplePipeline>>> {
        let (result, rx) = oneshot::channel();
        self.send(AssetLoaderEvent::TrackAdded {
            format,
            stream_start_position_us,
            stream_offset_us,
            result,
        });
        rx
    }

    /// Reports a track and waits for the pipeline that will consume it.
    pub async fn on_track_added(
        &self,
        format: TrackFormat,
        stream_start_position_us: i64,
        stream_offset_us: i64,
    ) -> anyhow::Result<Arc<dyn SamplePipeline>> {
        self.track_added(format, stream_start_position_us, stream_offset_us)
            .await
            .map_err(|_| anyhow::anyhow!("transformer stopped before the track was handled"))?
    }

    /// Same as [`on_track_added`](Self::on_track_added) for loaders running
    /// on a blocking thread. Must not be called from an async context.
    pub fn blocking_on_track_added(
        &self,
        format: TrackFormat,
        stream_start_position_us: i64,
        stream_offset_us: i64,
    ) -> anyhow::Result<Arc<dyn SamplePipeline>> {
        self.track_added(format, stream_start_position_us, stream_offset_us)
            .blocking_recv()
            .map_err(|_| anyhow::anyhow!("transformer stopped before the track was handled"))?
    }

    pub fn on_error(&self, error: anyhow::Error) {
        self.send(AssetLoaderEvent::Error(error));
    }

    pub fn on_ended(&self) {
        self.send(AssetLoaderEvent::Ended);
    }
}

/// Reads a media item and feeds its tracks to the transformer.
///
/// `start` is called once from the control task and must not block; the
/// actual reading happens on the loader's own tasks or threads, which report
/// through the [`EventSender`]. Expected sequence: duration, one
/// `TrackRegistered` per track, `AllTracksRegistered`, one `TrackAdded` per
/// track, samples, then `Ended` (or `Error` at any point).
pub trait AssetLoader: Send {
    fn start(&mut self, events: EventSender) -> anyhow::Result<()>;

    /// Stops reading and frees the source. Called once, from the control
    /// task, whether or not the run succeeded.
    fn release(&mut self);
}
