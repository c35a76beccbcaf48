use std::sync::Arc;

use parking_lot::Mutex;

use crate::listener::Listener;
use crate::request::TransformationRequest;

/// Merges the parameters every track pipeline ends up applying and tells
/// the listener when they differ from the request.
pub struct FallbackListener {
    original: TransformationRequest,
    listener: Arc<dyn Listener>,
    state: Mutex<FallbackState>,
}

struct FallbackState {
    fallback: TransformationRequest,
    pending_tracks: usize,
}

impl FallbackListener {
    pub fn new(original: TransformationRequest, listener: Arc<dyn Listener>) -> Self {
        let fallback = original.clone();
        Self {
            original,
            listener,
            state: Mutex::new(FallbackState {
                fallback,
                pending_tracks: 0,
            }),
        }
    }

    /// Expects one more call to
    /// [`on_transformation_request_finalized`](Self::on_transformation_request_finalized).
    pub fn register_track(&self) {
        self.state.lock().pending_tracks += 1;
    }

    /// Records the request a track pipeline settled on.
    ///
    /// Only the fields a pipeline can change are merged. Once every
    /// registered track has reported, the listener is notified if the merged
    /// request differs from the original.
    pub fn on_transformation_request_finalized(
        &self,
        applied: &TransformationRequest,
    ) -> anyhow::Result<()> {
        let notify = {
            let mut state = self.state.lock();
            if state.pending_tracks == 0 {
                anyhow::bail!("transformation request finalized for an unregistered track");
            }
            state.pending_tracks -= 1;

            let fallback = &mut state.fallback;
            if applied.audio_mime_type != self.original.audio_mime_type {
                fallback.audio_mime_type = applied.audio_mime_type.clone();
            }
            if applied.video_mime_type != self.original.video_mime_type {
                fallback.video_mime_type = applied.video_mime_type.clone();
            }
            if applied.output_height != self.original.output_height {
                fallback.output_height = applied.output_height;
            }
            if applied.hdr_mode != self.original.hdr_mode {
                fallback.hdr_mode = applied.hdr_mode;
            }

            if state.pending_tracks == 0 && state.fallback != self.original {
                Some(state.fallback.clone())
            } else {
                None
            }
        };

        if let Some(fallback) = notify {
            self.listener.on_fallback_applied(&self.original, &fallback);
        }
        Ok(())
    }

    pub fn pending_tracks(&self) -> usize {
        self.state.lock().pending_tracks
    }
}
