use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::MuxerError;
use crate::format::{TrackFormat, TrackType, mime};
use crate::pipeline::Sample;

/// Container writer.
pub trait Muxer: Send {
    /// Sample MIME types the container can carry for `track_type`.
    fn supported_sample_mime_types(&self, track_type: TrackType) -> Vec<String>;

    /// Adds a track and returns the index to write its samples with.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError>;

    fn write_sample(&mut self, track_index: usize, sample: &Sample) -> Result<(), MuxerError>;

    /// Finishes the container. A muxer that never received a sample is in an
    /// invalid state; it reports that as an error unless `for_cancellation`.
    fn release(&mut self, for_cancellation: bool) -> Result<(), MuxerError>;
}

#[derive(Debug)]
struct TrackInfo {
    index: usize,
    sample_count: u64,
    bytes_written: u64,
    end_time_us: i64,
    ended: bool,
}

struct MuxerState {
    muxer: Box<dyn Muxer>,
    registered_tracks: usize,
    tracks: HashMap<TrackType, TrackInfo>,
    released: bool,
}

/// Shared front of a [`Muxer`] used by every track pipeline.
///
/// Tracks are registered first, while the source is being inspected, then
/// added with their format once the pipeline for the track exists. Samples
/// are only accepted once every registered track has been added, so the
/// container header can be written with the complete track list.
pub struct MuxerWrapper {
    state: Mutex<MuxerState>,
}

impl MuxerWrapper {
    pub fn new(muxer: Box<dyn Muxer>) -> Self {
        Self {
            state: Mutex::new(MuxerState {
                muxer,
                registered_tracks: 0,
                tracks: HashMap::new(),
                released: false,
            }),
        }
    }

    pub fn register_track(&self) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if !state.tracks.is_empty() {
            return Err(MuxerError::InvalidState(
                "cannot register a track after a track format was added".into(),
            ));
        }
        state.registered_tracks += 1;
        Ok(())
    }

    pub fn registered_tracks(&self) -> usize {
        self.state.lock().registered_tracks
    }

    pub fn supports_sample_mime_type(&self, mime_type: &str) -> bool {
        let track_type = mime::track_type(mime_type);
        self.state
            .lock()
            .muxer
            .supported_sample_mime_types(track_type)
            .iter()
            .any(|supported| supported == mime_type)
    }

    pub fn add_track_format(&self, format: &TrackFormat) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if state.released {
            return Err(MuxerError::InvalidState("muxer released".into()));
        }
        let track_type = format.track_type();
        if state.tracks.len() >= state.registered_tracks {
            return Err(MuxerError::InvalidState(format!(
                "all {} registered tracks already added",
                state.registered_tracks
            )));
        }
        if state.tracks.contains_key(&track_type) {
            return Err(MuxerError::InvalidState(format!(
                "{} track already added",
                track_type
            )));
        }
        let index = state.muxer.add_track(format)?;
        log::debug!(
            "muxer track {} added: {} ({})",
            index,
            track_type,
            format.sample_mime_type
        );
        state.tracks.insert(
            track_type,
            TrackInfo {
                index,
                sample_count: 0,
                bytes_written: 0,
                end_time_us: 0,
                ended: false,
            },
        );
        Ok(())
    }

    /// Writes a sample of the track of type `track_type`.
    pub fn write_sample(&self, track_type: TrackType, sample: &Sample) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if state.released {
            return Err(MuxerError::InvalidState("muxer released".into()));
        }
        if state.tracks.len() < state.registered_tracks {
            return Err(MuxerError::InvalidState(format!(
                "{} of {} registered tracks added",
                state.tracks.len(),
                state.registered_tracks
            )));
        }
        let MuxerState { muxer, tracks, .. } = &mut *state;
        let track = tracks.get_mut(&track_type).ok_or_else(|| {
            MuxerError::InvalidState(format!("no {} track added", track_type))
        })?;
        if track.ended {
            return Err(MuxerError::InvalidState(format!("{} track already ended", track_type)));
        }
        muxer.write_sample(track.index, sample)?;
        track.sample_count += 1;
        track.bytes_written += sample.data.len() as u64;
        track.end_time_us = track
            .end_time_us
            .max(sample.pts_us.saturating_add(sample.duration_us.max(0)));
        Ok(())
    }

    pub fn end_track(&self, track_type: TrackType) {
        if let Some(track) = self.state.lock().tracks.get_mut(&track_type) {
            track.ended = true;
        }
    }

    /// Whether every registered track was added and ended.
    pub fn is_ended(&self) -> bool {
        let state = self.state.lock();
        state.registered_tracks > 0
            && state.tracks.len() == state.registered_tracks
            && state.tracks.values().all(|t| t.ended)
    }

    /// End time of the longest track, or `None` if nothing was written.
    pub fn duration_ms(&self) -> Option<u64> {
        let state = self.state.lock();
        state
            .tracks
            .values()
            .filter(|t| t.sample_count > 0)
            .map(|t| (t.end_time_us.max(0) / 1_000) as u64)
            .max()
    }

    /// Average bitrate in bits per second of the track of type `track_type`.
    pub fn track_average_bitrate(&self, track_type: TrackType) -> Option<u32> {
        let state = self.state.lock();
        let track = state.tracks.get(&track_type)?;
        if track.end_time_us <= 0 || track.bytes_written == 0 {
            return None;
        }
        let bitrate =
            u128::from(track.bytes_written) * 8 * 1_000_000 / track.end_time_us as u128;
        u32::try_from(bitrate).ok()
    }

    pub fn track_sample_count(&self, track_type: TrackType) -> u64 {
        self.state
            .lock()
            .tracks
            .get(&track_type)
            .map(|t| t.sample_count)
            .unwrap_or(0)
    }

    /// Releases the underlying muxer. Calling it again is a no-op. Track
    /// statistics stay readable afterwards.
    pub fn release(&self, for_cancellation: bool) -> Result<(), MuxerError> {
        let mut state = self.state.lock();
        if state.released {
            return Ok(());
        }
        state.released = true;
        state.muxer.release(for_cancellation)
    }
}

#[cfg(test)]
#[path = "muxer_test.rs"]
mod muxer_test;
