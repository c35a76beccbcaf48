use std::collections::HashMap;
use std::sync::Arc;

use ffmpeg_next::format::stream::Disposition;
use ffmpeg_next::media::Type;
use ffmpeg_next::{Packet, Rational};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::sample_from_packet;
use super::stream::{start_time_us, track_format};
use crate::asset_loader::{AssetLoader, EventSender, MediaItem};
use crate::error::SourceError;
use crate::pipeline::SamplePipeline;

/// Reads a media file with libavformat and feeds the best audio and video
/// streams to their pipelines from a blocking thread.
pub struct FfmpegAssetLoader {
    media_item: MediaItem,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FfmpegAssetLoader {
    pub fn new(media_item: MediaItem) -> Self {
        Self {
            media_item,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

impl AssetLoader for FfmpegAssetLoader {
    fn start(&mut self, events: EventSender) -> anyhow::Result<()> {
        if self.handle.is_some() {
            anyhow::bail!("asset loader already started");
        }
        let media_item = self.media_item.clone();
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::task::spawn_blocking(move || {
            match read_media(&media_item, &cancel, &events) {
                Ok(()) => log::debug!("finished reading {}", media_item.uri),
                Err(e) if cancel.is_cancelled() => {
                    log::debug!("reading {} stopped: {:#}", media_item.uri, e)
                }
                Err(e) => events.on_error(e),
            }
        }));
        Ok(())
    }

    fn release(&mut self) {
        self.cancel.cancel();
    }
}

struct Track {
    pipeline: Arc<dyn SamplePipeline>,
    time_base: Rational,
    /// Source timestamp past which samples are cut, in microseconds.
    end_us: Option<i64>,
    ended: bool,
}

impl Track {
    fn end(&mut self) -> anyhow::Result<()> {
        if !self.ended {
            self.ended = true;
            self.pipeline.end_of_input()?;
        }
        Ok(())
    }
}

/// Duration of the output once clipping is applied.
fn clipped_duration_ms(source_ms: Option<u64>, start_ms: u64, end_ms: Option<u64>) -> Option<u64> {
    let end = match (source_ms, end_ms) {
        (Some(source), Some(end)) => source.min(end),
        (Some(source), None) => source,
        (None, Some(end)) => end,
        (None, None) => return None,
    };
    Some(end.saturating_sub(start_ms))
}

fn read_media(
    media_item: &MediaItem,
    cancel: &CancellationToken,
    events: &EventSender,
) -> anyhow::Result<()> {
    let mut input = ffmpeg_next::format::input(&media_item.uri).map_err(|e| SourceError::Open {
        uri: media_item.uri.clone(),
        reason: e.to_string(),
    })?;

    let source_ms = (input.duration() > 0).then(|| (input.duration() / 1_000) as u64);
    let clipping = &media_item.clipping;
    events.on_duration_ms(clipped_duration_ms(
        source_ms,
        clipping.start_position_ms,
        clipping.end_position_ms,
    ));

    let container_tags: Vec<(String, String)> = input
        .metadata()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut wanted = Vec::new();
    if !media_item.remove_audio {
        wanted.push(Type::Audio);
    }
    if !media_item.remove_video {
        wanted.push(Type::Video);
    }
    let mut selected = Vec::new();
    for medium in wanted {
        let Some(stream) = input.streams().best(medium) else {
            continue;
        };
        if stream.disposition().contains(Disposition::ATTACHED_PIC) {
            log::debug!("skipping attached picture stream {}", stream.index());
            continue;
        }
        let format = track_format(&stream, &container_tags);
        log::info!(
            "{} stream {}: {}",
            medium_name(medium),
            stream.index(),
            format.sample_mime_type
        );
        selected.push((stream.index(), stream.time_base(), start_time_us(&stream), format));
    }

    for _ in &selected {
        events.on_track_registered();
    }
    events.on_all_tracks_registered();

    let clip_start_us = clipping.start_position_ms as i64 * 1_000;
    let mut tracks: HashMap<usize, Track> = HashMap::new();
    for (index, time_base, offset_us, format) in selected {
        let pipeline = events.blocking_on_track_added(format, offset_us + clip_start_us, offset_us)?;
        tracks.insert(
            index,
            Track {
                pipeline,
                time_base,
                end_us: clipping.end_position_ms.map(|end| offset_us + end as i64 * 1_000),
                ended: false,
            },
        );
    }
    if tracks.is_empty() {
        return Ok(());
    }

    if clip_start_us > 0 {
        input
            .seek(clip_start_us, ..clip_start_us)
            .map_err(|e| SourceError::Seek {
                position_ms: clipping.start_position_ms,
                reason: e.to_string(),
            })?;
    }

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let mut packet = Packet::empty();
        match packet.read(&mut input) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => break,
            Err(e) => return Err(SourceError::Read(e.to_string()).into()),
        }
        let Some(track) = tracks.get_mut(&packet.stream()) else {
            continue;
        };
        if track.ended {
            continue;
        }
        let sample = sample_from_packet(&packet, track.time_base);
        if track.end_us.is_some_and(|end| sample.pts_us >= end) {
            track.end()?;
            if tracks.values().all(|t| t.ended) {
                break;
            }
            continue;
        }
        track.pipeline.queue_input(sample)?;
    }

    for track in tracks.values_mut() {
        track.end()?;
    }
    events.on_ended();
    Ok(())
}

fn medium_name(medium: Type) -> &'static str {
    match medium {
        Type::Audio => "audio",
        Type::Video => "video",
        _ => "other",
    }
}
