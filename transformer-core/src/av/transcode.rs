//! Decode, filter and re-encode pipelines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use ffmpeg_next::util::mathematics::Rescale;
use ffmpeg_next::{Packet, Rational, codec, frame, picture};
use parking_lot::Mutex;

use super::MICROS;
use super::codec::{extradata_of_context, sample_from_packet};
use super::decoder::Decoder;
use super::encoder::{AudioEncoder, AudioSettings, FfmpegEncoderFactory, VideoEncoder, VideoSettings};
use super::filter::{self, FilterGraph};
use crate::effect::Effect;
use crate::error::{ErrorCode, TransformationError};
use crate::format::{TrackFormat, TrackType, mime};
use crate::geometry::{FrameSize, output_frame_size};
use crate::muxer::MuxerWrapper;
use crate::pipeline::{PipelineKind, PipelineParams, SamplePipeline};
use crate::request::{HdrMode, TransformationRequest};

fn failed(code: ErrorCode, what: &'static str) -> impl FnOnce(anyhow::Error) -> anyhow::Error {
    move |e| TransformationError::with_cause(code, what, e).into()
}

/// MIME type to encode to: the requested one, else the source one, as long
/// as the container takes it.
fn output_mime_type(requested: Option<&str>, source: &str, default: &str, muxer: &MuxerWrapper) -> String {
    let wanted = requested.unwrap_or(source);
    if muxer.supports_sample_mime_type(wanted) {
        wanted.to_string()
    } else {
        log::warn!("container does not take {}, encoding {} instead", wanted, default);
        default.to_string()
    }
}

/// Where encoded samples go.
struct Output<'a> {
    track_type: TrackType,
    muxer: &'a MuxerWrapper,
    position_us: &'a AtomicI64,
}

impl Output<'_> {
    /// Moves every packet the encoder has ready to the muxer.
    fn drain(
        &self,
        encoder: &mut codec::encoder::Encoder,
        time_base: Rational,
        default_duration_us: i64,
    ) -> anyhow::Result<()> {
        loop {
            let mut packet = Packet::empty();
            match encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let mut sample = sample_from_packet(&packet, time_base);
                    if sample.duration_us <= 0 {
                        sample.duration_us = default_duration_us;
                    }
                    self.muxer.write_sample(self.track_type, &sample)?;
                    self.position_us.fetch_max(sample.pts_us, Ordering::AcqRel);
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                    return Ok(());
                }
                Err(e) => return Err(failed(ErrorCode::EncodingFailed, "failed to encode")(e.into())),
            }
        }
    }
}

struct VideoState {
    decoder: Decoder,
    encoder: VideoEncoder,
    filter: Option<FilterGraph>,
    format: TrackFormat,
    request: TransformationRequest,
    effects: Vec<Effect>,
    output: FrameSize,
    stream_start_position_us: i64,
    frame_duration_us: i64,
    last_pts: Option<i64>,
}

impl VideoState {
    fn drain_decoder(&mut self, out: &Output<'_>) -> anyhow::Result<()> {
        while let Some(mut decoded) = self
            .decoder
            .receive_video()
            .map_err(failed(ErrorCode::DecodingFailed, "failed to decode video"))?
        {
            let Some(pts) = decoded.pts() else {
                continue;
            };
            if pts < self.stream_start_position_us {
                continue;
            }
            decoded.set_pts(Some(pts - self.stream_start_position_us));

            if self.filter.is_none() {
                let chain = filter::video_filter_chain(
                    &self.format,
                    &self.request,
                    &self.effects,
                    self.output,
                    self.request.hdr_mode,
                    filter::is_hdr(&decoded),
                    &filter::pixel_format_name(self.encoder.pixel_format),
                );
                self.filter = Some(
                    FilterGraph::video(&decoded, &chain)
                        .map_err(failed(ErrorCode::ProcessingFailed, "failed to set up video effects"))?,
                );
            }
            if let Some(graph) = self.filter.as_mut() {
                graph
                    .push(&decoded)
                    .map_err(failed(ErrorCode::ProcessingFailed, "failed to apply video effects"))?;
            }
            self.drain_filter(out)?;
        }
        Ok(())
    }

    fn drain_filter(&mut self, out: &Output<'_>) -> anyhow::Result<()> {
        let Some(graph) = self.filter.as_mut() else {
            return Ok(());
        };
        loop {
            let mut filtered = frame::Video::empty();
            let ready = graph
                .pull(&mut filtered)
                .map_err(failed(ErrorCode::ProcessingFailed, "failed to apply video effects"))?;
            if !ready {
                return Ok(());
            }
            // encoders reject repeated timestamps
            let mut pts = filtered.pts().unwrap_or(0).rescale(MICROS, self.encoder.time_base);
            if let Some(last) = self.last_pts {
                pts = pts.max(last + 1);
            }
            self.last_pts = Some(pts);
            filtered.set_pts(Some(pts));
            filtered.set_kind(picture::Type::None);

            self.encoder
                .encoder
                .send_frame(&filtered)
                .map_err(|e| failed(ErrorCode::EncodingFailed, "failed to encode video")(e.into()))?;
            out.drain(&mut self.encoder.encoder, self.encoder.time_base, self.frame_duration_us)?;
        }
    }

    fn finish(&mut self, out: &Output<'_>) -> anyhow::Result<()> {
        self.decoder
            .send_eof()
            .map_err(failed(ErrorCode::DecodingFailed, "failed to flush video decoder"))?;
        self.drain_decoder(out)?;
        if let Some(graph) = self.filter.as_mut() {
            graph
                .flush()
                .map_err(failed(ErrorCode::ProcessingFailed, "failed to flush video effects"))?;
        }
        self.drain_filter(out)?;
        self.encoder
            .encoder
            .send_eof()
            .map_err(|e| failed(ErrorCode::EncodingFailed, "failed to flush video encoder")(e.into()))?;
        out.drain(&mut self.encoder.encoder, self.encoder.time_base, self.frame_duration_us)
    }
}

/// Re-encodes a video track, applying geometry, HDR handling and effects.
pub(crate) struct VideoTranscodeSamplePipeline {
    state: Mutex<VideoState>,
    muxer: Arc<MuxerWrapper>,
    position_us: AtomicI64,
    ended: AtomicBool,
    released: AtomicBool,
}

impl VideoTranscodeSamplePipeline {
    pub fn new(params: PipelineParams, encoders: &FfmpegEncoderFactory) -> anyhow::Result<Self> {
        let format = params.format;
        let output = output_frame_size(&format, &params.request).ok_or_else(|| {
            TransformationError::new(
                ErrorCode::DecoderInitFailed,
                format!("{} track has no frame size", format.sample_mime_type),
            )
        })?;
        let decoder = Decoder::new(&format)
            .map_err(failed(ErrorCode::DecoderInitFailed, "failed to open video decoder"))?;

        let mime_type = output_mime_type(
            params.request.video_mime_type.as_deref(),
            &format.sample_mime_type,
            mime::VIDEO_H264,
            &params.muxer,
        );
        let encoder = encoders.open_video_encoder(
            &mime_type,
            VideoSettings {
                width: output.width,
                height: output.height,
                frame_rate: format.frame_rate,
                bitrate: format.average_bitrate,
            },
        )?;

        let mut applied = params.request.clone();
        if applied.video_mime_type.is_some() || encoder.mime_type != format.sample_mime_type {
            applied.video_mime_type = Some(encoder.mime_type.clone());
        }
        if applied.output_height.is_some() {
            applied.output_height = Some(output.height);
        }
        if applied.hdr_mode == HdrMode::ToneMapHdrToSdr && !filter::tone_mapping_available() {
            log::warn!("tone mapping filters unavailable, keeping HDR");
            applied.hdr_mode = HdrMode::KeepHdr;
        }
        if applied.flatten_for_slow_motion && format.is_slow_motion() {
            log::debug!("slow motion track re-encoded at its recorded timing");
        }

        let frame_rate = f64::from(encoder.frame_rate);
        let mut output_format = TrackFormat::video(encoder.mime_type.clone(), output.width, output.height);
        output_format.frame_rate = Some(frame_rate as f32);
        output_format.average_bitrate = format.average_bitrate;
        output_format.initialization_data = extradata_of_context(&encoder.encoder);
        params.muxer.add_track_format(&output_format)?;
        params.fallback.on_transformation_request_finalized(&applied)?;
        log::info!(
            "video transcode {} -> {} ({}) {}x{}",
            format.sample_mime_type,
            encoder.mime_type,
            encoder.codec_name,
            output.width,
            output.height
        );

        Ok(Self {
            state: Mutex::new(VideoState {
                decoder,
                frame_duration_us: (1_000_000.0 / frame_rate.max(1.0)) as i64,
                encoder,
                filter: None,
                format,
                request: applied,
                effects: params.video_effects,
                output,
                stream_start_position_us: params.stream_start_position_us,
                last_pts: None,
            }),
            muxer: params.muxer,
            position_us: AtomicI64::new(0),
            ended: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    fn output(&self) -> Output<'_> {
        Output {
            track_type: TrackType::Video,
            muxer: &self.muxer,
            position_us: &self.position_us,
        }
    }
}

impl SamplePipeline for VideoTranscodeSamplePipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::VideoTranscode
    }

    fn queue_input(&self, sample: crate::pipeline::Sample) -> anyhow::Result<()> {
        if self.released.load(Ordering::Acquire) {
            anyhow::bail!("video transcode received input after release");
        }
        if self.ended.load(Ordering::Acquire) {
            anyhow::bail!("video transcode received input after end of input");
        }
        let mut state = self.state.lock();
        let result = state
            .decoder
            .send_sample(&sample)
            .map_err(failed(ErrorCode::DecodingFailed, "failed to decode video"))
            .and_then(|()| state.drain_decoder(&self.output()));
        if self.released.load(Ordering::Acquire) {
            state.filter = None;
        }
        result
    }

    fn end_of_input(&self) -> anyhow::Result<()> {
        if self.ended.swap(true, Ordering::AcqRel) || self.released.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.lock();
        let result = state.finish(&self.output());
        if self.released.load(Ordering::Acquire) {
            state.filter = None;
        }
        result?;
        self.muxer.end_track(TrackType::Video);
        Ok(())
    }

    fn current_position_ms(&self) -> i64 {
        self.position_us.load(Ordering::Acquire) / 1_000
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Never waits for a step in progress on the loader thread; that thread
    /// drops the filter once its step is done.
    fn release(&self) -> anyhow::Result<()> {
        self.released.store(true, Ordering::Release);
        if let Some(mut state) = self.state.try_lock() {
            state.filter = None;
        }
        Ok(())
    }
}

struct AudioState {
    decoder: Decoder,
    encoder: AudioEncoder,
    filter: Option<FilterGraph>,
    effects: Vec<Effect>,
    sample_rate: u32,
    channels: u32,
    stream_start_position_us: i64,
    /// Timestamp of the next encoder input, in samples.
    next_pts: Option<i64>,
}

impl AudioState {
    fn frame_duration_us(&self) -> i64 {
        let frame_size = i64::from(self.encoder.encoder.frame_size());
        frame_size * 1_000_000 / i64::from(self.sample_rate.max(1))
    }

    fn drain_decoder(&mut self, out: &Output<'_>) -> anyhow::Result<()> {
        while let Some(mut decoded) = self
            .decoder
            .receive_audio()
            .map_err(failed(ErrorCode::DecodingFailed, "failed to decode audio"))?
        {
            let Some(pts) = decoded.pts() else {
                continue;
            };
            if pts < self.stream_start_position_us {
                continue;
            }
            let pts = pts - self.stream_start_position_us;
            decoded.set_pts(Some(pts));
            if self.next_pts.is_none() {
                self.next_pts = Some(pts.rescale(MICROS, self.encoder.time_base));
            }

            if self.filter.is_none() {
                let chain = filter::audio_filter_chain(
                    &self.effects,
                    filter::sample_format_name(self.encoder.encoder.format()),
                    self.sample_rate,
                    self.channels,
                );
                self.filter = Some(
                    FilterGraph::audio(&decoded, &chain, self.encoder.encoder.frame_size())
                        .map_err(failed(ErrorCode::ProcessingFailed, "failed to set up audio processors"))?,
                );
            }
            if let Some(graph) = self.filter.as_mut() {
                graph
                    .push(&decoded)
                    .map_err(failed(ErrorCode::ProcessingFailed, "failed to process audio"))?;
            }
            self.drain_filter(out)?;
        }
        Ok(())
    }

    fn drain_filter(&mut self, out: &Output<'_>) -> anyhow::Result<()> {
        let default_duration_us = self.frame_duration_us();
        let Some(graph) = self.filter.as_mut() else {
            return Ok(());
        };
        loop {
            let mut filtered = frame::Audio::empty();
            let ready = graph
                .pull(&mut filtered)
                .map_err(failed(ErrorCode::ProcessingFailed, "failed to process audio"))?;
            if !ready {
                return Ok(());
            }
            let pts = self.next_pts.unwrap_or(0);
            self.next_pts = Some(pts + filtered.samples() as i64);
            filtered.set_pts(Some(pts));

            self.encoder
                .encoder
                .send_frame(&filtered)
                .map_err(|e| failed(ErrorCode::EncodingFailed, "failed to encode audio")(e.into()))?;
            out.drain(&mut self.encoder.encoder, self.encoder.time_base, default_duration_us)?;
        }
    }

    fn finish(&mut self, out: &Output<'_>) -> anyhow::Result<()> {
        self.decoder
            .send_eof()
            .map_err(failed(ErrorCode::DecodingFailed, "failed to flush audio decoder"))?;
        self.drain_decoder(out)?;
        if let Some(graph) = self.filter.as_mut() {
            graph
                .flush()
                .map_err(failed(ErrorCode::ProcessingFailed, "failed to flush audio processors"))?;
        }
        self.drain_filter(out)?;
        self.encoder
            .encoder
            .send_eof()
            .map_err(|e| failed(ErrorCode::EncodingFailed, "failed to flush audio encoder")(e.into()))?;
        let default_duration_us = self.frame_duration_us();
        out.drain(&mut self.encoder.encoder, self.encoder.time_base, default_duration_us)
    }
}

/// Re-encodes an audio track through the configured audio processors.
pub(crate) struct AudioTranscodeSamplePipeline {
    state: Mutex<AudioState>,
    muxer: Arc<MuxerWrapper>,
    position_us: AtomicI64,
    ended: AtomicBool,
    released: AtomicBool,
}

impl AudioTranscodeSamplePipeline {
    pub fn new(params: PipelineParams, encoders: &FfmpegEncoderFactory) -> anyhow::Result<Self> {
        let format = params.format;
        let decoder = Decoder::new(&format)
            .map_err(failed(ErrorCode::DecoderInitFailed, "failed to open audio decoder"))?;

        let mime_type = output_mime_type(
            params.request.audio_mime_type.as_deref(),
            &format.sample_mime_type,
            mime::AUDIO_AAC,
            &params.muxer,
        );
        let encoder = encoders.open_audio_encoder(
            &mime_type,
            AudioSettings {
                sample_rate: format.sample_rate.unwrap_or(44_100),
                channels: format.channel_count.unwrap_or(2),
                bitrate: format.average_bitrate,
            },
        )?;
        let sample_rate = encoder.encoder.rate();
        let channels = unsafe { (*encoder.encoder.as_ptr()).ch_layout.nb_channels }.max(1) as u32;

        let mut applied = params.request.clone();
        if applied.audio_mime_type.is_some() || encoder.mime_type != format.sample_mime_type {
            applied.audio_mime_type = Some(encoder.mime_type.clone());
        }

        let mut output_format = TrackFormat::audio(encoder.mime_type.clone(), sample_rate, channels);
        output_format.average_bitrate = format.average_bitrate;
        output_format.initialization_data = extradata_of_context(&encoder.encoder);
        params.muxer.add_track_format(&output_format)?;
        params.fallback.on_transformation_request_finalized(&applied)?;
        log::info!(
            "audio transcode {} -> {} ({}) {} Hz, {} channels",
            format.sample_mime_type,
            encoder.mime_type,
            encoder.codec_name,
            sample_rate,
            channels
        );

        Ok(Self {
            state: Mutex::new(AudioState {
                decoder,
                encoder,
                filter: None,
                effects: params.audio_processors,
                sample_rate,
                channels,
                stream_start_position_us: params.stream_start_position_us,
                next_pts: None,
            }),
            muxer: params.muxer,
            position_us: AtomicI64::new(0),
            ended: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    fn output(&self) -> Output<'_> {
        Output {
            track_type: TrackType::Audio,
            muxer: &self.muxer,
            position_us: &self.position_us,
        }
    }
}

impl SamplePipeline for AudioTranscodeSamplePipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::AudioTranscode
    }

    fn queue_input(&self, sample: crate::pipeline::Sample) -> anyhow::Result<()> {
        if self.released.load(Ordering::Acquire) {
            anyhow::bail!("audio transcode received input after release");
        }
        if self.ended.load(Ordering::Acquire) {
            anyhow::bail!("audio transcode received input after end of input");
        }
        let mut state = self.state.lock();
        let result = state
            .decoder
            .send_sample(&sample)
            .map_err(failed(ErrorCode::DecodingFailed, "failed to decode audio"))
            .and_then(|()| state.drain_decoder(&self.output()));
        if self.released.load(Ordering::Acquire) {
            state.filter = None;
        }
        result
    }

    fn end_of_input(&self) -> anyhow::Result<()> {
        if self.ended.swap(true, Ordering::AcqRel) || self.released.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.lock();
        let result = state.finish(&self.output());
        if self.released.load(Ordering::Acquire) {
            state.filter = None;
        }
        result?;
        self.muxer.end_track(TrackType::Audio);
        Ok(())
    }

    fn current_position_ms(&self) -> i64 {
        self.position_us.load(Ordering::Acquire) / 1_000
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn release(&self) -> anyhow::Result<()> {
        self.released.store(true, Ordering::Release);
        if let Some(mut state) = self.state.try_lock() {
            state.filter = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMuxer;

    #[test]
    fn output_mime_type_prefers_request_then_source() {
        let (muxer, _) = FakeMuxer::new();
        let muxer = MuxerWrapper::new(Box::new(muxer));
        assert_eq!(
            output_mime_type(Some(mime::VIDEO_H265), mime::VIDEO_H264, mime::VIDEO_H264, &muxer),
            mime::VIDEO_H265
        );
        assert_eq!(
            output_mime_type(None, mime::VIDEO_H264, mime::VIDEO_H264, &muxer),
            mime::VIDEO_H264
        );
        assert_eq!(
            output_mime_type(None, mime::VIDEO_VP9, mime::VIDEO_H264, &muxer),
            mime::VIDEO_H264
        );
    }

    #[test]
    fn release_does_not_wait_for_a_busy_loader() {
        let _ = crate::init();
        let (muxer, _) = FakeMuxer::new();
        let muxer = Arc::new(MuxerWrapper::new(Box::new(muxer)));
        muxer.register_track().unwrap();
        let request = TransformationRequest::default();
        let fallback = Arc::new(crate::fallback::FallbackListener::new(
            request.clone(),
            Arc::new(crate::listener::LogListener),
        ));
        fallback.register_track();
        let params = PipelineParams {
            format: TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2),
            stream_start_position_us: 0,
            stream_offset_us: 0,
            request,
            audio_processors: vec![Effect::new("volume=0.5")],
            video_effects: vec![],
            muxer,
            fallback,
        };
        let pipeline = AudioTranscodeSamplePipeline::new(params, &FfmpegEncoderFactory::default()).unwrap();

        // the loader thread is mid-step
        let state = pipeline.state.lock();
        pipeline.release().unwrap();
        drop(state);

        let sample = crate::pipeline::Sample {
            data: bytes::Bytes::from_static(&[0u8; 16]),
            pts_us: 0,
            dts_us: 0,
            duration_us: 23_219,
            is_key_frame: true,
        };
        let err = pipeline.queue_input(sample).unwrap_err();
        assert!(err.to_string().contains("after release"));
        assert!(pipeline.end_of_input().is_ok());
        assert!(pipeline.state.lock().filter.is_none());
    }

    #[test]
    fn failures_keep_their_code() {
        let err = failed(ErrorCode::DecodingFailed, "failed to decode video")(anyhow::anyhow!("bad data"));
        let err = TransformationError::classify(err);
        assert_eq!(err.code(), ErrorCode::DecodingFailed);
        assert_eq!(err.message(), "failed to decode video");
    }
}
