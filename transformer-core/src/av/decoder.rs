use ffmpeg_next::frame;

use super::MICROS;
use super::codec::{packet_from_sample, parameters_for};
use crate::format::{TrackFormat, TrackType};
use crate::pipeline::Sample;

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

/// Decodes the compressed samples of one track. Frame timestamps come out in
/// microseconds.
pub(crate) struct Decoder {
    inner: DecoderType,
}

// Only used behind the pipeline mutex.
unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(format: &TrackFormat) -> anyhow::Result<Self> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::from_parameters(parameters_for(format)?)?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = MICROS.into();
            (*decoder_ctx.as_mut_ptr()).pkt_timebase = MICROS.into();
        }

        let inner = match format.track_type() {
            TrackType::Video => {
                let decoder = decoder_ctx.decoder().video()?;
                if decoder.width() == 0 || decoder.height() == 0 {
                    anyhow::bail!("missing codec parameters for {}", format.sample_mime_type);
                }
                DecoderType::Video(decoder)
            }
            TrackType::Audio => DecoderType::Audio(decoder_ctx.decoder().audio()?),
            TrackType::Other => anyhow::bail!("unsupported track type {}", format.sample_mime_type),
        };
        Ok(Self { inner })
    }

    pub fn send_sample(&mut self, sample: &Sample) -> anyhow::Result<()> {
        let packet = packet_from_sample(sample);
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_packet(&packet)?,
            DecoderType::Audio(decoder) => decoder.send_packet(&packet)?,
        }
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_eof()?,
            DecoderType::Audio(decoder) => decoder.send_eof()?,
        }
        Ok(())
    }

    pub fn receive_video(&mut self) -> anyhow::Result<Option<frame::Video>> {
        let DecoderType::Video(decoder) = &mut self.inner else {
            anyhow::bail!("not a video decoder");
        };
        let mut frame = frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {
                frame.set_pts(frame.timestamp().or(frame.pts()));
                Ok(Some(frame))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn receive_audio(&mut self) -> anyhow::Result<Option<frame::Audio>> {
        let DecoderType::Audio(decoder) = &mut self.inner else {
            anyhow::bail!("not an audio decoder");
        };
        let mut frame = frame::Audio::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {
                frame.set_pts(frame.timestamp().or(frame.pts()));
                Ok(Some(frame))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
