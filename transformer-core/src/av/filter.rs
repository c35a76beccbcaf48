//! libavfilter graphs that apply geometry and effects between decoder and
//! encoder.

use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::{filter, frame, util::error};

use crate::effect::Effect;
use crate::format::TrackFormat;
use crate::geometry::{FrameSize, output_frame_size, quarter_turns};
use crate::request::{HdrMode, TransformationRequest};

const TONE_MAP_CHAIN: &str = "zscale=t=linear:npl=100,format=gbrpf32le,zscale=p=bt709,\
tonemap=hable:desat=0,zscale=t=bt709:m=bt709:r=tv";
const SDR_COLOR_PARAMS: &str = "setparams=color_primaries=bt709:color_trc=bt709:colorspace=bt709";

/// Whether this FFmpeg build can tone map HDR to SDR.
pub fn tone_mapping_available() -> bool {
    filter::find("zscale").is_some() && filter::find("tonemap").is_some()
}

/// Whether `frame` carries a PQ or HLG transfer function.
pub fn is_hdr(frame: &frame::Video) -> bool {
    use ffmpeg_next::color::TransferCharacteristic;
    matches!(
        frame.color_transfer_characteristic(),
        TransferCharacteristic::SMPTE2084 | TransferCharacteristic::ARIB_STD_B67
    )
}

fn quarter_turn_filter(turns: u32, clockwise: bool) -> Option<&'static str> {
    match (turns, clockwise) {
        (1, true) | (3, false) => Some("transpose=clock"),
        (3, true) | (1, false) => Some("transpose=cclock"),
        (2, _) => Some("hflip,vflip"),
        _ => None,
    }
}

/// Builds the video filter description.
///
/// Frames come out of the decoder in coded orientation. The chain turns them
/// upright, scales them to the requested factors, applies the requested
/// counterclockwise rotation and the user effects, then forces the encoded
/// output size and pixel format.
pub fn video_filter_chain(
    format: &TrackFormat,
    request: &TransformationRequest,
    effects: &[Effect],
    output: FrameSize,
    hdr_mode: HdrMode,
    input_is_hdr: bool,
    pixel_format: &str,
) -> String {
    let mut steps: Vec<String> = Vec::new();
    if input_is_hdr {
        match hdr_mode {
            HdrMode::ToneMapHdrToSdr => steps.push(TONE_MAP_CHAIN.to_string()),
            HdrMode::ExperimentalForceInterpretHdrAsSdr => steps.push(SDR_COLOR_PARAMS.to_string()),
            HdrMode::KeepHdr => {}
        }
    }

    if let Some(step) = quarter_turns(format.rotation_degrees as f32)
        .and_then(|turns| quarter_turn_filter(turns, true))
    {
        steps.push(step.to_string());
    }

    if request.scale_x < 0.0 {
        steps.push("hflip".to_string());
    }
    if request.scale_y < 0.0 {
        steps.push("vflip".to_string());
    }
    let unrotated = TransformationRequest {
        rotation_degrees: 0.0,
        output_height: None,
        ..request.clone()
    };
    if let Some(size) = output_frame_size(format, &unrotated) {
        steps.push(format!("scale={}:{}", size.width, size.height));
    }

    match quarter_turns(request.rotation_degrees) {
        Some(turns) => {
            if let Some(step) = quarter_turn_filter(turns, false) {
                steps.push(step.to_string());
            }
        }
        None => {
            let radians = -f64::from(request.rotation_degrees).to_radians();
            steps.push(format!(
                "rotate=a={r:.6}:ow=rotw({r:.6}):oh=roth({r:.6}):c=black",
                r = radians
            ));
        }
    }

    steps.extend(effects.iter().map(|effect| effect.description().to_string()));
    steps.push(format!("scale={}:{}", output.width, output.height));
    steps.push("setsar=1".to_string());
    steps.push(format!("format=pix_fmts={}", pixel_format));
    steps.join(",")
}

/// Channel layout name understood by `aformat`.
pub fn channel_layout_name(channels: u32) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        6 => "5.1".to_string(),
        8 => "7.1".to_string(),
        n => format!("{}c", n),
    }
}

/// Builds the audio filter description: user effects, then conversion to
/// what the encoder accepts.
pub fn audio_filter_chain(effects: &[Effect], sample_format: &str, sample_rate: u32, channels: u32) -> String {
    let mut steps: Vec<String> = effects.iter().map(|e| e.description().to_string()).collect();
    steps.push(format!(
        "aformat=sample_fmts={}:sample_rates={}:channel_layouts={}",
        sample_format,
        sample_rate,
        channel_layout_name(channels)
    ));
    steps.join(",")
}

/// A single-input, single-output filter graph.
pub(crate) struct FilterGraph {
    graph: filter::Graph,
}

// The graph is only touched behind the pipeline mutex.
unsafe impl Send for FilterGraph {}

impl FilterGraph {
    fn build(source: &str, source_args: &str, sink: &str, chain: &str) -> anyhow::Result<Self> {
        let mut graph = filter::Graph::new();
        let source_filter =
            filter::find(source).ok_or_else(|| anyhow::anyhow!("filter not found: {}", source))?;
        let sink_filter =
            filter::find(sink).ok_or_else(|| anyhow::anyhow!("filter not found: {}", sink))?;
        graph.add(&source_filter, "in", source_args)?;
        graph.add(&sink_filter, "out", "")?;
        graph.output("in", 0)?.input("out", 0)?.parse(chain)?;
        graph.validate()?;
        log::debug!("filter graph: {}", chain);
        Ok(Self { graph })
    }

    /// Video graph fed with frames shaped like `first`.
    pub fn video(first: &frame::Video, chain: &str) -> anyhow::Result<Self> {
        let pix_fmt: ffmpeg_next::ffi::AVPixelFormat = first.format().into();
        let aspect = first.aspect_ratio();
        let (sar_num, sar_den) = if aspect.numerator() > 0 && aspect.denominator() > 0 {
            (aspect.numerator(), aspect.denominator())
        } else {
            (1, 1)
        };
        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base=1/1000000:pixel_aspect={}/{}",
            first.width(),
            first.height(),
            pix_fmt as i32,
            sar_num,
            sar_den
        );
        Self::build("buffer", &args, "buffersink", chain)
    }

    /// Audio graph fed with frames shaped like `first`. A non-zero
    /// `frame_size` makes the sink emit frames of exactly that many samples.
    pub fn audio(first: &frame::Audio, chain: &str, frame_size: u32) -> anyhow::Result<Self> {
        let channels = unsafe { (*first.as_ptr()).ch_layout.nb_channels }.max(1) as u32;
        let args = format!(
            "time_base=1/1000000:sample_rate={}:sample_fmt={}:channel_layout={}",
            first.rate(),
            first.format().name(),
            channel_layout_name(channels)
        );
        let mut graph = Self::build("abuffer", &args, "abuffersink", chain)?;
        if frame_size > 0 {
            graph.sink()?.sink().set_frame_size(frame_size);
        }
        Ok(graph)
    }

    fn sink(&mut self) -> anyhow::Result<filter::Context<'_>> {
        self.graph
            .get("out")
            .ok_or_else(|| anyhow::anyhow!("filter graph has no sink"))
    }

    pub fn push(&mut self, frame: &frame::Frame) -> anyhow::Result<()> {
        let mut source = self
            .graph
            .get("in")
            .ok_or_else(|| anyhow::anyhow!("filter graph has no source"))?;
        source.source().add(frame)?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        let mut source = self
            .graph
            .get("in")
            .ok_or_else(|| anyhow::anyhow!("filter graph has no source"))?;
        source.source().flush()?;
        Ok(())
    }

    /// Pulls one filtered frame. `Ok(false)` means nothing is ready.
    pub fn pull(&mut self, out: &mut frame::Frame) -> anyhow::Result<bool> {
        match self.sink()?.sink().frame(out) {
            Ok(()) => Ok(true),
            Err(ffmpeg_next::Error::Eof) => Ok(false),
            Err(ffmpeg_next::Error::Other { errno }) if errno == error::EAGAIN => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Name of a pixel format as used in filter descriptions.
pub fn pixel_format_name(format: Pixel) -> String {
    format
        .descriptor()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|| "yuv420p".to_string())
}

pub fn sample_format_name(format: Sample) -> &'static str {
    format.name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::mime;

    fn hd() -> TrackFormat {
        TrackFormat::video(mime::VIDEO_H264, 1920, 1080)
    }

    fn chain(format: &TrackFormat, request: TransformationRequest, effects: &[Effect]) -> String {
        let output = output_frame_size(format, &request).unwrap();
        video_filter_chain(format, &request, effects, output, request.hdr_mode, false, "yuv420p")
    }

    #[test]
    fn plain_chain_only_forces_size_and_format() {
        assert_eq!(
            chain(&hd(), TransformationRequest::default(), &[]),
            "scale=1920:1080,scale=1920:1080,setsar=1,format=pix_fmts=yuv420p"
        );
    }

    #[test]
    fn source_rotation_is_undone_first() {
        let c = chain(&hd().with_rotation(90), TransformationRequest::default(), &[]);
        assert!(c.starts_with("transpose=clock,scale=1080:1920"), "{}", c);
    }

    #[test]
    fn requested_rotation_and_effects() {
        let request = TransformationRequest::builder()
            .rotation_degrees(90.0)
            .output_height(480)
            .build()
            .unwrap();
        let c = chain(&hd(), request, &[Effect::new("hflip")]);
        assert_eq!(
            c,
            "scale=1920:1080,transpose=cclock,hflip,scale=270:480,setsar=1,format=pix_fmts=yuv420p"
        );

        let request = TransformationRequest::builder().rotation_degrees(30.0).build().unwrap();
        assert!(chain(&hd(), request, &[]).contains("rotate=a=-0.523599"));
    }

    #[test]
    fn negative_scale_flips() {
        let request = TransformationRequest::builder().scale(-1.0, -0.5).build().unwrap();
        assert_eq!(
            chain(&hd(), request, &[]),
            "hflip,vflip,scale=1920:540,scale=1920:540,setsar=1,format=pix_fmts=yuv420p"
        );
    }

    #[test]
    fn hdr_steps_only_for_hdr_input() {
        let request = TransformationRequest::builder()
            .hdr_mode(HdrMode::ToneMapHdrToSdr)
            .build()
            .unwrap();
        let output = output_frame_size(&hd(), &request).unwrap();
        let c = video_filter_chain(&hd(), &request, &[], output, request.hdr_mode, true, "yuv420p");
        assert!(c.starts_with("zscale=t=linear"));
        let c = video_filter_chain(&hd(), &request, &[], output, request.hdr_mode, false, "yuv420p");
        assert!(!c.contains("tonemap"));
    }

    #[test]
    fn audio_chain_ends_with_format_conversion() {
        assert_eq!(
            audio_filter_chain(&[Effect::new("volume=0.5")], "fltp", 48_000, 2),
            "volume=0.5,aformat=sample_fmts=fltp:sample_rates=48000:channel_layouts=stereo"
        );
        assert_eq!(channel_layout_name(3), "3c");
    }
}
