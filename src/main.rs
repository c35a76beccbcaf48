use clap::Parser as _;

mod config;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("transformer_core", log::LevelFilter::Debug)
        .filter_module("transformer", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = config::Args::parse();
    run(args).await
}

#[cfg(feature = "ffmpeg")]
async fn run(args: config::Args) -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use transformer_core::av::{AvMuxer, FfmpegAssetLoader, FfmpegEncoderFactory, FfmpegPipelineFactory};
    use transformer_core::{ChannelListener, OutputDestination, Progress, TransformerBuilder};

    transformer_core::init()?;
    let request = args.transformation_request()?;
    let media_item = args.media_item()?;
    let encoders = FfmpegEncoderFactory {
        force_audio_encoding: args.force_audio_encode,
        force_video_encoding: args.force_video_encode,
        ..Default::default()
    };

    let (listener, mut outcome) = ChannelListener::new();
    let transformer = TransformerBuilder::new(
        media_item.clone(),
        Box::new(FfmpegAssetLoader::new(media_item)),
        Box::new(AvMuxer::new(&args.output)?),
        Arc::new(FfmpegPipelineFactory::new(encoders.clone())),
        OutputDestination::from(args.output.clone()),
    )
    .request(request)
    .audio_processors(args.audio_processors())
    .video_effects(args.video_effects())
    .encoder_factory(Arc::new(encoders))
    .listener(Arc::new(listener))
    .start();

    let mut ticker = tokio::time::interval(Duration::from_millis(args.progress_interval_ms.max(50)));
    let mut last_percent = None;
    let outcome = loop {
        tokio::select! {
            outcome = &mut outcome => break outcome?,
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted, cancelling");
                if let Err(e) = transformer.release(true).await {
                    log::error!("release failed: {}", e);
                }
            }
            _ = ticker.tick() => {
                if let Progress::Available(percent) = transformer.progress() {
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        log::info!("progress: {}%", percent);
                    }
                }
            }
        }
    };
    transformer.release(false).await?;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
async fn run(args: config::Args) -> anyhow::Result<()> {
    args.transformation_request()?;
    args.media_item()?;
    anyhow::bail!("built without the `ffmpeg` feature, cannot transform {}", args.input.display())
}
