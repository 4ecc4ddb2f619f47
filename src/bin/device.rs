//! Audio Link device runtime
//!
//! Connects the pipeline to the configured WebSocket peer and runs until
//! Ctrl-C.
//!
//! Usage: `audio-link [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_link::{
    audio::{MicrophoneSource, PlaybackSink},
    network::{FrameHandler, Transport, WsTransport},
    AppConfig, Collaborators, Pipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Audio Link");

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load_or_default().context("loading default config")?,
    };

    let (transport, driver) = WsTransport::new(&config.transport)?;
    let (sink, microphone) = open_devices(&config)?;

    let mut collaborators = Collaborators::new(transport.clone(), sink);
    if let Some(microphone) = microphone {
        collaborators = collaborators.with_microphone(microphone);
    }
    let pipeline = Pipeline::start(config, collaborators)?;

    let handler: Arc<dyn FrameHandler> = pipeline.clone();
    let driver_task = tokio::spawn(driver.run(handler));
    transport.connect()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    transport.close();
    if let Err(e) = driver_task.await {
        tracing::error!("Transport task failed: {}", e);
    }
    pipeline.shutdown();

    let stats = pipeline.stats();
    tracing::info!(
        "Final stats: {} frames routed, {} dropped, {} bytes played, {} jitter evictions",
        stats.router.frames_routed,
        stats.router.frames_dropped,
        stats.sink.bytes_written,
        stats.jitter.evicted_chunks
    );
    Ok(())
}

type Devices = (Box<dyn PlaybackSink>, Option<Box<dyn MicrophoneSource>>);

#[cfg(feature = "host-audio")]
fn open_devices(config: &AppConfig) -> Result<Devices> {
    use audio_link::audio::{CpalMicrophone, CpalSink};

    let sink = CpalSink::open(config.audio.sample_rate, config.audio.output_channels())?;
    let microphone: Option<Box<dyn MicrophoneSource>> = if config.mic.enabled {
        match CpalMicrophone::open(config.mic.sample_rate) {
            Ok(mic) => Some(Box::new(mic)),
            Err(e) => {
                tracing::warn!("No microphone available: {}", e);
                None
            }
        }
    } else {
        None
    };
    Ok((Box::new(sink), microphone))
}

#[cfg(not(feature = "host-audio"))]
fn open_devices(config: &AppConfig) -> Result<Devices> {
    use audio_link::audio::{NullSink, SilentMicrophone};

    tracing::info!("Built without host-audio: using paced null devices");
    let sink = NullSink::new(config.audio.sample_rate, config.audio.output_channels());
    let microphone: Box<dyn MicrophoneSource> = Box::new(SilentMicrophone::new(config.mic.sample_rate));
    Ok((Box::new(sink), Some(microphone)))
}
