//! undertone - demo entry point
//!
//! Plays a generated media tone through the engine and interrupts it with
//! a ducked announcement tone partway through, against either the default
//! audio device or a silent in-memory sink.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use undertone::audio::sink::{AudioSink, CpalSink, MockSink};
use undertone::audio::AudioStreamInfo;
use undertone::pipeline::ToneSource;
use undertone::{EngineConfig, Player};

/// Command-line arguments for undertone
#[derive(Parser, Debug)]
#[command(name = "undertone")]
#[command(about = "PCM output engine demo with announcement ducking")]
#[command(version)]
struct Args {
    /// Output sample rate in Hz
    #[arg(long, default_value = "16000", env = "UNDERTONE_SAMPLE_RATE")]
    sample_rate: u32,

    /// Seconds of media tone to play
    #[arg(long, default_value = "6")]
    duration: u64,

    /// Seconds into playback at which the announcement interrupts
    #[arg(long, default_value = "2")]
    announce_at: u64,

    /// Ducking ratio applied to media during the announcement
    #[arg(long, default_value = "0.3")]
    ducking: f32,

    /// Use a silent in-memory sink instead of the default audio device
    #[arg(long)]
    silent: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "undertone=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let info = AudioStreamInfo::new(args.sample_rate, 16, 1);
    let config = EngineConfig {
        stream_info: info,
        ducking_ratio: args.ducking,
        ..EngineConfig::default()
    };

    let sink: Box<dyn AudioSink> = if args.silent {
        info!("using silent in-memory sink");
        Box::new(MockSink::new())
    } else {
        info!("using default audio device");
        Box::new(CpalSink::new())
    };

    let player = Player::spawn(sink, config).context("failed to start player")?;
    let mut status = player.status();

    // Log every published status change in the background
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            info!(
                "status: {} (volume {:.2}{}{})",
                current.state,
                current.volume,
                if current.muted { ", muted" } else { "" },
                if current.warning { ", warning" } else { "" },
            );
        }
    });

    let media_frames = args.duration * info.sample_rate as u64;
    let media = ToneSource::new(info, 440.0, 0.4, Some(media_frames));
    player.play(Box::new(media), false).await?;
    info!("media tone started ({} s)", args.duration);

    let announce = async {
        tokio::time::sleep(Duration::from_secs(args.announce_at)).await;
        let announcement_frames = info.sample_rate as u64;
        let announcement = ToneSource::new(info, 880.0, 0.5, Some(announcement_frames));
        player
            .play(Box::new(announcement), true)
            .await
            .context("failed to start announcement")?;
        info!("announcement started, media ducked to {}", args.ducking);
        tokio::time::sleep(Duration::from_secs(
            args.duration.saturating_sub(args.announce_at) + 1,
        ))
        .await;
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = announce => result?,
        _ = signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    player.shutdown().await.context("shutdown failed")?;
    info!("done");
    Ok(())
}
