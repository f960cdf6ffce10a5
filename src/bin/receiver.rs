//! Audio Receiver Application
//!
//! Listens for the sender's stream and plays it on the default output device.
//!
//! Usage: `receiver [PORT] [--config PATH]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_link::{
    audio::AudioPlayback,
    config::AppConfig,
    network::UdpConnector,
    SessionEvent, SessionState, StreamSession,
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

    tracing::info!("Starting LAN Audio Receiver");

    let (positional, config_path) = parse_args(std::env::args().skip(1));
    let config = AppConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    let port = match positional.first() {
        Some(port) => port.parse().context("Invalid port")?,
        None => config.network.port,
    };

    tracing::info!(
        "Buffering {} frames of {:.1}ms before playback",
        config.stream.ready_threshold,
        config.stream.frame_duration_ms()
    );

    let connector = Arc::new(UdpConnector::new(&config.network));
    let session = StreamSession::new(config.stream.clone(), connector);
    session.set_gain(config.gain_percent);
    let events = session.events();

    session
        .start_receive(port)
        .with_context(|| format!("Failed to listen on port {}", port))?;

    let mut playback = AudioPlayback::new(session.clone());
    playback.start()?;
    tracing::info!("Audio playback started - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Some(error) = playback.check_errors() {
                    session.report_device_error(&error);
                }

                for event in events.try_iter() {
                    log_event(&event);
                }
                if session.state() == SessionState::Idle {
                    tracing::warn!("Session ended");
                    break;
                }

                ticks += 1;
                if ticks % 100 == 0 {
                    let stats = session.stats();
                    tracing::info!(
                        "Stats: {} received, {} played, {} dropped, {} underruns, backlog {}",
                        stats.frames_received,
                        stats.frames_played,
                        stats.overwritten_frames,
                        stats.underruns,
                        stats.backlog
                    );
                }
            }
        }
    }

    playback.stop();
    let stats = session.stats();
    session.stop();
    tracing::info!("Final stats: {}", serde_json::to_string(&stats)?);

    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { from, to } => tracing::info!("State: {} -> {}", from, to),
        SessionEvent::ConnectionFailed { message } => {
            tracing::error!("Connection failed: {}", message)
        }
        SessionEvent::DeviceFailed { message } => tracing::error!("Device failed: {}", message),
    }
}

/// Split arguments into positionals and an optional `--config PATH`
fn parse_args(args: impl Iterator<Item = String>) -> (Vec<String>, Option<PathBuf>) {
    let mut positional = Vec::new();
    let mut config = None;
    let mut args = args;
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = args.next().map(PathBuf::from);
        } else {
            positional.push(arg);
        }
    }
    (positional, config)
}
