//! Sensor Audio Receiver
//!
//! Subscribes to the sensor's MQTT topics, plays the audio stream and serves
//! the status/control API.
//!
//! Usage: `receiver [config.toml]`

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sensor_audio_receiver::{
    audio::{
        device::list_output_devices,
        playback::{AudioPlayback, PlaybackSink},
    },
    config::AppConfig,
    network::{
        control::ControlChannel,
        mqtt::MqttTransport,
        transport::{InboundMessage, Publisher},
    },
    pipeline::{spawn_ingest, Pipeline},
    protocol::{CommandName, Topics},
    ui::{AppState, WebServer},
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const CONNECT_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sensor Audio Receiver");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::load_or_default()?,
    };

    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    // Transport -> ingest queue
    let topics = Topics::new(config.mqtt.topic_prefix.clone());
    let (inbound_tx, inbound_rx) = bounded::<InboundMessage>(config.mqtt.inbound_capacity);
    let transport = MqttTransport::start(&config.mqtt, topics.clone(), inbound_tx);
    let publisher = transport.publisher();

    let control = Arc::new(ControlChannel::new(publisher.clone(), topics.control()));
    let pipeline = Arc::new(Pipeline::new(&config).with_control(control.clone()));
    let mut ingest = spawn_ingest(pipeline.clone(), inbound_rx)?;

    // Playback
    let sink = PlaybackSink::new(pipeline.jitter_buffer().clone());
    let playback = AudioPlayback::new(
        sink,
        config.audio.output_device.clone(),
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.playback_frame_size,
    );
    let state = Arc::new(AppState::new(pipeline.clone(), control.clone(), playback));

    if config.audio.autoplay {
        // Opening the device blocks until the stream is running
        let playback_state = state.clone();
        let started = tokio::task::spawn_blocking(move || {
            let mut playback = playback_state.playback.lock();
            playback.start()
        })
        .await?;
        if let Err(e) = started {
            tracing::warn!("Playback unavailable: {}", e);
        }
    }

    let web_handle = if config.ui.enabled {
        let server = WebServer::new(config.ui.clone(), state.clone());
        Some(server.start_background())
    } else {
        None
    };

    // Ask the sensor to start streaming once connected
    let deadline = Instant::now() + CONNECT_WAIT;
    while !publisher.is_connected() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if publisher.is_connected() {
        let _ = control.send_now(CommandName::StartPublishing);
        let _ = control.send_now(CommandName::EnableFeatures);
    } else {
        tracing::warn!("Broker not reachable yet; use the control API to start the sensor");
    }

    tracing::info!("Waiting for audio on {}/raw", topics.prefix());

    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
    stats_interval.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = pipeline.stats();
                let jitter = pipeline.jitter_buffer().stats();
                tracing::info!(
                    "Stream stats: {} packets ({:.1}/s), {} samples, {} gaps ({} missing), {} decode errors, rms {:.3}",
                    stats.packets_total,
                    stats.packet_rate,
                    stats.samples_received,
                    stats.gaps_detected,
                    stats.missing_packets,
                    stats.decode_errors,
                    stats.last_rms
                );
                tracing::info!(
                    "Jitter buffer: {}/{}, {} underruns, {} dropped, {} inbound dropped",
                    jitter.level,
                    jitter.capacity,
                    jitter.underruns,
                    jitter.dropped_samples,
                    transport.inbound_dropped()
                );
                if let Some(e) = state.playback.lock().check_errors() {
                    tracing::warn!("Playback error: {}", e);
                }
                if let Some(e) = transport.last_error() {
                    tracing::warn!("Broker: {}", e);
                }
            }
        }
    }

    // Shutdown: stop the sensor, disconnect so the ingest queue stops growing,
    // drain ingest, finalize the recording, then close the device
    if control.send_now(CommandName::StopPublishing).is_ok() {
        // Let the event loop flush the command before disconnecting
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    transport.shutdown(Duration::from_secs(2)).await;
    let handled = tokio::task::spawn_blocking(move || ingest.stop()).await?;
    if let Some(session) = pipeline.close() {
        tracing::info!(
            "Recording saved to {} ({:.1}s)",
            session.path.display(),
            session.duration_secs()
        );
    }
    let playback_state = state.clone();
    tokio::task::spawn_blocking(move || playback_state.playback.lock().stop()).await?;
    if let Some(handle) = web_handle {
        handle.abort();
    }

    tracing::info!("Receiver stopped after {} messages", handled);
    Ok(())
}
