//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::buffer::JitterBufferStats;
use crate::audio::device::{list_output_devices, OutputDeviceInfo};
use crate::audio::recorder::RecordingSession;
use crate::error::{ControlError, RecordingError};
use crate::network::control::{ControlStats, LastKnownStatus};
use crate::pipeline::{SequenceState, StatsView};
use crate::protocol::{CommandName, FeatureBatch};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn reply<T>(code: StatusCode, response: ApiResponse<T>) -> Reply<T> {
    (code, Json(response))
}

/// Receiver status
#[derive(Debug, Serialize)]
pub struct ReceiverStatus {
    pub connected: bool,
    pub accepting: bool,
    pub playback_running: bool,
    pub recording: Option<RecordingSession>,
    pub last_sequence: Option<u16>,
    pub sessions: u64,
    pub sensor: Option<LastKnownStatus>,
    pub control: ControlStats,
    pub jitter: JitterBufferStats,
    pub uptime_seconds: u64,
}

/// Get receiver status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ReceiverStatus>> {
    let sequence: SequenceState = state.pipeline.sequence_state();
    let status = ReceiverStatus {
        connected: state.control.is_connected(),
        accepting: state.pipeline.is_accepting(),
        playback_running: state.playback.lock().is_running(),
        recording: state.pipeline.recording(),
        last_sequence: sequence.last_sequence,
        sessions: sequence.sessions,
        sensor: state.control.last_known_status(),
        control: state.control.stats(),
        jitter: state.pipeline.jitter_buffer().stats(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

/// Get stream statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatsView>> {
    Json(ApiResponse::ok(state.pipeline.stats()))
}

/// Latest feature batch per kind
pub async fn get_features(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<FeatureBatch>>> {
    Json(ApiResponse::ok(state.pipeline.latest_features()))
}

/// Get available output devices
pub async fn get_devices() -> Json<ApiResponse<Vec<OutputDeviceInfo>>> {
    let devices = tokio::task::spawn_blocking(list_output_devices)
        .await
        .unwrap_or_default();
    Json(ApiResponse::ok(devices))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRecordingRequest {
    /// Timestamped file in the configured directory when unset
    pub path: Option<PathBuf>,
}

/// Start recording
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    request: Option<Json<StartRecordingRequest>>,
) -> Reply<PathBuf> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    match state.pipeline.start_recording(request.path.as_deref()) {
        Ok(path) => reply(StatusCode::CREATED, ApiResponse::ok(path)),
        Err(e @ RecordingError::AlreadyRecording(_)) => {
            reply(StatusCode::CONFLICT, ApiResponse::error(e.to_string()))
        }
        Err(e) => {
            tracing::error!("Failed to start recording: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string()))
        }
    }
}

/// Stop recording; returns the finished session, if any
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
) -> Reply<Option<RecordingSession>> {
    match state.pipeline.stop_recording() {
        Ok(session) => {
            if let Some(session) = &session {
                tracing::info!(
                    "Recording saved to {} ({:.1}s)",
                    session.path.display(),
                    session.duration_secs()
                );
            }
            reply(StatusCode::OK, ApiResponse::ok(session))
        }
        Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string())),
    }
}

/// Start playback
pub async fn start_playback(State(state): State<Arc<AppState>>) -> Reply<()> {
    // Opening the device can block for a while
    let result = tokio::task::spawn_blocking(move || {
        let mut playback = state.playback.lock();
        playback.start()
    })
    .await;
    match result {
        Ok(Ok(())) => reply(StatusCode::OK, ApiResponse::ok(())),
        Ok(Err(e)) => {
            tracing::error!("Failed to start playback: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string()))
        }
        Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string())),
    }
}

/// Stop playback
pub async fn stop_playback(State(state): State<Arc<AppState>>) -> Reply<()> {
    let result = tokio::task::spawn_blocking(move || {
        let mut playback = state.playback.lock();
        playback.stop();
    })
    .await;
    match result {
        Ok(()) => reply(StatusCode::OK, ApiResponse::ok(())),
        Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string())),
    }
}

/// Result of a session reset
#[derive(Debug, Serialize)]
pub struct SessionReset {
    pub discarded_samples: usize,
}

/// Start a new sequence session, discarding queued audio
pub async fn reset_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionReset>> {
    let discarded_samples = state.pipeline.reset_session();
    Json(ApiResponse::ok(SessionReset { discarded_samples }))
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub command: String,
}

/// Send a command to the sensor
pub async fn send_control(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ControlRequest>,
) -> Reply<CommandName> {
    let name = match request.command.parse::<CommandName>() {
        Ok(name) => name,
        Err(e) => return reply(StatusCode::BAD_REQUEST, ApiResponse::error(e.to_string())),
    };

    match state.control.send_now(name) {
        Ok(()) => reply(StatusCode::ACCEPTED, ApiResponse::ok(name)),
        Err(e @ (ControlError::NotConnected | ControlError::Busy)) => {
            reply(StatusCode::SERVICE_UNAVAILABLE, ApiResponse::error(e.to_string()))
        }
        Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string())),
    }
}
