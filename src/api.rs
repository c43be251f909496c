//! HTTP API for text-to-speech synthesis.
//!
//! `POST /api/tts` takes `{"text": "..."}` and answers with either the WAV
//! bytes or, for `Accept: text/plain`, the artifact's file name.
//! `GET /status` reports the running configuration.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use crate::artifacts::Artifact;
use crate::config::Config;
use crate::effects::PostProcessor;
use crate::error::{Result, SpeakError};
use crate::synth::PiperSynthesizer;

#[derive(Clone)]
pub struct AppState {
    pub synthesizer: Arc<PiperSynthesizer>,
    pub post_processor: Arc<PostProcessor>,
    pub output_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            synthesizer: Arc::new(PiperSynthesizer::new(&config.synthesis)),
            post_processor: Arc::new(PostProcessor::new(config.effects.clone())),
            output_dir: config.artifacts.output_dir.clone(),
        }
    }
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    binary: String,
    model: String,
    timeout_secs: u64,
    output_dir: String,
    rate_enabled: bool,
    pitch_enabled: bool,
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/tts", post(handle_tts))
        .route("/status", get(handle_status))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("TTS API listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// --- Handlers ---

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        binary: state.synthesizer.binary().display().to_string(),
        model: state.synthesizer.model().display().to_string(),
        timeout_secs: state.synthesizer.timeout().as_secs(),
        output_dir: state.output_dir.display().to_string(),
        rate_enabled: state.post_processor.rate_enabled(),
        pitch_enabled: state.post_processor.pitch_enabled(),
    })
}

async fn handle_tts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TtsRequest>,
) -> Response {
    match speak(&state, &headers, req).await {
        Ok(response) => response,
        Err(e) => {
            warn!("TTS request failed: {e}");
            e.into_response()
        }
    }
}

async fn speak(state: &AppState, headers: &HeaderMap, req: TtsRequest) -> Result<Response> {
    let text = req.text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(SpeakError::InvalidInput);
    }

    let t_total = Instant::now();
    let preview: String = text.chars().take(80).collect();
    info!(
        "HTTP /api/tts: \"{}{}\" ({} chars)",
        preview.replace('\n', " "),
        if text.chars().count() > 80 { "..." } else { "" },
        text.chars().count(),
    );

    // Removed on every early return below unless retained.
    let artifact = Artifact::new_in(&state.output_dir);

    let t_synth = Instant::now();
    state.synthesizer.synthesize(&text, artifact.path()).await?;
    let synth_ms = t_synth.elapsed().as_secs_f64() * 1000.0;

    let t_post = Instant::now();
    let artifact = if state.post_processor.is_enabled() {
        // The blocking task owns the guard so the file is removed after its
        // last write even if this request is dropped mid-pass.
        let processor = state.post_processor.clone();
        tokio::task::spawn_blocking(move || {
            processor
                .process_file(artifact.path())
                .map(|()| artifact)
        })
        .await
        .map_err(|e| SpeakError::Processing(format!("post-processing task failed: {e}")))??
    } else {
        artifact
    };
    let post_ms = t_post.elapsed().as_secs_f64() * 1000.0;

    let total_ms = t_total.elapsed().as_secs_f64() * 1000.0;
    info!(
        "TTS complete [{}]: synth={synth_ms:.0}ms post={post_ms:.0}ms total={total_ms:.0}ms",
        artifact.file_name()
    );

    if wants_plain_text(headers) {
        let name = artifact.file_name().to_string();
        artifact.retain();
        return Ok(name.into_response());
    }

    let bytes = match tokio::fs::read(artifact.path()).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SpeakError::ArtifactMissing)
        }
        Err(e) => return Err(e.into()),
    };

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, bytes.len().to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// True when the first media range in `Accept` is `text/plain`.
fn wants_plain_text(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|range| range.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/plain"))
}
