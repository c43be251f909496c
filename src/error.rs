//! Error type for the synthesis request path.

use std::io;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeakError {
    #[error("Text cannot be null or empty.")]
    InvalidInput,

    #[error("synthesizer exited with {}", exit_description(.0))]
    ConversionFailed(Option<i32>),

    #[error("failed to start synthesizer: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to write text to synthesizer: {0}")]
    ProcessIo(#[source] io::Error),

    #[error("synthesizer did not finish within {0:?}")]
    Timeout(Duration),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("audio processing failed: {0}")]
    Processing(String),

    #[error("Audio file not found")]
    ArtifactMissing,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SpeakError>;

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

impl SpeakError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ArtifactMissing => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body sent to the caller.
    pub fn body(&self) -> String {
        match self {
            Self::ArtifactMissing => self.to_string(),
            Self::ConversionFailed(_) => "Error during TTS conversion".to_string(),
            other => format!("Exception occurred: {other}"),
        }
    }
}

impl From<hound::Error> for SpeakError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) if io.kind() == io::ErrorKind::NotFound => {
                Self::ArtifactMissing
            }
            hound::Error::IoError(io) => Self::Io(io),
            other => Self::UnsupportedFormat(other.to_string()),
        }
    }
}

impl IntoResponse for SpeakError {
    fn into_response(self) -> Response {
        (self.status(), self.body()).into_response()
    }
}
