use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("settings file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech service returned {status} for chunk {chunk}")]
    Status {
        status: reqwest::StatusCode,
        chunk: usize,
    },

    #[error("voice clone model failed: {0}")]
    Model(String),

    #[error("reference voice sample not found: {0}")]
    MissingReference(PathBuf),

    #[error("failed to write audio artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to read audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode audio: {0}")]
    Decode(#[from] rodio::decoder::DecoderError),

    #[error("decoded audio is empty")]
    Empty,

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("output stream error: {0}")]
    Stream(#[from] rodio::StreamError),

    #[error("sink error: {0}")]
    Sink(#[from] rodio::PlayError),

    #[error("no external player found on PATH")]
    NoPlayer,

    #[error("external player {player} exited with {status}")]
    Player {
        player: String,
        status: std::process::ExitStatus,
    },
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected translation response shape")]
    Shape,
}

#[derive(Debug, Error)]
pub enum DeviceEnumerationError {
    #[error("failed to query audio devices: {0}")]
    Query(#[from] cpal::DevicesError),
}

#[derive(Debug, Error)]
pub enum ChatboxError {
    #[error("failed to encode OSC packet: {0}")]
    Encode(String),

    #[error("failed to send OSC packet: {0}")]
    Send(#[from] std::io::Error),
}
