use thiserror::Error;

/// Failures that end a chat turn before the stream completes.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("chat stream failed: {0}")]
    Stream(String),
}

/// Failures while turning a clip payload into sound.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("empty audio payload")]
    Empty,

    #[error("could not decode {format} audio: {message}")]
    Decode { format: String, message: String },

    #[error("audio output unavailable: {0}")]
    Device(String),

    #[error("playback failed: {0}")]
    Playback(String),
}
