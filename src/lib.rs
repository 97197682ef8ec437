pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod state;

// Re-export main types for convenience
pub use audio::{AudioClip, AudioFormat, AudioPlaybackQueue, AudioSink, NullSink, PlaybackState};
pub use chat::{HttpChatClient, SendParams, SessionEvent, StreamEvent, StreamingChatSession};
pub use config::Config;
pub use error::{AudioError, ChatError};
pub use state::{ChatMessage, ChatRole, MessageKind};
