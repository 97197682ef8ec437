pub mod clip;
pub mod queue;
pub mod sink;

pub use clip::{AudioClip, AudioFormat};
pub use queue::{AudioPlaybackQueue, PlaybackState, QueueOptions};
pub use sink::{AudioSink, NullSink};

#[cfg(feature = "audio")]
pub use sink::RodioSink;
