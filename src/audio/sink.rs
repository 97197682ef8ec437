//! Output devices for the playback queue.

use async_trait::async_trait;

use super::clip::AudioClip;
use crate::error::AudioError;

/// Something that can play one clip at a time.
///
/// `play` resolves when the clip has finished (or failed). `stop` cuts off
/// whatever is currently audible; a pending `play` then resolves.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: AudioClip) -> Result<(), AudioError>;

    fn stop(&self);
}

/// Discards audio. Used with `--no-audio`, muted sessions, and builds
/// without the `audio` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, clip: AudioClip) -> Result<(), AudioError> {
        tracing::debug!(bytes = clip.len(), format = %clip.format, "discarding audio clip");
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(feature = "audio")]
pub use rodio_sink::RodioSink;

#[cfg(feature = "audio")]
mod rodio_sink {
    use std::io::Cursor;
    use std::sync::{mpsc, Arc};

    use async_trait::async_trait;
    use rodio::{Decoder, OutputStreamBuilder, Sink};

    use super::AudioSink;
    use crate::audio::clip::AudioClip;
    use crate::error::AudioError;

    /// Default output device via rodio.
    ///
    /// The output stream lives on its own thread for the lifetime of the
    /// sink; only the `Sink` handle crosses threads.
    pub struct RodioSink {
        sink: Arc<Sink>,
        _shutdown: mpsc::Sender<()>,
    }

    impl RodioSink {
        pub fn new() -> Result<Self, AudioError> {
            let (ready_tx, ready_rx) = mpsc::channel();
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            std::thread::Builder::new()
                .name("mimir-audio".to_string())
                .spawn(move || {
                    let stream = match OutputStreamBuilder::open_default_stream() {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
                            return;
                        }
                    };
                    let sink = Arc::new(Sink::connect_new(stream.mixer()));
                    if ready_tx.send(Ok(sink.clone())).is_err() {
                        return;
                    }
                    // Keep the stream open until the owning RodioSink is dropped
                    let _ = shutdown_rx.recv();
                    sink.stop();
                    drop(stream);
                })
                .map_err(|e| AudioError::Device(e.to_string()))?;

            let sink = ready_rx
                .recv()
                .map_err(|_| AudioError::Device("audio thread exited".to_string()))??;

            Ok(Self {
                sink,
                _shutdown: shutdown_tx,
            })
        }
    }

    #[async_trait]
    impl AudioSink for RodioSink {
        async fn play(&self, clip: AudioClip) -> Result<(), AudioError> {
            let format = clip.format;
            let source = Decoder::new(Cursor::new(clip.bytes)).map_err(|e| AudioError::Decode {
                format: format.to_string(),
                message: e.to_string(),
            })?;

            self.sink.append(source);

            let sink = self.sink.clone();
            tokio::task::spawn_blocking(move || sink.sleep_until_end())
                .await
                .map_err(|e| AudioError::Playback(e.to_string()))
        }

        fn stop(&self) {
            self.sink.stop();
        }
    }
}
