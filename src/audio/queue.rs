use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::clip::{AudioClip, AudioFormat};
use super::sink::AudioSink;

/// Gap inserted after a clip finishes naturally, so sentence boundaries
/// don't clip into each other.
pub const DEFAULT_INTER_CLIP_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Speaking,
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub inter_clip_pause: Duration,
    /// Skip sniffing and treat every clip as this format
    pub forced_format: Option<AudioFormat>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            inter_clip_pause: DEFAULT_INTER_CLIP_PAUSE,
            forced_format: None,
        }
    }
}

/// Plays speech clips strictly one at a time, in the order they arrived.
///
/// Clones share the same backlog. Front ends watch [`subscribe`] to mute
/// the microphone while the assistant is speaking.
///
/// [`subscribe`]: AudioPlaybackQueue::subscribe
#[derive(Clone)]
pub struct AudioPlaybackQueue {
    shared: Arc<Shared>,
}

struct Shared {
    sink: Arc<dyn AudioSink>,
    options: QueueOptions,
    state: Mutex<QueueState>,
    speaking: watch::Sender<PlaybackState>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<String>,
    /// A pump task owns playback
    running: bool,
    /// Bumped by `clear` so a pump that outlived it stops touching state
    generation: u64,
    pump: Option<AbortHandle>,
}

impl Shared {
    // Callers hold the state lock so transitions are ordered with backlog changes.
    fn set_state(&self, next: PlaybackState) {
        let changed = self.speaking.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = ?next, "playback state changed");
        }
    }
}

impl AudioPlaybackQueue {
    pub fn new(sink: Arc<dyn AudioSink>, options: QueueOptions) -> Self {
        let (speaking, _) = watch::channel(PlaybackState::Idle);
        Self {
            shared: Arc::new(Shared {
                sink,
                options,
                state: Mutex::new(QueueState::default()),
                speaking,
            }),
        }
    }

    /// Append a base64 clip. Starts playback if nothing is playing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, payload: impl Into<String>) {
        let mut state = self.shared.state.lock();
        state.backlog.push_back(payload.into());
        if state.running {
            return;
        }

        state.running = true;
        self.shared.set_state(PlaybackState::Speaking);
        let handle = tokio::spawn(pump(self.shared.clone(), state.generation));
        state.pump = Some(handle.abort_handle());
    }

    /// Drop the backlog and cut off the current clip.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        // Under the lock: any clip enqueued concurrently starts after the stop.
        self.shared.sink.stop();
        let dropped = state.backlog.len();
        state.backlog.clear();
        state.generation += 1;
        state.running = false;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        self.shared.set_state(PlaybackState::Idle);
        if dropped > 0 {
            tracing::debug!(dropped, "cleared audio backlog");
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.speaking.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == PlaybackState::Speaking
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.shared.speaking.subscribe()
    }

    /// Clips waiting behind the one currently playing.
    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    /// Resolves once the queue has drained (or immediately if idle).
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|state| *state == PlaybackState::Idle).await;
    }
}

async fn pump(shared: Arc<Shared>, generation: u64) {
    loop {
        let payload = {
            let mut state = shared.state.lock();
            if state.generation != generation {
                return;
            }
            match state.backlog.pop_front() {
                Some(payload) => {
                    shared.set_state(PlaybackState::Speaking);
                    payload
                }
                None => {
                    state.running = false;
                    state.pump = None;
                    shared.set_state(PlaybackState::Idle);
                    return;
                }
            }
        };

        let outcome = match AudioClip::from_base64(&payload, shared.options.forced_format) {
            Ok(clip) => shared.sink.play(clip).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => tokio::time::sleep(shared.options.inter_clip_pause).await,
            // no pause after a failure, move straight on
            Err(e) => tracing::warn!(error = %e, "skipping audio clip"),
        }
    }
}
