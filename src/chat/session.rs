use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use super::client::{ChatRequest, ChatTransport};
use super::decoder::{Line, LineDecoder};
use super::event::{StreamEvent, ToolInvocation};
use crate::audio::AudioPlaybackQueue;
use crate::error::ChatError;
use crate::state::{next_timestamp, ChatMessage};

pub const DEFAULT_FALLBACK_MESSAGE: &str = "The threads of fate are tangled. I cannot respond.";
pub const DEFAULT_THINKING_STATUS: &str = "Thinking...";

/// Per-send knobs owned by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendParams {
    /// 0-100, clamped
    pub personality_intensity: u8,
    pub mute: bool,
    pub bearer_token: Option<String>,
}

impl Default for SendParams {
    fn default() -> Self {
        Self {
            personality_intensity: 75,
            mute: false,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Status shown from `send` until the backend reports something better
    pub thinking_status: Option<String>,
    /// Assistant text appended when a turn fails
    pub fallback_message: String,
    /// Append a tool notice message after turns that ran tools
    pub tool_notices: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            thinking_status: Some(DEFAULT_THINKING_STATUS.to_string()),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            tool_notices: false,
        }
    }
}

/// Notifications for the front end, delivered in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// `None` clears the status line
    Status(Option<String>),
    TranscriptChanged(Vec<ChatMessage>),
    AudioClip(String),
    ToolsInvoked(ToolInvocation),
    Error(String),
    Done,
}

/// One conversation with the assistant backend.
///
/// Turns run on spawned tasks; at most one is in flight. Clones share the
/// transcript.
#[derive(Clone)]
pub struct StreamingChatSession {
    transport: Arc<dyn ChatTransport>,
    events: mpsc::UnboundedSender<SessionEvent>,
    options: SessionOptions,
    audio: Option<AudioPlaybackQueue>,
    state: Arc<Mutex<SessionState>>,
}

#[derive(Default)]
struct SessionState {
    transcript: Vec<ChatMessage>,
    busy: bool,
    turn: Option<AbortHandle>,
    /// Bumped by `reset`; turns from an older epoch are ignored
    epoch: u64,
}

impl StreamingChatSession {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            events,
            options: SessionOptions::default(),
            audio: None,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Forward streamed speech to `queue` as well as to the event channel.
    pub fn with_audio(mut self, queue: AudioPlaybackQueue) -> Self {
        self.audio = Some(queue);
        self
    }

    pub fn audio(&self) -> Option<&AudioPlaybackQueue> {
        self.audio.as_ref()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.state.lock().transcript.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    /// Start a turn. Returns `None` without doing anything if `text` is
    /// blank or a turn is already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, text: &str, params: &SendParams) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() {
            return None;
        }

        let mut state = self.state.lock();
        if state.busy {
            tracing::debug!("turn already in flight, ignoring send");
            return None;
        }
        state.busy = true;

        let timestamp = next_timestamp(&state.transcript);
        state.transcript.push(ChatMessage::user(text, timestamp));
        self.emit(SessionEvent::TranscriptChanged(state.transcript.clone()));
        if let Some(status) = &self.options.thinking_status {
            self.emit(SessionEvent::Status(Some(status.clone())));
        }

        let request = ChatRequest {
            message: text.to_string(),
            personality_intensity: params.personality_intensity.min(100),
            mute: params.mute,
        };
        let turn = Turn {
            session: self.clone(),
            epoch: state.epoch,
            assistant: None,
            status_shown: self.options.thinking_status.is_some(),
        };
        let handle = tokio::spawn(turn.run(request, params.bearer_token.clone()));
        state.turn = Some(handle.abort_handle());

        Some(handle)
    }

    /// Forget the conversation: abort the in-flight turn, empty the
    /// transcript and silence any queued speech.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.epoch += 1;
            if let Some(turn) = state.turn.take() {
                turn.abort();
            }
            state.busy = false;
            state.transcript.clear();
            self.emit(SessionEvent::Status(None));
            self.emit(SessionEvent::TranscriptChanged(Vec::new()));
        }
        if let Some(audio) = &self.audio {
            audio.clear();
        }
    }

    fn emit(&self, event: SessionEvent) {
        // A front end that went away just stops listening
        let _ = self.events.send(event);
    }
}

enum TurnEnd {
    Completed,
    /// The backend reported its own failure in-band
    BackendError(String),
}

/// State of one request/response cycle.
struct Turn {
    session: StreamingChatSession,
    epoch: u64,
    /// Index of this turn's assistant text message
    assistant: Option<usize>,
    status_shown: bool,
}

impl Turn {
    async fn run(mut self, request: ChatRequest, bearer_token: Option<String>) {
        tracing::debug!(chars = request.message.len(), "starting chat turn");

        match self.stream(&request, bearer_token.as_deref()).await {
            Ok(TurnEnd::Completed) => {}
            Ok(TurnEnd::BackendError(text)) => {
                tracing::warn!(message = %text, "backend reported an error");
                self.fail(text.clone(), text);
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat turn failed");
                let fallback = self.session.options.fallback_message.clone();
                self.fail(fallback, e.to_string());
            }
        }

        self.finish();
    }

    async fn stream(
        &mut self,
        request: &ChatRequest,
        bearer_token: Option<&str>,
    ) -> Result<TurnEnd, ChatError> {
        let mut body = self.session.transport.open(request, bearer_token).await?;
        let mut decoder = LineDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk) {
                if let Some(end) = self.apply_line(line) {
                    return Ok(end);
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if let Some(end) = self.apply_line(line) {
                return Ok(end);
            }
        }

        Ok(TurnEnd::Completed)
    }

    fn apply_line(&mut self, line: Line) -> Option<TurnEnd> {
        let text = match line {
            Line::Text(text) => text,
            Line::Invalid(bytes) => {
                tracing::warn!(len = bytes.len(), "skipping stream line that is not UTF-8");
                return None;
            }
        };

        match StreamEvent::parse(&text) {
            Ok(event) => self.apply(event),
            Err(e) => {
                tracing::warn!(error = %e, line = %text, "skipping malformed stream line");
                None
            }
        }
    }

    fn apply(&mut self, event: StreamEvent) -> Option<TurnEnd> {
        let tools = event.tool_invocation();

        match event {
            StreamEvent::Status { content } => {
                let shared = self.session.state.clone();
                let Some(_state) = current(&shared, self.epoch) else {
                    return None;
                };
                self.status_shown = true;
                self.session.emit(SessionEvent::Status(Some(content)));
            }
            StreamEvent::ResponseChunk { text } => {
                let shared = self.session.state.clone();
                let Some(mut state) = current(&shared, self.epoch) else {
                    return None;
                };
                if self.status_shown {
                    self.status_shown = false;
                    self.session.emit(SessionEvent::Status(None));
                }
                match self.assistant {
                    Some(idx) => state.transcript[idx].content.push_str(&text),
                    None => {
                        let timestamp = next_timestamp(&state.transcript);
                        state.transcript.push(ChatMessage::assistant(text, timestamp));
                        self.assistant = Some(state.transcript.len() - 1);
                    }
                }
                self.session
                    .emit(SessionEvent::TranscriptChanged(state.transcript.clone()));
            }
            StreamEvent::AudioChunk { audio_base64 } => {
                if let Some(payload) = audio_base64 {
                    self.relay_audio(payload);
                }
            }
            StreamEvent::Response {
                text, audio_base64, ..
            } => {
                {
                    let shared = self.session.state.clone();
                    let Some(mut state) = current(&shared, self.epoch) else {
                        return None;
                    };
                    if self.status_shown {
                        self.status_shown = false;
                        self.session.emit(SessionEvent::Status(None));
                    }
                    match self.assistant {
                        Some(idx) => state.transcript[idx].content = text,
                        None => {
                            let timestamp = next_timestamp(&state.transcript);
                            state.transcript.push(ChatMessage::assistant(text, timestamp));
                            self.assistant = Some(state.transcript.len() - 1);
                        }
                    }
                    if let (true, Some(tools)) = (self.session.options.tool_notices, &tools) {
                        let timestamp = next_timestamp(&state.transcript);
                        let notice = format!("Used tools: {}", tools.tools_used.join(", "));
                        state.transcript.push(ChatMessage::tool_notice(notice, timestamp));
                    }
                    self.session
                        .emit(SessionEvent::TranscriptChanged(state.transcript.clone()));
                }

                if let Some(payload) = audio_base64 {
                    self.relay_audio(payload);
                }
                if let Some(tools) = tools {
                    let shared = self.session.state.clone();
                    let Some(_state) = current(&shared, self.epoch) else {
                        return None;
                    };
                    self.session.emit(SessionEvent::ToolsInvoked(tools));
                }
            }
            StreamEvent::Error { text } => {
                let text = text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| self.session.options.fallback_message.clone());
                return Some(TurnEnd::BackendError(text));
            }
            StreamEvent::Unknown => {
                tracing::debug!("ignoring stream event of unknown type");
            }
        }

        None
    }

    fn relay_audio(&self, payload: String) {
        if payload.is_empty() {
            return;
        }
        let shared = self.session.state.clone();
        let Some(_state) = current(&shared, self.epoch) else {
            return;
        };
        if let Some(audio) = &self.session.audio {
            audio.enqueue(payload.clone());
        }
        self.session.emit(SessionEvent::AudioClip(payload));
    }

    /// One fallback assistant message, then the error notification.
    fn fail(&mut self, transcript_text: String, error: String) {
        let shared = self.session.state.clone();
        let Some(mut state) = current(&shared, self.epoch) else {
            return;
        };
        if self.status_shown {
            self.status_shown = false;
            self.session.emit(SessionEvent::Status(None));
        }
        let timestamp = next_timestamp(&state.transcript);
        state
            .transcript
            .push(ChatMessage::assistant(transcript_text, timestamp));
        self.session
            .emit(SessionEvent::TranscriptChanged(state.transcript.clone()));
        self.session.emit(SessionEvent::Error(error));
    }

    fn finish(self) {
        let shared = self.session.state.clone();
        let Some(mut state) = current(&shared, self.epoch) else {
            return;
        };
        state.busy = false;
        state.turn = None;
        if self.status_shown {
            self.session.emit(SessionEvent::Status(None));
        }
        self.session.emit(SessionEvent::Done);
        tracing::debug!("chat turn finished");
    }
}

/// The session state, unless `reset` has retired the turn from `epoch`.
fn current(state: &Mutex<SessionState>, epoch: u64) -> Option<MutexGuard<'_, SessionState>> {
    let state = state.lock();
    (state.epoch == epoch).then_some(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioPlaybackQueue, NullSink, QueueOptions};
    use crate::chat::client::ByteStream;
    use crate::state::{ChatRole, MessageKind};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use tokio::sync::Notify;

    /// Replays canned reads; optionally fails, or waits for a release signal.
    #[derive(Default)]
    struct ScriptedTransport {
        reads: Vec<Result<Vec<u8>, String>>,
        status: Option<u16>,
        gate: Option<Arc<Notify>>,
        requests: Mutex<Vec<(ChatRequest, Option<String>)>>,
    }

    impl ScriptedTransport {
        fn lines(lines: &[&str]) -> Self {
            let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
            Self::reads(vec![Ok(body.into_bytes())])
        }

        fn reads(reads: Vec<Result<Vec<u8>, String>>) -> Self {
            Self {
                reads,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open(
            &self,
            request: &ChatRequest,
            bearer_token: Option<&str>,
        ) -> Result<ByteStream, ChatError> {
            self.requests
                .lock()
                .push((request.clone(), bearer_token.map(str::to_string)));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(status) = self.status {
                return Err(ChatError::Status {
                    status,
                    body: "Internal Server Error".to_string(),
                });
            }
            let reads: Vec<Result<Bytes, ChatError>> = self
                .reads
                .iter()
                .cloned()
                .map(|r| r.map(Bytes::from).map_err(ChatError::Stream))
                .collect();
            Ok(stream::iter(reads).boxed())
        }
    }

    fn session_with(
        transport: ScriptedTransport,
    ) -> (
        StreamingChatSession,
        Arc<ScriptedTransport>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let transport = Arc::new(transport);
        let (tx, rx) = mpsc::unbounded_channel();
        let session = StreamingChatSession::new(transport.clone(), tx);
        (session, transport, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn assistant_messages(transcript: &[ChatMessage]) -> Vec<&ChatMessage> {
        transcript
            .iter()
            .filter(|m| m.role == ChatRole::Assistant)
            .collect()
    }

    async fn run_turn(session: &StreamingChatSession, text: &str) {
        session
            .send(text, &SendParams::default())
            .expect("turn should start")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chunks_concatenate_in_order() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response_chunk","text":"The runes "}"#,
            r#"{"type":"response_chunk","text":"speak "}"#,
            r#"{"type":"response_chunk","text":"clearly."}"#,
        ]));

        run_turn(&session, "What do the runes say?").await;

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, ChatRole::User);
        assert_eq!(transcript[1].content, "The runes speak clearly.");
        assert!(transcript[0].timestamp <= transcript[1].timestamp);

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&SessionEvent::Done));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_final_overrides_chunks() {
        let (session, _, _rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response_chunk","text":"Hel"}"#,
            r#"{"type":"response_chunk","text":"lo"}"#,
            r#"{"type":"response","text":"Hello there"}"#,
        ]));

        run_turn(&session, "Hi").await;

        let transcript = session.transcript();
        let replies = assistant_messages(&transcript);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "Hello there");
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response_chunk","text":"first "}"#,
            r#"{"type":"response_chunk","text": oops"#,
            r#"{"type":"response_chunk","text":"second"}"#,
        ]));

        run_turn(&session, "Go on").await;

        let transcript = session.transcript();
        assert_eq!(transcript.last().unwrap().content, "first second");
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_final_without_chunks_creates_one_message() {
        let (session, _, _rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"status","content":"Consulting the well..."}"#,
            r#"{"type":"response","text":"Wisdom has a price."}"#,
        ]));

        run_turn(&session, "Tell me something").await;

        let transcript = session.transcript();
        let replies = assistant_messages(&transcript);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "Wisdom has a price.");
        assert_eq!(replies[0].kind, MessageKind::Text);
    }

    #[tokio::test]
    async fn test_send_while_busy_is_ignored() {
        let gate = Arc::new(Notify::new());
        let mut transport = ScriptedTransport::lines(&[r#"{"type":"response","text":"ok"}"#]);
        transport.gate = Some(gate.clone());
        let (session, transport, _rx) = session_with(transport);

        let first = session.send("one", &SendParams::default()).unwrap();
        tokio::task::yield_now().await;
        assert!(session.is_busy());
        assert!(session.send("two", &SendParams::default()).is_none());

        gate.notify_one();
        first.await.unwrap();

        assert_eq!(transport.requests.lock().len(), 1);
        let users: Vec<_> = session
            .transcript()
            .into_iter()
            .filter(|m| m.role == ChatRole::User)
            .collect();
        assert_eq!(users.len(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_blank_send_is_ignored() {
        let (session, transport, mut rx) = session_with(ScriptedTransport::lines(&[]));
        assert!(session.send("   \n", &SendParams::default()).is_none());
        assert!(transport.requests.lock().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_http_error_appends_one_fallback() {
        let mut transport = ScriptedTransport::lines(&[]);
        transport.status = Some(500);
        let (session, _, mut rx) = session_with(transport);

        run_turn(&session, "Hello?").await;

        let transcript = session.transcript();
        let replies = assistant_messages(&transcript);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, DEFAULT_FALLBACK_MESSAGE);

        let events = drain(&mut rx);
        let last_status = events
            .iter()
            .rev()
            .find_map(|e| match e {
                SessionEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_status, None);
        let errors = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(events.last(), Some(&SessionEvent::Done));

        // the session is usable again
        assert!(!session.is_busy());
        assert!(session.send("Again", &SendParams::default()).is_some());
    }

    #[tokio::test]
    async fn test_stream_failure_midway_keeps_partial_text() {
        let (session, _, mut rx) = session_with(ScriptedTransport::reads(vec![
            Ok(b"{\"type\":\"response_chunk\",\"text\":\"Par\"}\n".to_vec()),
            Err("connection reset".to_string()),
        ]));

        run_turn(&session, "Hi").await;

        let transcript = session.transcript();
        let contents: Vec<_> = assistant_messages(&transcript)
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["Par".to_string(), DEFAULT_FALLBACK_MESSAGE.to_string()]);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(msg) if msg.contains("connection reset"))));
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"status","content":"Checking the calendar..."}"#,
            r#"{"type":"response_chunk","text":"You are free."}"#,
        ]));

        run_turn(&session, "Am I busy?").await;

        let statuses: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Status(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                Some(DEFAULT_THINKING_STATUS.to_string()),
                Some("Checking the calendar...".to_string()),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stream_clears_status() {
        let (session, _, mut rx) = session_with(ScriptedTransport::reads(vec![]));

        run_turn(&session, "Anyone there?").await;

        let events = drain(&mut rx);
        assert_eq!(
            &events[events.len() - 2..],
            &[SessionEvent::Status(None), SessionEvent::Done]
        );
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_audio_forwarded_as_it_arrives() {
        let queue = AudioPlaybackQueue::new(Arc::new(NullSink), QueueOptions::default());
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"audio_chunk","audio_base64":"UklGRg=="}"#,
            r#"{"type":"audio_chunk","audio_base64":""}"#,
            r#"{"type":"audio_chunk"}"#,
            r#"{"type":"response_chunk","text":"Hi"}"#,
            r#"{"type":"audio_chunk","audio_base64":"SUQzBA=="}"#,
        ]));
        let session = session.with_audio(queue.clone());

        run_turn(&session, "Speak").await;

        let events: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::AudioClip(_) | SessionEvent::TranscriptChanged(_)
                )
            })
            .collect();
        // user message, clip, chunk, clip
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], SessionEvent::AudioClip("UklGRg==".to_string()));
        assert!(matches!(events[2], SessionEvent::TranscriptChanged(_)));
        assert_eq!(events[3], SessionEvent::AudioClip("SUQzBA==".to_string()));

        queue.wait_idle().await;
        assert!(!queue.is_speaking());
    }

    #[tokio::test]
    async fn test_legacy_final_audio_is_relayed() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response","text":"Done","audio_base64":"UklGRg=="}"#,
        ]));

        run_turn(&session, "Hi").await;

        assert!(drain(&mut rx).contains(&SessionEvent::AudioClip("UklGRg==".to_string())));
    }

    #[tokio::test]
    async fn test_tools_relayed_intact() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response","text":"Added.","tools_used":["calendar_create"],"tool_results":[{"tool":"calendar_create","result":{"id":"evt-1","subject":"Feast"}}]}"#,
        ]));

        run_turn(&session, "Add a feast").await;

        let tools = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::ToolsInvoked(tools) => Some(tools),
                _ => None,
            })
            .unwrap();
        assert_eq!(tools.tools_used, vec!["calendar_create"]);
        assert_eq!(
            tools.result_for("calendar_create").unwrap(),
            &serde_json::json!({"id": "evt-1", "subject": "Feast"})
        );
        // notices are off by default
        assert!(!session.transcript().iter().any(|m| m.is_tool_notice()));
    }

    #[tokio::test]
    async fn test_tool_notice_is_not_appended_to() {
        let (session, _, _rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response_chunk","text":"Step "}"#,
            r#"{"type":"response","text":"Step one: chop.","tools_used":["start_cooking"],"tool_results":[]}"#,
        ]));
        let session = session.with_options(SessionOptions {
            tool_notices: true,
            ..SessionOptions::default()
        });

        run_turn(&session, "Let's cook").await;

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].content, "Step one: chop.");
        assert_eq!(transcript[2].kind, MessageKind::ToolNotice);
        assert_eq!(transcript[2].content, "Used tools: start_cooking");
    }

    #[tokio::test]
    async fn test_backend_error_event_ends_turn() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response_chunk","text":"Partial"}"#,
            r#"{"type":"error","text":"The well has run dry."}"#,
            r#"{"type":"response_chunk","text":" ignored"}"#,
        ]));

        run_turn(&session, "Hi").await;

        let transcript = session.transcript();
        let contents: Vec<_> = assistant_messages(&transcript)
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["Partial", "The well has run dry."]);

        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::Error("The well has run dry.".to_string())));
        assert_eq!(events.last(), Some(&SessionEvent::Done));
    }

    #[tokio::test]
    async fn test_backend_error_content_is_kept() {
        let (session, _, mut rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"error","content":"The ravens are silent."}"#,
        ]));

        run_turn(&session, "Hi").await;

        let transcript = session.transcript();
        let replies = assistant_messages(&transcript);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "The ravens are silent.");
        assert!(drain(&mut rx).contains(&SessionEvent::Error("The ravens are silent.".to_string())));
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let (session, _, _rx) = session_with(ScriptedTransport::reads(vec![
            Ok(b"{\"type\":\"response_chu".to_vec()),
            Ok(b"nk\",\"text\":\"whole\"}\n{\"type\":\"response_chunk\",".to_vec()),
            Ok(b"\"text\":\" line\"}".to_vec()),
        ]));

        run_turn(&session, "Hi").await;

        assert_eq!(session.transcript().last().unwrap().content, "whole line");
    }

    #[tokio::test]
    async fn test_request_carries_params() {
        let (session, transport, _rx) = session_with(ScriptedTransport::lines(&[]));
        let params = SendParams {
            personality_intensity: 250,
            mute: true,
            bearer_token: Some("id-token".to_string()),
        };

        session.send("Quietly", &params).unwrap().await.unwrap();

        let requests = transport.requests.lock();
        let (request, token) = &requests[0];
        assert_eq!(request.message, "Quietly");
        assert_eq!(request.personality_intensity, 100);
        assert!(request.mute);
        assert_eq!(token.as_deref(), Some("id-token"));
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_turn() {
        let gate = Arc::new(Notify::new());
        let mut transport =
            ScriptedTransport::lines(&[r#"{"type":"response","text":"too late"}"#]);
        transport.gate = Some(gate.clone());
        let (session, _, mut rx) = session_with(transport);

        let handle = session.send("Hello", &SendParams::default()).unwrap();
        tokio::task::yield_now().await;
        session.reset();
        gate.notify_one();

        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(session.transcript().is_empty());
        assert!(!session.is_busy());
        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&SessionEvent::TranscriptChanged(Vec::new())));
    }

    #[tokio::test]
    async fn test_reset_silences_queued_speech() {
        let queue = AudioPlaybackQueue::new(Arc::new(NullSink), QueueOptions::default());
        let (session, _, _rx) = session_with(ScriptedTransport::lines(&[
            r#"{"type":"response","text":"Listen."}"#,
        ]));
        let session = session.with_audio(queue.clone());
        run_turn(&session, "Sing").await;

        queue.enqueue("UklGRg==");
        queue.enqueue("SUQzBA==");
        assert!(queue.is_speaking());

        session.reset();

        assert!(session.transcript().is_empty());
        assert!(!queue.is_speaking());
        assert_eq!(queue.backlog_len(), 0);
    }
}
