use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mimir_voice::audio::{AudioPlaybackQueue, AudioSink, NullSink};
use mimir_voice::chat::{HttpChatClient, SendParams, SessionEvent, StreamingChatSession};
use mimir_voice::{ChatMessage, ChatRole, Config, MessageKind};

#[derive(Parser)]
#[command(name = "mimir")]
#[command(about = "Talk to the Mimir assistant from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Backend base URL (overrides config and MIMIR_API_URL)
    #[arg(long, global = true)]
    url: Option<String>,
    /// Personality intensity, 0-100
    #[arg(long, global = true)]
    intensity: Option<u8>,
    /// Ask the backend not to synthesize speech
    #[arg(long, global = true)]
    mute: bool,
    /// Never open an audio device
    #[arg(long, global = true)]
    no_audio: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation (/reset to start over, /quit to leave)
    Chat,
    /// Send a single message and print the reply
    Ask {
        /// Your message
        message: String,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load config, using defaults");
        Config::new()
    });
    if let Some(url) = &cli.url {
        config.base_url = url.clone();
    }
    if let Some(intensity) = cli.intensity {
        config.personality_intensity = intensity.min(100);
    }
    if cli.mute {
        config.mute = true;
    }

    match cli.command {
        Commands::Config { save } => show_config(&config, save)?,
        Commands::Ask { message } => {
            let (session, mut events) = build_session(&config, cli.no_audio);
            run_turn(&session, &mut events, &message, &config.send_params()).await;
        }
        Commands::Chat => {
            let (session, mut events) = build_session(&config, cli.no_audio);
            chat_loop(&session, &mut events, &config.send_params()).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mimir_voice=info,mimir=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_sink(no_audio: bool) -> Arc<dyn AudioSink> {
    #[cfg(feature = "audio")]
    if !no_audio {
        match mimir_voice::audio::RodioSink::new() {
            Ok(sink) => return Arc::new(sink),
            Err(e) => tracing::warn!(error = %e, "audio output unavailable, continuing silently"),
        }
    }
    #[cfg(not(feature = "audio"))]
    if !no_audio {
        tracing::debug!("built without the audio feature, speech is discarded");
    }
    Arc::new(NullSink)
}

fn build_session(
    config: &Config,
    no_audio: bool,
) -> (StreamingChatSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = AudioPlaybackQueue::new(build_sink(no_audio), config.queue_options());
    let session = StreamingChatSession::new(Arc::new(HttpChatClient::new(&config.base_url)), tx)
        .with_options(config.session_options())
        .with_audio(queue);
    (session, rx)
}

async fn chat_loop(
    session: &StreamingChatSession,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    params: &SendParams,
) -> Result<()> {
    println!("Mimir is listening. /reset to start over, /quit to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                // reset notifications are not interesting here
                while events.try_recv().is_ok() {}
                println!("(conversation cleared)");
            }
            text => run_turn(session, events, text, params).await,
        }
    }

    if let Some(audio) = session.audio() {
        audio.clear();
    }
    Ok(())
}

/// Send one message and render events until the turn is done and the
/// assistant has stopped speaking.
async fn run_turn(
    session: &StreamingChatSession,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    text: &str,
    params: &SendParams,
) {
    if session.send(text, params).is_none() {
        return;
    }

    let mut printer = ReplyPrinter::default();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Status(Some(status)) => eprintln!("  ... {status}"),
            SessionEvent::Status(None) | SessionEvent::AudioClip(_) => {}
            SessionEvent::TranscriptChanged(messages) => printer.update(&messages),
            SessionEvent::ToolsInvoked(tools) => {
                printer.finish_line();
                eprintln!("  [tools: {}]", tools.tools_used.join(", "));
            }
            SessionEvent::Error(message) => {
                tracing::error!(error = %message, "turn failed");
            }
            SessionEvent::Done => break,
        }
    }
    printer.finish_line();

    if let Some(audio) = session.audio() {
        audio.wait_idle().await;
    }
}

/// Prints the assistant reply incrementally as chunks land.
#[derive(Default)]
struct ReplyPrinter {
    /// Transcript index of the message being printed
    current: Option<usize>,
    printed: String,
    open_line: bool,
}

impl ReplyPrinter {
    fn update(&mut self, messages: &[ChatMessage]) {
        let replies = messages
            .iter()
            .rposition(|m| m.role == ChatRole::User)
            .map_or(0, |idx| idx + 1);

        for (idx, message) in messages.iter().enumerate().skip(replies) {
            if self.current.is_some_and(|current| idx < current) {
                continue;
            }
            if self.current != Some(idx) {
                self.finish_line();
                self.current = Some(idx);
                self.printed.clear();
            }

            match message.kind {
                MessageKind::ToolNotice => {
                    if self.printed.is_empty() {
                        println!("  ({})", message.content);
                        self.printed = message.content.clone();
                    }
                }
                MessageKind::Text => {
                    if let Some(rest) = message.content.strip_prefix(self.printed.as_str()) {
                        print!("{rest}");
                    } else {
                        // final text rewrote what was streamed
                        print!("\n{}", message.content);
                    }
                    let _ = std::io::stdout().flush();
                    self.printed = message.content.clone();
                    self.open_line = true;
                }
            }
        }
    }

    fn finish_line(&mut self) {
        if self.open_line {
            println!();
            self.open_line = false;
        }
    }
}

fn show_config(config: &Config, save: bool) -> Result<()> {
    let mut shown = config.clone();
    if shown.bearer_token.is_some() {
        shown.bearer_token = Some("********".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);

    if save {
        config.save()?;
        println!("Saved to {}", Config::get_config_path()?.display());
    }
    Ok(())
}
