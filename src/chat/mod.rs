pub mod client;
pub mod decoder;
pub mod event;
pub mod session;

pub use client::{ByteStream, ChatRequest, ChatTransport, HttpChatClient};
pub use decoder::{Line, LineDecoder};
pub use event::{StreamEvent, ToolInvocation, ToolResult};
pub use session::{SendParams, SessionEvent, SessionOptions, StreamingChatSession};
