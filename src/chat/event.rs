//! Wire events of the `/chat` NDJSON stream.

use serde::{Deserialize, Serialize};

/// One line of the chat response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Transient progress text, e.g. "Consulting the runes..."
    Status {
        #[serde(default)]
        content: String,
    },

    /// Incremental assistant text.
    ResponseChunk {
        #[serde(default)]
        text: String,
    },

    /// One synthesized sentence of speech.
    AudioChunk {
        #[serde(default)]
        audio_base64: Option<String>,
    },

    /// Authoritative full text for the turn, plus tool metadata.
    Response {
        #[serde(default)]
        text: String,
        #[serde(default)]
        tools_used: Option<Vec<String>>,
        #[serde(default)]
        tool_results: Option<Vec<ToolResult>>,
        /// Whole-turn audio from backends that do not stream speech.
        #[serde(default)]
        audio_base64: Option<String>,
    },

    /// The backend failed while generating the turn. Some backend paths
    /// put the message under `content`.
    Error {
        #[serde(default, alias = "content")]
        text: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

/// Result of one backend tool call, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Tool metadata relayed to front-end collaborators (calendar refresh,
/// cooking mode, ...). The session never interprets it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tools_used: Vec<String>,
    pub tool_results: Vec<ToolResult>,
}

impl ToolInvocation {
    pub fn result_for(&self, tool: &str) -> Option<&serde_json::Value> {
        self.tool_results
            .iter()
            .find(|r| r.tool == tool)
            .map(|r| &r.result)
    }
}

impl StreamEvent {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Tool metadata carried by a final `response`, if any tool ran.
    pub fn tool_invocation(&self) -> Option<ToolInvocation> {
        match self {
            StreamEvent::Response {
                tools_used: Some(tools),
                tool_results,
                ..
            } if !tools.is_empty() => Some(ToolInvocation {
                tools_used: tools.clone(),
                tool_results: tool_results.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}
