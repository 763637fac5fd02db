//! Session frames exchanged after a successful handshake
//!
//! One JSON object per line. Outbound commands carry an id so that the
//! matching `result` frame can be routed back to the caller; `update` frames
//! are unsolicited and go to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command sent on disconnect so the server can release its side.
pub const EXIT_COMMAND: &str = "exit";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub id: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl CommandFrame {
    pub fn new(id: u64, command: impl Into<String>, args: Value) -> Self {
        Self {
            id,
            command: command.into(),
            args,
        }
    }

    pub fn exit(id: u64) -> Self {
        Self::new(id, EXIT_COMMAND, Value::Null)
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<Vec<u8>, FrameError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Unsolicited model update pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Reply to a [`CommandFrame`] with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub id: u64,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Update(UpdateFrame),
    Result(ResultFrame),
}

impl InboundFrame {
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, FrameError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
