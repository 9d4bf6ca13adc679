//! The downstream agent runtime contract (spec §6): newline-framed JSON
//! over the subprocess's stdin/stdout.

use serde::{Deserialize, Serialize};

use super::Attachment;

/// Written to the runtime's stdin to begin or continue a delivery.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInputFrame {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub cwd: String,
}

/// Written to the runtime's stdin to request cancellation of the
/// in-flight delivery.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeAbortFrame {
    pub abort: bool,
}

impl Default for RuntimeAbortFrame {
    fn default() -> Self {
        Self { abort: true }
    }
}

/// One event frame read from the runtime's stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEventFrame {
    MessageStart,
    MessageEnd {
        #[serde(default)]
        text: Option<String>,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        text: Option<String>,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        text: String,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        text: String,
        #[serde(default)]
        is_error: bool,
    },
    SpeakToUser {
        text: String,
    },
    ContextUsage {
        used: u64,
        total: u64,
    },
}
