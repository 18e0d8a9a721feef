//! Worker wire protocol - defines only the message shapes
//! Host and worker images are built from the same crate so they never drift.
//!
//! One request, exactly one reply, over a persistent WebSocket.
//! The worker never sends unsolicited messages.
use serde::{Deserialize, Serialize};

/// Port the worker listens on inside its container
pub const WORKER_PORT: u16 = 8765;

/// Placeholder reply when a program produced neither stdout nor stderr
pub const EMPTY_OUTPUT_MESSAGE: &str = "Code executed successfully with no output";

/// One job sent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub code: String,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// The single reply to a [`JobMessage`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    /// Set when the worker's own job timeout fired
    #[serde(default)]
    pub timed_out: bool,
    /// The limit the worker enforced, set alongside `timed_out`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_secs: Option<u64>,
}

impl JobReply {
    /// Exit code 0
    pub fn success(stdout: String, stderr: String) -> Self {
        let output = prefer_output(stdout, &stderr);
        Self {
            status: ReplyStatus::Success,
            output,
            error: None,
            timed_out: false,
            limit_secs: None,
        }
    }

    /// Non-zero exit: output prefers stdout, then stderr, then the placeholder
    pub fn failure(stdout: String, stderr: String) -> Self {
        let output = prefer_output(stdout, &stderr);
        Self {
            status: ReplyStatus::Error,
            output,
            error: Some(stderr),
            timed_out: false,
            limit_secs: None,
        }
    }

    /// Compiler rejected the source; diagnostics travel in both fields
    pub fn compile_error(diagnostics: String) -> Self {
        let message = format!("Compilation error:\n{}", diagnostics);
        Self {
            status: ReplyStatus::Error,
            output: message.clone(),
            error: Some(message),
            timed_out: false,
            limit_secs: None,
        }
    }

    /// Worker-side failure that never reached the user's program
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            output: String::new(),
            error: Some(message.into()),
            timed_out: false,
            limit_secs: None,
        }
    }

    pub fn timeout(limit_secs: u64, partial_stdout: String) -> Self {
        let message = format!(
            "Error: Code execution timed out ({} second limit). Your code may have an infinite loop or is taking too long to execute.",
            limit_secs
        );
        let output = if partial_stdout.is_empty() {
            message.clone()
        } else {
            format!("{}\n{}", partial_stdout, message)
        };
        Self {
            status: ReplyStatus::Error,
            output,
            error: Some(message),
            timed_out: true,
            limit_secs: Some(limit_secs),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }
}

fn prefer_output(stdout: String, stderr: &str) -> String {
    if !stdout.is_empty() {
        stdout
    } else if !stderr.is_empty() {
        stderr.to_string()
    } else {
        EMPTY_OUTPUT_MESSAGE.to_string()
    }
}
