//! Command catalog trait and command call types.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Commands that modify a file and therefore need a snapshot beforehand.
pub const MUTATING_COMMANDS: &[&str] = &["write", "append", "replace"];

/// Returns true if `command` is one of the file-mutating commands.
pub fn is_mutating_command(command: &str) -> bool {
    MUTATING_COMMANDS.contains(&command)
}

/// Error type for command execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::ExecutionFailed(err.to_string())
    }
}

/// A single command issued by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCall {
    /// Command name, looked up in the catalog.
    pub command: String,
    /// Positional arguments, in the order the agent sent them.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Named options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Map<String, Value>>,
    /// Correlation token echoed back in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl CommandCall {
    /// Create a call with positional arguments.
    pub fn new(command: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            args,
            opts: None,
            id: None,
        }
    }

    /// Set the correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the named options.
    pub fn with_opts(mut self, opts: Map<String, Value>) -> Self {
        self.opts = Some(opts);
        self
    }

    /// Build a call from an untrusted JSON entry.
    ///
    /// Never fails: a malformed entry becomes a call with an empty command
    /// name, which the catalog rejects, so the result list still lines up
    /// with what the agent sent.
    pub fn from_value(value: &Value) -> Self {
        let command = value
            .get("command")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let args = match value.get("args") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };

        let opts = value.get("opts").and_then(|v| v.as_object()).cloned();

        let id = match value.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Self {
            command,
            args,
            opts,
            id,
        }
    }

    /// Positional argument `index` as a string.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|v| v.as_str())
    }

    /// Named option `key` as a string.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.opts
            .as_ref()
            .and_then(|opts| opts.get(key))
            .and_then(|v| v.as_str())
    }

    /// Named option `key` as a bool.
    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.opts
            .as_ref()
            .and_then(|opts| opts.get(key))
            .and_then(|v| v.as_bool())
    }

    /// The file this call operates on: the first argument, or `opts.path`.
    pub fn target_path(&self) -> Option<&str> {
        self.arg_str(0)
            .or_else(|| self.opt_str("path"))
            .filter(|p| !p.trim().is_empty())
    }
}

/// Output of a successful command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub output: Value,
}

impl CommandOutput {
    /// Create an output with a JSON result.
    pub fn json(output: Value) -> Self {
        Self { output }
    }

    /// Create a text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output: Value::String(text.into()),
        }
    }
}

/// Outcome of one command call, in the order the calls were issued.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub command: String,
    pub ok: bool,
    /// Present iff `ok`.
    pub output: Option<Value>,
    /// Present iff not `ok`.
    pub error: Option<String>,
    pub args: Vec<Value>,
    pub elapsed_ms: u64,
    pub id: Option<String>,
    /// Set on results synthesized for calls skipped after a cancellation.
    pub cancelled: bool,
}

impl ToolResult {
    pub fn success(call: &CommandCall, output: Value, elapsed: Duration) -> Self {
        Self {
            command: call.command.clone(),
            ok: true,
            output: Some(output),
            error: None,
            args: call.args.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
            id: call.id.clone(),
            cancelled: false,
        }
    }

    pub fn failure(call: &CommandCall, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            command: call.command.clone(),
            ok: false,
            output: None,
            error: Some(error.into()),
            args: call.args.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
            id: call.id.clone(),
            cancelled: false,
        }
    }

    pub fn cancelled(call: &CommandCall) -> Self {
        Self {
            cancelled: true,
            ..Self::failure(call, "cancelled", Duration::ZERO)
        }
    }
}

/// The set of commands the agent can invoke.
///
/// Implementations return errors as values; the executor never lets one
/// failing command interrupt its siblings.
#[async_trait]
pub trait CommandCatalog: Send + Sync {
    /// Execute one command.
    async fn execute(&self, call: &CommandCall) -> Result<CommandOutput, ToolError>;

    /// Whether `command` modifies the file named by its target path.
    fn is_mutating(&self, command: &str) -> bool {
        is_mutating_command(command)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_value_full_entry() {
        let call = CommandCall::from_value(&json!({
            "command": "read",
            "args": ["src/main.rs", 10],
            "opts": {"limit": 20},
            "id": "call-1"
        }));

        assert_eq!(call.command, "read");
        assert_eq!(call.args, vec![json!("src/main.rs"), json!(10)]);
        assert_eq!(call.opts.unwrap().get("limit"), Some(&json!(20)));
        assert_eq!(call.id.as_deref(), Some("call-1"));
    }

    #[test]
    fn test_from_value_is_lenient() {
        let call = CommandCall::from_value(&json!({"args": "solo", "id": 7}));
        assert_eq!(call.command, "");
        assert_eq!(call.args, vec![json!("solo")]);
        assert_eq!(call.id.as_deref(), Some("7"));

        let call = CommandCall::from_value(&json!("not an object"));
        assert_eq!(call.command, "");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_target_path_prefers_first_arg() {
        let mut opts = Map::new();
        opts.insert("path".into(), json!("from_opts.txt"));

        let call = CommandCall::new("write", vec![json!("a.txt")]).with_opts(opts.clone());
        assert_eq!(call.target_path(), Some("a.txt"));

        let call = CommandCall::new("write", vec![]).with_opts(opts);
        assert_eq!(call.target_path(), Some("from_opts.txt"));

        let call = CommandCall::new("write", vec![json!(42)]);
        assert_eq!(call.target_path(), None);
    }

    #[test]
    fn test_cancelled_result_shape() {
        let call = CommandCall::new("read", vec![json!("a.txt")]).with_id("x");
        let result = ToolResult::cancelled(&call);

        assert!(!result.ok);
        assert!(result.cancelled);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(result.id.as_deref(), Some("x"));
        assert_eq!(result.args, call.args);
    }

    #[test]
    fn test_mutating_classification() {
        assert!(is_mutating_command("write"));
        assert!(is_mutating_command("append"));
        assert!(is_mutating_command("replace"));
        assert!(!is_mutating_command("read"));
        assert!(!is_mutating_command("Write"));
    }
}
