//! Defensive field extraction from agent callback payloads.
//!
//! The agent's schema is loose: prose arrives under one of several field
//! names, `is_final` may be a bool or a string, and terminal turns do not
//! always set it. Everything here tolerates missing or mistyped fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::CommandCall;

/// Fields that may carry the agent's prose, in priority order.
pub const CONTENT_FIELDS: &[&str] = &["message", "content", "response", "text"];

/// `status` values that mean "still working, nothing to do yet".
const WORKING_STATUSES: &[&str] = &["working", "start working"];

/// Conversation identifiers echoed back in result reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl SessionFields {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let field = |name: &str| match obj.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            task_id: field("task_id"),
            session_id: field("session_id"),
            conversation_id: field("conversation_id"),
        }
    }

    /// Overwrite fields that `other` carries; keep the rest.
    pub fn merge(&mut self, other: &SessionFields) {
        if other.task_id.is_some() {
            self.task_id.clone_from(&other.task_id);
        }
        if other.session_id.is_some() {
            self.session_id.clone_from(&other.session_id);
        }
        if other.conversation_id.is_some() {
            self.conversation_id.clone_from(&other.conversation_id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.task_id.is_none() && self.session_id.is_none() && self.conversation_id.is_none()
    }
}

/// A callback payload after field extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    /// First non-blank content field, as sent. Empty if none.
    pub content: String,
    pub command_calls: Vec<CommandCall>,
    /// `is_final` as sent, if it parsed as a bool.
    pub explicit_final: Option<bool>,
    pub status: Option<String>,
    /// `command_results` echoed by the agent, if any.
    pub command_results: Option<Vec<Value>>,
    pub session: SessionFields,
}

impl AgentResponse {
    /// Extract fields from a raw payload. Returns `None` for non-objects.
    pub fn from_value(payload: &Value) -> Option<Self> {
        let obj = payload.as_object()?;

        let command_calls = match obj.get("command_calls") {
            Some(Value::Array(calls)) => calls.iter().map(CommandCall::from_value).collect(),
            _ => Vec::new(),
        };

        let command_results = match obj.get("command_results") {
            Some(Value::Array(results)) => Some(results.clone()),
            _ => None,
        };

        Some(Self {
            content: extract_content(obj),
            command_calls,
            explicit_final: obj.get("is_final").and_then(parse_flag),
            status: obj
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string()),
            command_results,
            session: SessionFields::from_object(obj),
        })
    }

    /// Whether the payload is only a "still working" notice.
    pub fn is_working_status(&self) -> bool {
        self.status.as_deref().is_some_and(|status| {
            WORKING_STATUSES
                .iter()
                .any(|w| status.eq_ignore_ascii_case(w))
        })
    }

    pub fn has_command_calls(&self) -> bool {
        !self.command_calls.is_empty()
    }

    /// Finality per [`is_final_turn`].
    pub fn is_final(&self) -> bool {
        is_final_turn(self.explicit_final, self.has_command_calls(), &self.content)
    }
}

/// First non-blank string among [`CONTENT_FIELDS`], returned untrimmed.
pub fn extract_content(obj: &Map<String, Value>) -> String {
    CONTENT_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field).and_then(|v| v.as_str()))
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Parse `true`, `false`, `"true"` or `"false"`.
fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Decide whether a turn ends the conversation.
///
/// Final if the agent says so, or if it sent prose with no command calls.
/// The agent does not always set `is_final` on its last turn, so the
/// second rule is needed; it can misread a narration-only intermediate turn
/// as final.
pub fn is_final_turn(explicit_final: Option<bool>, has_command_calls: bool, content: &str) -> bool {
    explicit_final == Some(true) || (!has_command_calls && !content.trim().is_empty())
}

/// One-line summary of `command_results` for turns without prose.
pub fn summarize_command_results(results: &[Value]) -> String {
    let total = results.len();
    let failed = results
        .iter()
        .filter(|r| r.get("status").and_then(|s| s.as_str()) != Some("success"))
        .count();

    if total == 0 {
        "No commands were executed.".to_string()
    } else if failed == 0 {
        format!("All {} command(s) completed successfully.", total)
    } else {
        format!("{} of {} command(s) failed.", failed, total)
    }
}
