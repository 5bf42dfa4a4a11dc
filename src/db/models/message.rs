//! Message model (§3): a chat turn, written by the agent runtime and read
//! by the Activity Stream (C8) and commit/session history views.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub project_id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub tokens_input: Option<i64>,
    pub tokens_output: Option<i64>,
    pub context_tokens: Option<i64>,
    pub blocks: Option<String>,
    pub timestamp: String,
}

/// The file-operation marker the agent runtime embeds in assistant
/// messages: `"🔧 " + json({type, path})`. Parse failures are recoverable.
pub const FILE_OP_MARKER: &str = "🔧 ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    pub path: String,
}

impl Message {
    pub fn file_operation(&self) -> Option<Result<FileOperation, serde_json::Error>> {
        if self.role != MessageRole::Assistant.as_str() {
            return None;
        }
        self.content
            .strip_prefix(FILE_OP_MARKER)
            .map(serde_json::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> Message {
        Message {
            id: 1,
            project_id: "7".to_string(),
            session_id: "s1".to_string(),
            role: role.to_string(),
            content: content.to_string(),
            tokens_input: None,
            tokens_output: None,
            context_tokens: None,
            blocks: None,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn file_operation_parses_marker() {
        let m = msg("assistant", "🔧 {\"type\":\"edit\",\"path\":\"a.ts\"}");
        let op = m.file_operation().unwrap().unwrap();
        assert_eq!(op.op_type, "edit");
        assert_eq!(op.path, "a.ts");
    }

    #[test]
    fn file_operation_none_for_user_messages() {
        let m = msg("user", "🔧 {\"type\":\"edit\",\"path\":\"a.ts\"}");
        assert!(m.file_operation().is_none());
    }

    #[test]
    fn file_operation_is_parse_error_on_malformed_json() {
        let m = msg("assistant", "🔧 not json");
        assert!(m.file_operation().unwrap().is_err());
    }

    #[test]
    fn plain_assistant_message_has_no_file_operation() {
        let m = msg("assistant", "here's the change");
        assert!(m.file_operation().is_none());
    }
}
