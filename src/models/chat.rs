use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DocumentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// A persistent, resumable chat thread bound to one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub name: String,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "pdf_id")]
    pub document_id: DocumentId,
}

/// What the UI needs to draw the chat panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub session: Option<ChatSession>,
    pub transcript: Vec<Message>,
    pub is_streaming: bool,
}

/// Result of a `send` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server closed the stream normally.
    Completed,
    /// The session was replaced mid-stream; remaining chunks were dropped.
    Cancelled,
    /// Preconditions not met (empty text, no session, stream already running).
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_entries_ignore_extra_fields() {
        let raw = r#"[
            {"id": 1, "role": "user", "content": "hi", "created_at": "2024-01-01T00:00:00"},
            {"id": 2, "role": "assistant", "content": "hello", "created_at": "2024-01-01T00:00:01"}
        ]"#;
        let messages: Vec<Message> = serde_json::from_str(raw).unwrap();
        assert_eq!(messages, vec![Message::user("hi"), Message::assistant("hello")]);
    }

    #[test]
    fn system_role_is_rejected() {
        let raw = r#"{"role": "system", "content": "x"}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }

    #[test]
    fn session_reads_pdf_id() {
        let raw = r#"{"id": "abc", "name": "Chat - a.pdf", "created_at": "2024-01-01T08:00:00.5", "pdf_id": 4}"#;
        let session: ChatSession = serde_json::from_str(raw).unwrap();
        assert_eq!(session.document_id, 4);
        assert_eq!(session.name, "Chat - a.pdf");
    }
}
