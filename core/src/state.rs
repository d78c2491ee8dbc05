use crate::error::Result;
use crate::store::JsonFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const USER_ROLE: &str = "user";
pub const ASSISTANT_ROLE: &str = "assistant";
pub const SYSTEM_ROLE: &str = "system";

/// One turn of a conversation. Serialises to the `{role, content}` message
/// shape the chat endpoint expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLine {
    pub role: String,
    pub content: String,
}

impl ConversationLine {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Append-only, chronologically ordered chat history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    #[serde(default)]
    lines: Vec<ConversationLine>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&mut self, line: ConversationLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[ConversationLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationLine> {
        self.lines.last()
    }

    /// Replaces the whole history with an empty one.
    pub fn clear(&mut self) {
        self.lines = Vec::new();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        JsonFile::new(path.as_ref()).write(self).await
    }

    /// Loads a saved conversation; a missing file yields an empty one.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Ok(JsonFile::new(path.as_ref())
            .read()
            .await?
            .unwrap_or_default())
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}: {}", line.role, line.content)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Per-stream classification state: whether the most recent non-empty delta
/// was reasoning rather than answer text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    pub in_reasoning: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lines_keep_insertion_order_until_cleared() {
        let mut conversation = Conversation::new();
        conversation.add_line(ConversationLine::new(SYSTEM_ROLE, "be brief"));
        conversation.add_line(ConversationLine::new(USER_ROLE, "hi"));
        conversation.add_line(ConversationLine::new(ASSISTANT_ROLE, "hello"));

        let roles: Vec<_> = conversation.lines().iter().map(|l| l.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);

        conversation.clear();
        assert!(conversation.is_empty());
    }

    #[test]
    fn json_uses_lines_envelope() {
        let mut conversation = Conversation::new();
        conversation.add_line(ConversationLine::new(USER_ROLE, "ping"));
        let json = conversation.to_json().expect("json");
        assert_eq!(json, r#"{"lines":[{"role":"user","content":"ping"}]}"#);
        assert_eq!(Conversation::from_json(&json).expect("parse"), conversation);
        assert!(Conversation::from_json("{}").expect("empty").is_empty());
    }

    #[test]
    fn display_prints_one_block_per_line() {
        let mut conversation = Conversation::new();
        conversation.add_line(ConversationLine::new(USER_ROLE, "a"));
        conversation.add_line(ConversationLine::new(ASSISTANT_ROLE, "b"));
        assert_eq!(conversation.to_string(), "user: a\n\nassistant: b\n\n");
    }

    #[tokio::test]
    async fn saved_conversation_loads_back() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("chat.json");
        let mut conversation = Conversation::new();
        conversation.add_line(ConversationLine::new(USER_ROLE, "salve"));
        conversation.save_to(&path).await.expect("save");

        assert_eq!(Conversation::load_from(&path).await.expect("load"), conversation);
        let missing = Conversation::load_from(dir.path().join("none.json"))
            .await
            .expect("load missing");
        assert!(missing.is_empty());
    }
}
