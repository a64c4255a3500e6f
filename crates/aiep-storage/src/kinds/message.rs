//! Chat messages, owned by a conversation (`chat_sessions`).

use aiep_core::{EntityKind, MessageRole};
use aiep_vector::Embedding;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::kind::{
    opt_text, read_embedding, read_timestamp, require_text, text, Binding, EmbeddingKind,
    ParentRef,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<serde_json::Value>,
    pub embedding: Option<Embedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<serde_json::Value>,
    /// Empty when the message has not been vectorised yet.
    pub embedding: Vec<f32>,
}

impl NewChatMessage {
    pub fn new(conversation_id: i64, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            embedding: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatMessagePatch {
    pub role: Option<MessageRole>,
    pub content: Option<String>,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageScope {
    pub conversation_id: Option<i64>,
    pub role: Option<MessageRole>,
}

pub struct MessageKind;

impl EmbeddingKind for MessageKind {
    type Entity = ChatMessage;
    type New = NewChatMessage;
    type Patch = ChatMessagePatch;
    type Scope = MessageScope;

    const KIND: EntityKind = EntityKind::Message;
    const TABLE: &'static str = "chat_messages";
    const COLUMNS: &'static str = "id, conversation_id, role, content, name, tool_call_id, \
                                   tool_calls, embedding, created_at, updated_at";
    const PARENT: ParentRef = ParentRef {
        table: "chat_sessions",
        column: "conversation_id",
        name: "conversation",
    };

    fn parent_id(new: &NewChatMessage) -> i64 {
        new.conversation_id
    }

    fn raw_embedding(new: &NewChatMessage) -> &[f32] {
        &new.embedding
    }

    fn validate_new(new: &NewChatMessage) -> Result<()> {
        require_text("content", &new.content, None)
    }

    fn insert_bindings(new: &NewChatMessage) -> Vec<Binding> {
        vec![
            ("conversation_id", Value::Integer(new.conversation_id)),
            ("role", text(new.role.as_str())),
            ("content", text(&new.content)),
            ("name", opt_text(new.name.as_deref())),
            ("tool_call_id", opt_text(new.tool_call_id.as_deref())),
            ("tool_calls", json_value(new.tool_calls.as_ref())),
        ]
    }

    fn validate_patch(patch: &ChatMessagePatch) -> Result<()> {
        if let Some(content) = &patch.content {
            require_text("content", content, None)?;
        }
        Ok(())
    }

    fn patch_bindings(patch: &ChatMessagePatch) -> Vec<Binding> {
        let mut bindings = Vec::new();
        if let Some(role) = patch.role {
            bindings.push(("role", text(role.as_str())));
        }
        if let Some(content) = &patch.content {
            bindings.push(("content", text(content)));
        }
        if let Some(name) = &patch.name {
            bindings.push(("name", text(name)));
        }
        if let Some(tool_call_id) = &patch.tool_call_id {
            bindings.push(("tool_call_id", text(tool_call_id)));
        }
        if let Some(tool_calls) = &patch.tool_calls {
            bindings.push(("tool_calls", json_value(Some(tool_calls))));
        }
        bindings
    }

    fn scope_bindings(scope: &MessageScope) -> Vec<Binding> {
        let mut bindings = Vec::new();
        if let Some(id) = scope.conversation_id {
            bindings.push(("conversation_id", Value::Integer(id)));
        }
        if let Some(role) = scope.role {
            bindings.push(("role", text(role.as_str())));
        }
        bindings
    }

    fn row_to_entity(row: &Row<'_>) -> Result<ChatMessage> {
        let role: String = row.get("role")?;
        let tool_calls: Option<String> = row.get("tool_calls")?;
        let tool_calls = tool_calls
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Internal(format!("Invalid tool_calls JSON: {}", e)))?;

        Ok(ChatMessage {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            role: role
                .parse()
                .map_err(|e| StoreError::Internal(format!("{}", e)))?,
            content: row.get("content")?,
            name: row.get("name")?,
            tool_call_id: row.get("tool_call_id")?,
            tool_calls,
            embedding: read_embedding(row)?,
            created_at: read_timestamp(row, "created_at")?,
            updated_at: read_timestamp(row, "updated_at")?,
        })
    }

    fn entity_id(entity: &ChatMessage) -> i64 {
        entity.id
    }
}

fn json_value(value: Option<&serde_json::Value>) -> Value {
    match value {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}
