//! Curriculum topics, owned by a module.

use aiep_core::EntityKind;
use aiep_vector::Embedding;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::kind::{
    opt_text, read_embedding, read_timestamp, require_text, text, Binding, EmbeddingKind,
    ParentRef,
};

pub const MAX_UNIT_TITLE_CHARS: usize = 200;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub module_id: i64,
    pub unit_title: String,
    pub content: Option<String>,
    pub scheduled_date: NaiveDate,
    pub embedding: Option<Embedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTopic {
    pub module_id: i64,
    pub unit_title: String,
    pub content: Option<String>,
    pub scheduled_date: NaiveDate,
    pub embedding: Vec<f32>,
}

impl NewTopic {
    pub fn new(module_id: i64, unit_title: impl Into<String>, scheduled_date: NaiveDate) -> Self {
        Self {
            module_id,
            unit_title: unit_title.into(),
            content: None,
            scheduled_date,
            embedding: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopicPatch {
    pub unit_title: Option<String>,
    pub content: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct TopicScope {
    pub module_id: Option<i64>,
}

pub struct TopicKind;

impl EmbeddingKind for TopicKind {
    type Entity = Topic;
    type New = NewTopic;
    type Patch = TopicPatch;
    type Scope = TopicScope;

    const KIND: EntityKind = EntityKind::Topic;
    const TABLE: &'static str = "topics";
    const COLUMNS: &'static str =
        "id, module_id, unit_title, content, scheduled_date, embedding, created_at, updated_at";
    const PARENT: ParentRef = ParentRef {
        table: "modules",
        column: "module_id",
        name: "module",
    };

    fn parent_id(new: &NewTopic) -> i64 {
        new.module_id
    }

    fn raw_embedding(new: &NewTopic) -> &[f32] {
        &new.embedding
    }

    fn validate_new(new: &NewTopic) -> Result<()> {
        require_text("unit_title", &new.unit_title, Some(MAX_UNIT_TITLE_CHARS))
    }

    fn insert_bindings(new: &NewTopic) -> Vec<Binding> {
        vec![
            ("module_id", Value::Integer(new.module_id)),
            ("unit_title", text(&new.unit_title)),
            ("content", opt_text(new.content.as_deref())),
            ("scheduled_date", date_value(new.scheduled_date)),
        ]
    }

    fn validate_patch(patch: &TopicPatch) -> Result<()> {
        if let Some(title) = &patch.unit_title {
            require_text("unit_title", title, Some(MAX_UNIT_TITLE_CHARS))?;
        }
        Ok(())
    }

    fn patch_bindings(patch: &TopicPatch) -> Vec<Binding> {
        let mut bindings = Vec::new();
        if let Some(title) = &patch.unit_title {
            bindings.push(("unit_title", text(title)));
        }
        if let Some(content) = &patch.content {
            bindings.push(("content", text(content)));
        }
        if let Some(date) = patch.scheduled_date {
            bindings.push(("scheduled_date", date_value(date)));
        }
        bindings
    }

    fn scope_bindings(scope: &TopicScope) -> Vec<Binding> {
        scope
            .module_id
            .map(|id| vec![("module_id", Value::Integer(id))])
            .unwrap_or_default()
    }

    fn row_to_entity(row: &Row<'_>) -> Result<Topic> {
        let date: String = row.get("scheduled_date")?;
        let scheduled_date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| StoreError::Internal(format!("Invalid scheduled_date {:?}: {}", date, e)))?;

        Ok(Topic {
            id: row.get("id")?,
            module_id: row.get("module_id")?,
            unit_title: row.get("unit_title")?,
            content: row.get("content")?,
            scheduled_date,
            embedding: read_embedding(row)?,
            created_at: read_timestamp(row, "created_at")?,
            updated_at: read_timestamp(row, "updated_at")?,
        })
    }

    fn entity_id(entity: &Topic) -> i64 {
        entity.id
    }
}

fn date_value(date: NaiveDate) -> Value {
    Value::Text(date.format(DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validate_new_title_length() {
        let ok = NewTopic::new(1, "Unit 3: Recursion", date(2026, 3, 2));
        assert!(TopicKind::validate_new(&ok).is_ok());

        let long = NewTopic::new(1, "t".repeat(MAX_UNIT_TITLE_CHARS + 1), date(2026, 3, 2));
        assert!(TopicKind::validate_new(&long).is_err());
    }

    #[test]
    fn test_date_binding_format() {
        assert_eq!(
            date_value(date(2026, 1, 9)),
            Value::Text("2026-01-09".to_string())
        );
    }

    #[test]
    fn test_patch_content_may_be_cleared() {
        let patch = TopicPatch {
            content: Some(String::new()),
            ..Default::default()
        };
        assert!(TopicKind::validate_patch(&patch).is_ok());
        assert_eq!(
            TopicKind::patch_bindings(&patch),
            vec![("content", Value::Text(String::new()))]
        );
    }
}
