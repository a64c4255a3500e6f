//! Learner insights, owned by a user.

use aiep_core::EntityKind;
use aiep_vector::Embedding;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kind::{
    read_embedding, read_timestamp, require_text, text, Binding, EmbeddingKind, ParentRef,
};

pub const MAX_INSIGHT_TYPE_CHARS: usize = 100;
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Insight categories the tutoring agent records. The column is free-form;
/// these are the values the agent emits.
pub mod insight_types {
    pub const LEARNING_STYLE: &str = "learning_style";
    pub const COGNITIVE_BIAS: &str = "cognitive_bias";
    pub const ACADEMIC_INTEREST: &str = "academic_interest";
    pub const SOFT_SKILL: &str = "soft_skill";
    pub const LEARNING_DIFFICULTY: &str = "learning_difficulty";
    pub const MOTIVATION: &str = "motivation";
    pub const SCHEDULE_PREFERENCE: &str = "schedule_preference";
    pub const STUDY_METHOD: &str = "study_method";
    pub const ACADEMIC_STRENGTH: &str = "academic_strength";
    pub const IMPROVEMENT_AREA: &str = "improvement_area";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: i64,
    pub user_id: i64,
    pub insight_type: String,
    pub content: String,
    pub embedding: Option<Embedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInsight {
    pub user_id: i64,
    pub insight_type: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

impl NewInsight {
    pub fn new(user_id: i64, insight_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id,
            insight_type: insight_type.into(),
            content: content.into(),
            embedding: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsightPatch {
    pub insight_type: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InsightScope {
    pub user_id: Option<i64>,
    pub insight_type: Option<String>,
}

pub struct InsightKind;

impl EmbeddingKind for InsightKind {
    type Entity = Insight;
    type New = NewInsight;
    type Patch = InsightPatch;
    type Scope = InsightScope;

    const KIND: EntityKind = EntityKind::Insight;
    const TABLE: &'static str = "insights";
    const COLUMNS: &'static str =
        "id, user_id, insight_type, content, embedding, created_at, updated_at";
    const PARENT: ParentRef = ParentRef {
        table: "users",
        column: "user_id",
        name: "user",
    };

    fn parent_id(new: &NewInsight) -> i64 {
        new.user_id
    }

    fn raw_embedding(new: &NewInsight) -> &[f32] {
        &new.embedding
    }

    fn validate_new(new: &NewInsight) -> Result<()> {
        require_text("insight_type", &new.insight_type, Some(MAX_INSIGHT_TYPE_CHARS))?;
        require_text("content", &new.content, Some(MAX_CONTENT_CHARS))
    }

    fn insert_bindings(new: &NewInsight) -> Vec<Binding> {
        vec![
            ("user_id", Value::Integer(new.user_id)),
            ("insight_type", text(&new.insight_type)),
            ("content", text(&new.content)),
        ]
    }

    fn validate_patch(patch: &InsightPatch) -> Result<()> {
        if let Some(insight_type) = &patch.insight_type {
            require_text("insight_type", insight_type, Some(MAX_INSIGHT_TYPE_CHARS))?;
        }
        if let Some(content) = &patch.content {
            require_text("content", content, Some(MAX_CONTENT_CHARS))?;
        }
        Ok(())
    }

    fn patch_bindings(patch: &InsightPatch) -> Vec<Binding> {
        let mut bindings = Vec::new();
        if let Some(insight_type) = &patch.insight_type {
            bindings.push(("insight_type", text(insight_type)));
        }
        if let Some(content) = &patch.content {
            bindings.push(("content", text(content)));
        }
        bindings
    }

    fn scope_bindings(scope: &InsightScope) -> Vec<Binding> {
        let mut bindings = Vec::new();
        if let Some(id) = scope.user_id {
            bindings.push(("user_id", Value::Integer(id)));
        }
        if let Some(insight_type) = &scope.insight_type {
            bindings.push(("insight_type", text(insight_type)));
        }
        bindings
    }

    fn row_to_entity(row: &Row<'_>) -> Result<Insight> {
        Ok(Insight {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            insight_type: row.get("insight_type")?,
            content: row.get("content")?,
            embedding: read_embedding(row)?,
            created_at: read_timestamp(row, "created_at")?,
            updated_at: read_timestamp(row, "updated_at")?,
        })
    }

    fn entity_id(entity: &Insight) -> i64 {
        entity.id
    }
}
