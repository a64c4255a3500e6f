//! Entity-kind descriptors.
//!
//! [`EmbeddingKind`] tells the generic store everything that differs
//! between chat messages, insights and topics: the table, the parent
//! context, how to validate and bind the kind's scalar fields, and which
//! columns its scope filters match on.

use std::fmt;

use aiep_core::EntityKind;
use aiep_vector::Embedding;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::{Result, StoreError};

/// A column name paired with the value to bind for it.
pub type Binding = (&'static str, Value);

/// The parent context an entity hangs off.
#[derive(Debug, Clone, Copy)]
pub struct ParentRef {
    /// Table holding the parent rows.
    pub table: &'static str,
    /// Foreign key column on the entity's table.
    pub column: &'static str,
    /// Name used in error messages.
    pub name: &'static str,
}

pub trait EmbeddingKind: Send + Sync + 'static {
    /// The stored record as read back.
    type Entity: Clone + fmt::Debug + Send + 'static;
    /// Input to `create`.
    type New: Send + 'static;
    /// Partial update; every `None` field is left untouched.
    type Patch: Default + Send + 'static;
    /// Exact-match search filters, combined with AND.
    type Scope: Default + Send + 'static;

    const KIND: EntityKind;
    const TABLE: &'static str;
    /// Select list read by [`EmbeddingKind::row_to_entity`].
    const COLUMNS: &'static str;
    const PARENT: ParentRef;

    fn parent_id(new: &Self::New) -> i64;

    /// The embedding supplied at creation; empty means none.
    fn raw_embedding(new: &Self::New) -> &[f32];

    /// Check required scalar fields. The parent id and embedding are
    /// checked by the store.
    fn validate_new(new: &Self::New) -> Result<()>;

    /// Scalar columns to insert, parent column included.
    fn insert_bindings(new: &Self::New) -> Vec<Binding>;

    fn validate_patch(patch: &Self::Patch) -> Result<()>;

    fn patch_bindings(patch: &Self::Patch) -> Vec<Binding>;

    fn scope_bindings(scope: &Self::Scope) -> Vec<Binding>;

    fn row_to_entity(row: &Row<'_>) -> Result<Self::Entity>;

    fn entity_id(entity: &Self::Entity) -> i64;
}

/// Reject an empty (or over-long) required text field.
pub(crate) fn require_text(field: &str, value: &str, max_chars: Option<usize>) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(format!("{} is required", field)));
    }
    if let Some(max) = max_chars {
        let len = value.chars().count();
        if len > max {
            return Err(StoreError::validation(format!(
                "{} must be at most {} characters, got {}",
                field, max, len
            )));
        }
    }
    Ok(())
}

pub(crate) fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    value.map(text).unwrap_or(Value::Null)
}

pub(crate) fn read_embedding(row: &Row<'_>) -> Result<Option<Embedding>> {
    let blob: Option<Vec<u8>> = row.get("embedding")?;
    match blob {
        Some(bytes) => Ok(Embedding::from_blob(&bytes)?),
        None => Ok(None),
    }
}

pub(crate) fn read_timestamp(row: &Row<'_>, column: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = row.get(column)?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::Internal(format!("Invalid {} timestamp: {}", column, secs)))
}
