//! Enrollment status transitions.
//!
//! Enrollment CRUD lives elsewhere; this module owns only the status
//! change rule, which callers rely on for its error kinds.

use std::sync::Arc;

use aiep_core::EnrollmentStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::kind::read_timestamp;
use crate::store::now_secs;

const KIND: &str = "enrollment";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub module_id: i64,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of checking a requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Write,
    Unchanged,
}

/// Decide whether `current -> target` is allowed.
///
/// Re-requesting the current status is an error for `active` and
/// `dropped` but a silent no-op for `completed`.
// TODO: confirm with the product owners whether `completed -> completed`
// should raise `AlreadyInStatus` like the other two states.
pub fn check_transition(current: EnrollmentStatus, target: EnrollmentStatus) -> Result<Transition> {
    use aiep_core::EnrollmentStatus::*;
    match (current, target) {
        (Active, Active) | (Dropped, Dropped) => Err(StoreError::AlreadyInStatus(target)),
        (Completed, Completed) => Ok(Transition::Unchanged),
        (Completed, Dropped) => Err(StoreError::InvalidTransition {
            from: current,
            to: target,
        }),
        _ => Ok(Transition::Write),
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentStore {
    db: Arc<Database>,
}

impl EnrollmentStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: i64, cancel: &CancellationToken) -> Result<Enrollment> {
        if id <= 0 {
            return Err(not_found(id));
        }
        self.db
            .run(cancel, move |conn, _| fetch(conn, id)?.ok_or_else(|| not_found(id)))
            .await
    }

    /// Move an enrollment to `status`, subject to [`check_transition`].
    pub async fn update_status(
        &self,
        id: i64,
        status: EnrollmentStatus,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if id <= 0 {
            return Err(not_found(id));
        }
        let transition = self
            .db
            .run(cancel, move |conn, _| {
                let tx = conn.transaction()?;
                let current = fetch(&tx, id)?.ok_or_else(|| not_found(id))?.status;
                let transition = check_transition(current, status)?;
                if transition == Transition::Write {
                    tx.execute(
                        "UPDATE enrollments SET status = ?1, updated_at = ?2
                         WHERE id = ?3 AND deleted_at IS NULL",
                        params![status.as_str(), now_secs(), id],
                    )?;
                    tx.commit()?;
                }
                Ok(transition)
            })
            .await?;

        match transition {
            Transition::Write => info!(id, status = %status, "Enrollment status updated"),
            Transition::Unchanged => debug!(id, status = %status, "Enrollment status unchanged"),
        }
        Ok(())
    }
}

fn not_found(id: i64) -> StoreError {
    StoreError::NotFound { kind: KIND, id }
}

fn fetch(conn: &Connection, id: i64) -> Result<Option<Enrollment>> {
    conn.query_row(
        "SELECT id, user_id, module_id, status, created_at, updated_at
         FROM enrollments WHERE id = ?1 AND deleted_at IS NULL",
        [id],
        |row| Ok(row_to_enrollment(row)),
    )
    .optional()?
    .transpose()
}

fn row_to_enrollment(row: &rusqlite::Row<'_>) -> Result<Enrollment> {
    let status: String = row.get("status")?;
    Ok(Enrollment {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        module_id: row.get("module_id")?,
        status: status
            .parse()
            .map_err(|e| StoreError::Internal(format!("{}", e)))?,
        created_at: read_timestamp(row, "created_at")?,
        updated_at: read_timestamp(row, "updated_at")?,
    })
}
