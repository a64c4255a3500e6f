//! Fixtures for unit tests: parent rows and deterministic vectors.

use aiep_core::EnrollmentStatus;
use aiep_vector::EMBEDDING_DIM;
use rusqlite::params;

use crate::db::Database;

pub(crate) fn seed_user(db: &Database, email: &str) -> i64 {
    db.with_conn(|conn| {
        conn.execute("INSERT INTO users (email) VALUES (?1)", [email])?;
        Ok(conn.last_insert_rowid())
    })
    .unwrap()
}

pub(crate) fn seed_module(db: &Database, code: &str) -> i64 {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO modules (code, title) VALUES (?1, ?1)",
            [code],
        )?;
        Ok(conn.last_insert_rowid())
    })
    .unwrap()
}

pub(crate) fn seed_session(db: &Database, user_id: i64) -> i64 {
    db.with_conn(|conn| {
        conn.execute("INSERT INTO chat_sessions (user_id) VALUES (?1)", [user_id])?;
        Ok(conn.last_insert_rowid())
    })
    .unwrap()
}

pub(crate) fn seed_enrollment(
    db: &Database,
    user_id: i64,
    module_id: i64,
    status: EnrollmentStatus,
) -> i64 {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO enrollments (user_id, module_id, status) VALUES (?1, ?2, ?3)",
            params![user_id, module_id, status.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    })
    .unwrap()
}

/// A full-length vector with 1.0 on `axis`.
pub(crate) fn unit_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[axis] = 1.0;
    v
}

/// A unit vector in the plane of axes `a` and `b` whose cosine similarity
/// to `unit_vector(a)` is `cos`.
pub(crate) fn blend(a: usize, b: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[a] = cos;
    v[b] = (1.0 - cos * cos).sqrt();
    v
}
