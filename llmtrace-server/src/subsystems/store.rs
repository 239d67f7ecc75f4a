//! Session/Record store: paginated reads and deletes over the four entities.
//!
//! Sessions and replay sessions list newest first; records and replay records
//! list in conversation order (turn number, then insertion time).

use llmtrace_core::models::{Record, ReplayRecord, ReplaySession, Session};
use llmtrace_core::LlmTraceError;
use serde::Serialize;
use sqlx::SqlitePool;

/// Default page size for session and replay-session listings
pub const DEFAULT_SESSION_PAGE_SIZE: i64 = 20;

/// Default page size for record and replay-record listings
pub const DEFAULT_RECORD_PAGE_SIZE: i64 = 50;

/// Maximum allowed page size
pub const MAX_PAGE_SIZE: i64 = 100;

/// Normalized pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub size: i64,
}

impl Pagination {
    /// `page` below 1 becomes 1. A missing, zero or negative `size` becomes
    /// `default_size`; anything above [`MAX_PAGE_SIZE`] is clamped.
    pub fn new(page: Option<i64>, size: Option<i64>, default_size: i64) -> Self {
        let page = page.unwrap_or(1).max(1);
        let size = match size {
            Some(s) if s > 0 => s.min(MAX_PAGE_SIZE),
            _ => default_size,
        };
        Self { page, size }
    }

    pub fn sessions(page: Option<i64>, size: Option<i64>) -> Self {
        Self::new(page, size, DEFAULT_SESSION_PAGE_SIZE)
    }

    pub fn records(page: Option<i64>, size: Option<i64>) -> Self {
        Self::new(page, size, DEFAULT_RECORD_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    fn new(data: Vec<T>, total: i64, pagination: Pagination) -> Self {
        Self {
            data,
            total,
            page: pagination.page,
            size: pagination.size,
            total_pages: (total + pagination.size - 1) / pagination.size,
        }
    }
}

pub async fn list_sessions(
    pool: &SqlitePool,
    pagination: Pagination,
) -> Result<Page<Session>, LlmTraceError> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
        .fetch_one(pool)
        .await?;

    let sessions: Vec<Session> = sqlx::query_as(
        "SELECT id, name, created_at FROM sessions
         ORDER BY created_at DESC, id ASC
         LIMIT ? OFFSET ?",
    )
    .bind(pagination.size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(sessions, total, pagination))
}

pub async fn get_session(pool: &SqlitePool, id: &str) -> Result<Option<Session>, LlmTraceError> {
    let session = sqlx::query_as("SELECT id, name, created_at FROM sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(session)
}

pub async fn list_session_records(
    pool: &SqlitePool,
    session_id: &str,
    pagination: Pagination,
) -> Result<Page<Record>, LlmTraceError> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await?;

    let records: Vec<Record> = sqlx::query_as(
        "SELECT id, session_id, turn_number, request, response, status, error_message, metadata, created_at
         FROM records
         WHERE session_id = ?
         ORDER BY turn_number ASC, created_at ASC, rowid ASC
         LIMIT ? OFFSET ?",
    )
    .bind(session_id)
    .bind(pagination.size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(records, total, pagination))
}

/// Absent rows come back as `Ok(None)`, never as an error.
pub async fn get_record(pool: &SqlitePool, id: &str) -> Result<Option<Record>, LlmTraceError> {
    let record = sqlx::query_as(
        "SELECT id, session_id, turn_number, request, response, status, error_message, metadata, created_at
         FROM records WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn delete_record(pool: &SqlitePool, id: &str) -> Result<(), LlmTraceError> {
    let result = sqlx::query("DELETE FROM records WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(LlmTraceError::not_found("Record", id));
    }

    tracing::info!(record_id = %id, "Deleted record");
    Ok(())
}

pub async fn list_replay_sessions(
    pool: &SqlitePool,
    pagination: Pagination,
) -> Result<Page<ReplaySession>, LlmTraceError> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM replay_sessions")
        .fetch_one(pool)
        .await?;

    let sessions: Vec<ReplaySession> = sqlx::query_as(
        "SELECT id, name, original_session_id, start_turn_number, status, created_at, updated_at
         FROM replay_sessions
         ORDER BY created_at DESC, id ASC
         LIMIT ? OFFSET ?",
    )
    .bind(pagination.size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(sessions, total, pagination))
}

pub async fn get_replay_session(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<ReplaySession>, LlmTraceError> {
    let session = sqlx::query_as(
        "SELECT id, name, original_session_id, start_turn_number, status, created_at, updated_at
         FROM replay_sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

pub async fn list_replay_records(
    pool: &SqlitePool,
    replay_session_id: &str,
    pagination: Pagination,
) -> Result<Page<ReplayRecord>, LlmTraceError> {
    let (total,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM replay_records WHERE replay_session_id = ?")
            .bind(replay_session_id)
            .fetch_one(pool)
            .await?;

    let records: Vec<ReplayRecord> = sqlx::query_as(
        "SELECT id, replay_session_id, turn_number, request, response, status, error_message,
                provider, model, debug_config, created_at
         FROM replay_records
         WHERE replay_session_id = ?
         ORDER BY turn_number ASC, created_at ASC, rowid ASC
         LIMIT ? OFFSET ?",
    )
    .bind(replay_session_id)
    .bind(pagination.size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(records, total, pagination))
}

// ============================================================================
// TESTS
// ============================================================================
