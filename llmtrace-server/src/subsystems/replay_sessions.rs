//! Replay session manager: create, update and cascade-delete debug forks.

use chrono::Utc;
use llmtrace_core::models::{ReplaySession, ReplaySessionStatus};
use llmtrace_core::LlmTraceError;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::store;

#[derive(Debug, Clone)]
pub struct CreateReplaySession {
    pub original_session_id: String,
    pub start_turn_number: i64,
    /// A blank name counts as absent and gets a generated one.
    pub name: Option<String>,
}

/// Create a replay session anchored on an existing session.
///
/// # Returns
/// * `Ok(ReplaySession)` - the new session, status `active`
/// * `Err(NotFound)` - the original session does not exist; nothing persisted
pub async fn create_replay_session(
    pool: &SqlitePool,
    input: CreateReplaySession,
) -> Result<ReplaySession, LlmTraceError> {
    let mut tx = pool.begin().await?;

    let original_name: Option<(String,)> = sqlx::query_as("SELECT name FROM sessions WHERE id = ?")
        .bind(&input.original_session_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some((original_name,)) = original_name else {
        return Err(LlmTraceError::not_found("Session", input.original_session_id));
    };

    let name = match input.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => ReplaySession::default_name(&original_name, input.start_turn_number),
    };

    let now = Utc::now();
    let session = ReplaySession {
        id: Uuid::new_v4().to_string(),
        name,
        original_session_id: input.original_session_id,
        start_turn_number: input.start_turn_number,
        status: ReplaySessionStatus::Active,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO replay_sessions (id, name, original_session_id, start_turn_number, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.name)
    .bind(&session.original_session_id)
    .bind(session.start_turn_number)
    .bind(session.status)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        replay_session_id = %session.id,
        original_session_id = %session.original_session_id,
        start_turn_number = session.start_turn_number,
        "Created replay session"
    );

    Ok(session)
}

/// Move a replay session between `active` and `completed`.
pub async fn update_replay_session_status(
    pool: &SqlitePool,
    id: &str,
    status: ReplaySessionStatus,
) -> Result<ReplaySession, LlmTraceError> {
    let result = sqlx::query("UPDATE replay_sessions SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(LlmTraceError::not_found("Replay session", id));
    }

    let session = store::get_replay_session(pool, id)
        .await?
        .ok_or_else(|| LlmTraceError::not_found("Replay session", id))?;

    tracing::info!(replay_session_id = %id, status = %status, "Updated replay session status");
    Ok(session)
}

/// Delete a replay session together with all of its replay records.
///
/// # Constraints
/// * Records and session disappear together or not at all
/// * An unknown id is `NotFound` and deletes nothing
pub async fn delete_replay_session(pool: &SqlitePool, id: &str) -> Result<(), LlmTraceError> {
    let mut tx = pool.begin().await?;

    let records = sqlx::query("DELETE FROM replay_records WHERE replay_session_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let session = sqlx::query("DELETE FROM replay_sessions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if session.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(LlmTraceError::not_found("Replay session", id));
    }

    tx.commit().await?;

    tracing::info!(
        replay_session_id = %id,
        records_deleted = records.rows_affected(),
        "Deleted replay session"
    );
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
