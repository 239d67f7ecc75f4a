//! Trace recorder: persists one captured turn and creates its session on first sight.

use chrono::{DateTime, Utc};
use llmtrace_core::models::{Record, Session, TraceStatus};
use llmtrace_core::LlmTraceError;
use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// One turn as handed to the recorder.
#[derive(Debug, Clone)]
pub struct TraceInput {
    pub session_id: String,
    pub turn_number: i64,
    pub request: Value,
    pub response: Option<Value>,
    pub status: TraceStatus,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    /// Used only when the session does not exist yet.
    pub session_name: Option<String>,
}

impl TraceInput {
    pub fn new(
        session_id: impl Into<String>,
        turn_number: i64,
        request: Value,
        status: TraceStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            request,
            response: None,
            status,
            error_message: None,
            metadata: None,
            session_name: None,
        }
    }
}

/// Canonical JSON text: compact, object keys sorted.
pub(crate) fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Persist a trace atomically.
///
/// # Constraints
/// * Session ensure and record insert commit together or not at all
/// * Concurrent first writes for one session id create a single session row
/// * A null `response` or `metadata` is stored as NULL
///
/// The transaction rolls back when dropped uncommitted, which covers early
/// returns through `?` as well as panics unwinding out of this function.
pub async fn save_trace(pool: &SqlitePool, input: TraceInput) -> Result<Record, LlmTraceError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    ensure_session(&mut tx, &input.session_id, input.session_name.as_deref(), now).await?;

    let request = canonical_json(&input.request)?;
    let response = non_null(input.response.as_ref()).map(canonical_json).transpose()?;
    let metadata = non_null(input.metadata.as_ref()).map(canonical_json).transpose()?;

    let record = Record {
        id: Uuid::new_v4().to_string(),
        session_id: input.session_id,
        turn_number: input.turn_number,
        request,
        response,
        status: input.status,
        error_message: input.error_message.filter(|m| !m.is_empty()),
        metadata,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO records (id, session_id, turn_number, request, response, status, error_message, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.session_id)
    .bind(record.turn_number)
    .bind(&record.request)
    .bind(&record.response)
    .bind(record.status)
    .bind(&record.error_message)
    .bind(&record.metadata)
    .bind(record.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::debug!(
        record_id = %record.id,
        session_id = %record.session_id,
        turn_number = record.turn_number,
        status = %record.status,
        "Trace saved"
    );

    Ok(record)
}

/// Get-or-create for a session row. `ON CONFLICT DO NOTHING` keeps racing
/// first writers from inserting the same id twice.
async fn ensure_session(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), LlmTraceError> {
    let name = match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => Session::default_name(now),
    };

    let result = sqlx::query(
        "INSERT INTO sessions (id, name, created_at) VALUES (?, ?, ?)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(session_id)
    .bind(&name)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() > 0 {
        tracing::info!(session_id = %session_id, name = %name, "Created session");
    }

    Ok(())
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

// ============================================================================
// TESTS
// ============================================================================
