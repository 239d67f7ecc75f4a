use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TraceStatus;

/// Outcome of one debug replay. `provider`, `model` and `debug_config` record
/// exactly what the outbound call used.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReplayRecord {
    pub id: String,
    pub replay_session_id: String,
    pub turn_number: i64,
    pub request: String,
    pub response: Option<String>,
    pub status: TraceStatus,
    pub error_message: Option<String>,
    pub provider: String,
    pub model: String,
    pub debug_config: String,
    pub created_at: DateTime<Utc>,
}
