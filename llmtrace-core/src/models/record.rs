use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one captured or replayed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Error,
    Pending,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Success => "success",
            TraceStatus::Error => "error",
            TraceStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TraceStatus::Success),
            "error" => Ok(TraceStatus::Error),
            "pending" => Ok(TraceStatus::Pending),
            other => Err(format!(
                "invalid status '{}', expected one of success, error, pending",
                other
            )),
        }
    }
}

/// One persisted turn of a live session. `request`, `response` and `metadata`
/// hold canonical JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Record {
    pub id: String,
    pub session_id: String,
    pub turn_number: i64,
    pub request: String,
    pub response: Option<String>,
    pub status: TraceStatus,
    pub error_message: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}
