use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReplaySessionStatus {
    Active,
    Completed,
}

impl fmt::Display for ReplaySessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaySessionStatus::Active => f.write_str("active"),
            ReplaySessionStatus::Completed => f.write_str("completed"),
        }
    }
}

impl FromStr for ReplaySessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReplaySessionStatus::Active),
            "completed" => Ok(ReplaySessionStatus::Completed),
            other => Err(format!(
                "invalid replay session status '{}', expected active or completed",
                other
            )),
        }
    }
}

/// A debug fork anchored at `start_turn_number` of an original session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReplaySession {
    pub id: String,
    pub name: String,
    pub original_session_id: String,
    pub start_turn_number: i64,
    pub status: ReplaySessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplaySession {
    pub fn default_name(original_name: &str, start_turn_number: i64) -> String {
        format!("debug-{}-turn{}", original_name, start_turn_number)
    }
}
