use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Name given to a session created implicitly by its first trace.
    pub fn default_name(now: DateTime<Utc>) -> String {
        format!("session-{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}
