use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the append-only login audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: String,
    pub ip_address: String,
    /// The email as typed, kept even when no account matched
    pub user_email: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn new(
        ip_address: &str,
        user_email: Option<&str>,
        success: bool,
        now: DateTime<Utc>,
    ) -> Self {
        LoginAttempt {
            id: super::new_id(),
            ip_address: ip_address.to_string(),
            user_email: user_email.map(String::from),
            success,
            created_at: now,
        }
    }
}
