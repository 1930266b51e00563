use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user counters of a batch processing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSession {
    pub id: String,
    pub user_id: String,
    pub approved_count: u64,
    pub rejected_count: u64,
    pub loaded_count: u64,
    pub tested_count: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingSession {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        ProcessingSession {
            id: super::new_id(),
            user_id: user_id.to_string(),
            approved_count: 0,
            rejected_count: 0,
            loaded_count: 0,
            tested_count: 0,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Count one processed item
    pub fn record(&mut self, approved: bool) {
        if approved {
            self.approved_count += 1;
        } else {
            self.rejected_count += 1;
        }
        self.tested_count += 1;
    }

    pub fn reset_counters(&mut self) {
        self.approved_count = 0;
        self.rejected_count = 0;
        self.loaded_count = 0;
        self.tested_count = 0;
    }
}

/// Outcome of one processed line, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub input: String,
    pub approved: bool,
    pub message: String,
}

/// Server-side record of an issued authentication token
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub token_id: String,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
