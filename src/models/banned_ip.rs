use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BannedIp {
    pub id: String,
    pub ip_address: String,
    pub reason: String,
    /// `None` is a permanent ban
    pub banned_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BannedIp {
    /// Build a ban starting at `now`; `banned_until == None` never expires
    pub fn new(
        ip_address: &str,
        reason: &str,
        banned_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        BannedIp {
            id: super::new_id(),
            ip_address: ip_address.to_string(),
            reason: reason.to_string(),
            banned_until,
            created_at: now,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.banned_until {
            None => true,
            Some(until) => until > now,
        }
    }
}
