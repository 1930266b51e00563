use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access level of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Stored trimmed and lower-cased; unique ignoring case
    pub email: String,
    pub role: Role,
    pub subscription_days: u32,
    /// Empty means the account may log in from anywhere
    pub allowed_ips: Vec<String>,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, role: Role, subscription_days: u32, now: DateTime<Utc>) -> Self {
        User {
            id: super::new_id(),
            email: normalize_email(email),
            role,
            subscription_days,
            allowed_ips: Vec::new(),
            is_banned: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether a login from `ip` passes the account's IP restriction
    pub fn permits_ip(&self, ip: &str) -> bool {
        self.allowed_ips.is_empty() || self.allowed_ips.iter().any(|allowed| allowed == ip)
    }
}

/// Canonical form used for storage and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_new_user_normalizes_email() {
        let user = User::new("  Someone@Example.COM ", Role::User, 30, Utc::now());
        assert_eq!(user.email, "someone@example.com");
        assert!(!user.is_banned);
        assert!(user.allowed_ips.is_empty());
    }

    #[test]
    fn test_permits_ip() {
        let mut user = User::new("a@b.com", Role::User, 30, Utc::now());
        assert!(user.permits_ip("1.2.3.4"));

        user.allowed_ips = vec!["10.0.0.1".to_string()];
        assert!(user.permits_ip("10.0.0.1"));
        assert!(!user.permits_ip("1.2.3.4"));
    }
}
