//! Persistence module for users, login audit, bans and sessions
//!
//! Every entity gets its own get/put/delete operations instead of
//! whole-collection rewrites, so a backend can keep each mutation atomic.

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

use crate::models::{AuthSession, BannedIp, LoginAttempt, ProcessingSession, User};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("Email already exists: {0}")]
    DuplicateEmail(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Trait for storage backends
///
/// All methods take `&self`; implementations handle their own locking so
/// the store can be shared as `Arc<dyn Store>`.
pub trait Store: Send + Sync {
    // =====================
    // Users
    // =====================

    /// Insert a user, optionally with its password hash, as one write
    ///
    /// Fails with `DuplicateEmail` when the email is already taken,
    /// ignoring case.
    fn insert_user(&self, user: &User, password_hash: Option<&str>) -> Result<(), PersistenceError>;

    fn get_user(&self, id: &str) -> Result<Option<User>, PersistenceError>;

    /// Case-insensitive exact match on the email
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, PersistenceError>;

    /// All users, newest first
    fn list_users(&self) -> Result<Vec<User>, PersistenceError>;

    /// Replace the stored record; returns false when no such user exists
    fn update_user(&self, user: &User) -> Result<bool, PersistenceError>;

    /// Returns false when no such user exists
    fn delete_user(&self, id: &str) -> Result<bool, PersistenceError>;

    fn count_users(&self) -> Result<usize, PersistenceError>;

    fn set_password_hash(&self, user_id: &str, hash: &str) -> Result<bool, PersistenceError>;

    fn get_password_hash(&self, user_id: &str) -> Result<Option<String>, PersistenceError>;

    // =====================
    // Login Attempt Log
    // =====================

    fn add_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), PersistenceError>;

    /// Failed attempts from `ip` with `created_at` strictly after `since`
    fn count_failed_attempts_since(
        &self,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, PersistenceError>;

    /// The most recent `limit` attempts, newest first
    fn recent_login_attempts(&self, limit: usize) -> Result<Vec<LoginAttempt>, PersistenceError>;

    // =====================
    // Banned IPs
    // =====================

    fn add_ban(&self, ban: &BannedIp) -> Result<(), PersistenceError>;

    /// First inserted ban for `ip`, expired or not
    fn find_ban(&self, ip: &str) -> Result<Option<BannedIp>, PersistenceError>;

    /// Returns false when no ban has that id
    fn remove_ban(&self, id: &str) -> Result<bool, PersistenceError>;

    fn list_bans(&self) -> Result<Vec<BannedIp>, PersistenceError>;

    // =====================
    // Processing Sessions
    // =====================

    fn insert_session(&self, session: &ProcessingSession) -> Result<(), PersistenceError>;

    /// First session created for the user
    fn find_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<ProcessingSession>, PersistenceError>;

    fn get_session(&self, id: &str) -> Result<Option<ProcessingSession>, PersistenceError>;

    fn update_session(&self, session: &ProcessingSession) -> Result<bool, PersistenceError>;

    // =====================
    // Authentication Sessions
    // =====================

    fn insert_auth_session(&self, session: &AuthSession) -> Result<(), PersistenceError>;

    fn get_auth_session(&self, token_id: &str) -> Result<Option<AuthSession>, PersistenceError>;

    fn delete_auth_session(&self, token_id: &str) -> Result<bool, PersistenceError>;

    // =====================
    // Bootstrap
    // =====================

    /// Whether this database has already been through bootstrap seeding
    fn bootstrap_seeded(&self) -> Result<bool, PersistenceError>;

    /// Insert the bootstrap account, at most once per database
    ///
    /// Writes the user and the seeded marker together. Returns false and
    /// writes only the marker when seeding already happened or users exist.
    fn seed_bootstrap_user(
        &self,
        user: &User,
        password_hash: Option<&str>,
    ) -> Result<bool, PersistenceError>;

    // =====================
    // Maintenance
    // =====================

    /// Clear all data (useful for testing)
    fn clear_all(&self) -> Result<(), PersistenceError>;
}
