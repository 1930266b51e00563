//! Domain records shared by the store, the guard and the processors.

pub mod banned_ip;
pub mod login_attempt;
pub mod session;
pub mod user;

pub use banned_ip::BannedIp;
pub use login_attempt::LoginAttempt;
pub use session::{AuthSession, ProcessingResult, ProcessingSession};
pub use user::{Role, User};

/// Generate a fresh record identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
