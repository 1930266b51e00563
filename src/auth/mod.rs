//! Login, credential verification and authentication sessions

pub mod authenticator;
pub mod password;
pub mod session;

pub use authenticator::{Authenticator, LoginSuccess};
pub use password::{PasswordHasher, Pbkdf2Hasher};
pub use session::{SessionClaims, SessionError, SessionStore, SignedSessionStore};

use crate::persistence::PersistenceError;
use thiserror::Error;

/// Why a login was refused, or what broke while checking it
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("IP address is banned")]
    IpBanned,

    #[error("Too many failed attempts. IP banned for {hours} hours.")]
    RateLimited { hours: i64 },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is banned")]
    AccountBanned,

    #[error("IP address not allowed")]
    IpNotAllowed,

    #[error("Admin privileges required")]
    Forbidden,

    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}
