pub mod accounts;
pub mod app;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod guard;
pub mod input;
pub mod models;
pub mod output;
pub mod persistence;
pub mod processing;

// Re-export commonly used types
pub use accounts::{AccountError, NewUser, UserDirectory, UserUpdate};
pub use app::TerraMail;
pub use auth::{AuthError, Authenticator, LoginSuccess};
pub use classifier::{Classifier, ItemClassifier, Verdict, VerdictSource};
pub use guard::{BanGuard, GuardPolicy};
pub use models::{BannedIp, LoginAttempt, ProcessingResult, ProcessingSession, Role, User};
pub use persistence::{PersistenceError, SqliteStore, Store};
pub use processing::{BatchError, BatchProcessor, BatchReport, SessionManager, StopSignal};
