pub mod ban_guard;

pub use ban_guard::{BanGuard, GuardPolicy};
