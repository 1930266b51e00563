//! User administration
//!
//! Creation, partial updates, bans, subscription extension and the
//! one-time seeding of the bootstrap admin into an empty database.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::auth::PasswordHasher;
use crate::config::BootstrapConfig;
use crate::models::user::normalize_email;
use crate::models::{Role, User};
use crate::persistence::{PersistenceError, Store};

const DEFAULT_SUBSCRIPTION_DAYS: u32 = 30;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Email already exists: {0}")]
    EmailTaken(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(PersistenceError),
}

impl From<PersistenceError> for AccountError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::DuplicateEmail(email) => AccountError::EmailTaken(email),
            other => AccountError::Storage(other),
        }
    }
}

/// Fields for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    /// Accounts without a password cannot log in until one is set
    pub password: Option<String>,
    pub role: Role,
    pub subscription_days: u32,
    pub allowed_ips: Vec<String>,
}

impl NewUser {
    pub fn new(email: &str, password: &str) -> Self {
        NewUser {
            email: email.to_string(),
            password: Some(password.to_string()),
            role: Role::User,
            subscription_days: DEFAULT_SUBSCRIPTION_DAYS,
            allowed_ips: Vec::new(),
        }
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub role: Option<Role>,
    pub subscription_days: Option<u32>,
    pub allowed_ips: Option<Vec<String>>,
    pub is_banned: Option<bool>,
}

fn validate_email(email: &str) -> Result<String, AccountError> {
    let normalized = normalize_email(email);
    let mut parts = normalized.split('@');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty() && !normalized.contains(char::is_whitespace)
        }
        _ => false,
    };
    if valid {
        Ok(normalized)
    } else {
        Err(AccountError::InvalidEmail(email.to_string()))
    }
}

fn normalize_ips(ips: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ips.len());
    for ip in ips {
        let ip = ip.trim().to_string();
        if !ip.is_empty() && !out.contains(&ip) {
            out.push(ip);
        }
    }
    out
}

pub struct UserDirectory {
    store: Arc<dyn Store>,
    hasher: Arc<dyn PasswordHasher>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>, hasher: Arc<dyn PasswordHasher>) -> Self {
        UserDirectory { store, hasher }
    }

    pub fn create_user(&self, new_user: NewUser) -> Result<User, AccountError> {
        let email = validate_email(&new_user.email)?;
        let mut user = User::new(&email, new_user.role, new_user.subscription_days, Utc::now());
        user.allowed_ips = normalize_ips(new_user.allowed_ips);

        let hash = new_user.password.as_deref().map(|pw| self.hasher.hash(pw));
        self.store.insert_user(&user, hash.as_deref())?;
        log::info!("Created {} account {}", user.role, user.email);
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, AccountError> {
        Ok(self.store.list_users()?)
    }

    pub fn get_user(&self, id: &str) -> Result<User, AccountError> {
        self.store
            .get_user(id)?
            .ok_or_else(|| AccountError::NotFound(id.to_string()))
    }

    pub fn update_user(&self, id: &str, update: UserUpdate) -> Result<User, AccountError> {
        let mut user = self.get_user(id)?;
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(days) = update.subscription_days {
            user.subscription_days = days;
        }
        if let Some(ips) = update.allowed_ips {
            user.allowed_ips = normalize_ips(ips);
        }
        if let Some(banned) = update.is_banned {
            user.is_banned = banned;
        }
        user.updated_at = Utc::now();

        if !self.store.update_user(&user)? {
            return Err(AccountError::NotFound(id.to_string()));
        }
        Ok(user)
    }

    pub fn delete_user(&self, id: &str) -> Result<(), AccountError> {
        if self.store.delete_user(id)? {
            log::info!("Deleted user {}", id);
            Ok(())
        } else {
            Err(AccountError::NotFound(id.to_string()))
        }
    }

    pub fn ban_user(&self, id: &str) -> Result<User, AccountError> {
        self.update_user(
            id,
            UserUpdate {
                is_banned: Some(true),
                ..Default::default()
            },
        )
    }

    pub fn unban_user(&self, id: &str) -> Result<User, AccountError> {
        self.update_user(
            id,
            UserUpdate {
                is_banned: Some(false),
                ..Default::default()
            },
        )
    }

    /// Add (or with a negative value, remove) subscription days, never below zero
    pub fn extend_subscription(&self, id: &str, days: i64) -> Result<User, AccountError> {
        let user = self.get_user(id)?;
        let total = (i64::from(user.subscription_days) + days).clamp(0, i64::from(u32::MAX));
        self.update_user(
            id,
            UserUpdate {
                subscription_days: Some(total as u32),
                ..Default::default()
            },
        )
    }

    pub fn set_password(&self, id: &str, password: &str) -> Result<(), AccountError> {
        let hash = self.hasher.hash(password);
        if self.store.set_password_hash(id, &hash)? {
            Ok(())
        } else {
            Err(AccountError::NotFound(id.to_string()))
        }
    }

    /// Create the bootstrap admin the first time a database is opened
    ///
    /// Returns the created account, or `None` when this database was
    /// already seeded or already had users. Deleting every user later does
    /// not bring the bootstrap account back.
    pub fn seed_bootstrap_admin(
        &self,
        bootstrap: &BootstrapConfig,
    ) -> Result<Option<User>, AccountError> {
        if self.store.bootstrap_seeded()? {
            return Ok(None);
        }

        let email = validate_email(&bootstrap.admin_email)?;
        let admin = User::new(&email, Role::Admin, bootstrap.subscription_days, Utc::now());
        let hash = self.hasher.hash(&bootstrap.admin_password);
        if !self.store.seed_bootstrap_user(&admin, Some(&hash))? {
            return Ok(None);
        }
        log::info!("Seeded bootstrap admin {}", admin.email);
        Ok(Some(admin))
    }
}
