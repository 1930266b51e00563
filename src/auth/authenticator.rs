//! Login state machine
//!
//! Checks run in a fixed order and the first failing check decides the
//! outcome: IP ban, rate limit, unknown account, banned account, IP
//! restriction, password. Every refusal after the guard checks is written
//! to the login log, except a banned account.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::password::PasswordHasher;
use super::session::SessionStore;
use super::AuthError;
use crate::guard::BanGuard;
use crate::models::{LoginAttempt, User};
use crate::persistence::Store;

/// A completed login
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: User,
    pub token: String,
}

pub struct Authenticator {
    store: Arc<dyn Store>,
    guard: BanGuard,
    hasher: Arc<dyn PasswordHasher>,
    sessions: Arc<dyn SessionStore>,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn Store>,
        guard: BanGuard,
        hasher: Arc<dyn PasswordHasher>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Authenticator {
            store,
            guard,
            hasher,
            sessions,
        }
    }

    pub fn guard(&self) -> &BanGuard {
        &self.guard
    }

    pub fn login(&self, email: &str, password: &str, ip: &str) -> Result<LoginSuccess, AuthError> {
        self.login_at(email, password, ip, Utc::now())
    }

    pub fn login_at(
        &self,
        email: &str,
        password: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess, AuthError> {
        if self.guard.is_banned(ip, now)? {
            log::info!("Login refused for {}: IP banned", ip);
            return Err(AuthError::IpBanned);
        }

        if self.guard.exceeds_failure_threshold(ip, now)? {
            let ban = self.guard.auto_ban(ip, now)?;
            log::debug!("Auto-ban {} created for {}", ban.id, ip);
            return Err(AuthError::RateLimited {
                hours: self.guard.policy().auto_ban_hours,
            });
        }

        let Some(user) = self.store.find_user_by_email(email)? else {
            self.record_attempt(ip, email, false, now)?;
            log::info!("Login refused for {} from {}: unknown account", email, ip);
            return Err(AuthError::InvalidCredentials);
        };

        // Not written to the login log; the account state alone decides.
        if user.is_banned {
            log::info!("Login refused for {} from {}: account banned", user.email, ip);
            return Err(AuthError::AccountBanned);
        }

        if !user.permits_ip(ip) {
            self.record_attempt(ip, email, false, now)?;
            log::info!("Login refused for {} from {}: IP not allowed", user.email, ip);
            return Err(AuthError::IpNotAllowed);
        }

        let verified = self
            .store
            .get_password_hash(&user.id)?
            .map(|hash| self.hasher.verify(password, &hash))
            .unwrap_or(false);
        if !verified {
            self.record_attempt(ip, email, false, now)?;
            log::info!("Login refused for {} from {}: bad password", user.email, ip);
            return Err(AuthError::InvalidCredentials);
        }

        self.record_attempt(ip, email, true, now)?;
        let token = self.sessions.establish(&user, now)?;
        log::info!("User {} logged in from {}", user.email, ip);

        Ok(LoginSuccess { user, token })
    }

    pub fn logout(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.sessions.revoke(token)?)
    }

    /// The live account behind a session token
    pub fn current_user(&self, token: &str) -> Result<Option<User>, AuthError> {
        self.current_user_at(token, Utc::now())
    }

    /// Resolve a token; sessions of deleted or banned accounts are revoked
    pub fn current_user_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let Some(claims) = self.sessions.resolve(token, now)? else {
            return Ok(None);
        };

        match self.store.get_user(&claims.sub)? {
            Some(user) if !user.is_banned => Ok(Some(user)),
            _ => {
                self.sessions.revoke(token)?;
                Ok(None)
            }
        }
    }

    /// Like `current_user`, but the account must be an admin
    pub fn require_admin(&self, token: &str) -> Result<User, AuthError> {
        match self.current_user(token)? {
            Some(user) if user.is_admin() => Ok(user),
            Some(_) => Err(AuthError::Forbidden),
            None => Err(AuthError::InvalidCredentials),
        }
    }

    fn record_attempt(
        &self,
        ip: &str,
        email: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let attempt = LoginAttempt::new(ip, Some(email), success, now);
        self.store.add_login_attempt(&attempt)?;
        Ok(())
    }
}
