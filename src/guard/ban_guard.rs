//! IP ban list and failed-login rate limiting
//!
//! Decides whether a login from a given IP may proceed. Bans are explicit
//! records; the rate limit counts failed attempts in a trailing window and
//! is only evaluated when someone tries to log in.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::AuthConfig;
use crate::models::BannedIp;
use crate::persistence::{PersistenceError, Store};

pub const AUTO_BAN_REASON: &str = "Too many failed login attempts";

/// Thresholds for the automatic ban
#[derive(Debug, Clone, PartialEq)]
pub struct GuardPolicy {
    /// Failed attempts inside the window that trigger a ban
    pub failure_threshold: usize,
    pub window_hours: i64,
    pub auto_ban_hours: i64,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        GuardPolicy {
            failure_threshold: 5,
            window_hours: 1,
            auto_ban_hours: 24,
        }
    }
}

impl From<&AuthConfig> for GuardPolicy {
    fn from(config: &AuthConfig) -> Self {
        GuardPolicy {
            failure_threshold: config.failure_threshold,
            window_hours: config.failure_window_hours,
            auto_ban_hours: config.auto_ban_hours,
        }
    }
}

fn hours_span(hours: i64) -> Option<Duration> {
    if hours < 0 {
        return None;
    }
    Duration::try_hours(hours)
}

fn invalid_hours(hours: i64) -> PersistenceError {
    PersistenceError::InvalidData(format!("invalid duration: {} hours", hours))
}

pub struct BanGuard {
    store: Arc<dyn Store>,
    policy: GuardPolicy,
}

impl BanGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_policy(store, GuardPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn Store>, policy: GuardPolicy) -> Self {
        BanGuard { store, policy }
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Whether `ip` is banned at `now`
    ///
    /// Only the first ban recorded for the IP is consulted; an expired first
    /// ban hides later ones.
    pub fn is_banned(&self, ip: &str, now: DateTime<Utc>) -> Result<bool, PersistenceError> {
        Ok(self
            .store
            .find_ban(ip)?
            .map(|ban| ban.is_active_at(now))
            .unwrap_or(false))
    }

    /// Failed attempts from `ip` during the trailing `window_hours`
    pub fn recent_failures(
        &self,
        ip: &str,
        window_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, PersistenceError> {
        let since = hours_span(window_hours)
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| invalid_hours(window_hours))?;
        self.store.count_failed_attempts_since(ip, since)
    }

    /// True once the policy's failure threshold is reached
    pub fn exceeds_failure_threshold(
        &self,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let failures = self.recent_failures(ip, self.policy.window_hours, now)?;
        Ok(failures >= self.policy.failure_threshold)
    }

    /// Append a ban; `hours == None` bans permanently
    ///
    /// Negative or unrepresentable durations are refused with `InvalidData`.
    pub fn ban(
        &self,
        ip: &str,
        reason: &str,
        hours: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<BannedIp, PersistenceError> {
        let banned_until = match hours {
            None => None,
            Some(h) => Some(
                hours_span(h)
                    .and_then(|span| now.checked_add_signed(span))
                    .ok_or_else(|| invalid_hours(h))?,
            ),
        };
        let ban = BannedIp::new(ip, reason, banned_until, now);
        self.store.add_ban(&ban)?;
        match ban.banned_until {
            Some(until) => log::info!("Banned IP {} until {} ({})", ip, until, reason),
            None => log::info!("Banned IP {} permanently ({})", ip, reason),
        }
        Ok(ban)
    }

    /// Ban `ip` for the policy's auto-ban duration
    pub fn auto_ban(&self, ip: &str, now: DateTime<Utc>) -> Result<BannedIp, PersistenceError> {
        log::warn!(
            "IP {} reached {} failed logins within {}h, banning for {}h",
            ip,
            self.policy.failure_threshold,
            self.policy.window_hours,
            self.policy.auto_ban_hours
        );
        self.ban(ip, AUTO_BAN_REASON, Some(self.policy.auto_ban_hours), now)
    }

    /// Remove a ban by id; unknown ids are ignored
    pub fn unban(&self, ban_id: &str) -> Result<(), PersistenceError> {
        if self.store.remove_ban(ban_id)? {
            log::info!("Removed ban {}", ban_id);
        } else {
            log::debug!("Ban {} not found, nothing to remove", ban_id);
        }
        Ok(())
    }

    pub fn list_bans(&self) -> Result<Vec<BannedIp>, PersistenceError> {
        self.store.list_bans()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoginAttempt;
    use crate::persistence::SqliteStore;

    fn create_guard() -> (Arc<SqliteStore>, BanGuard) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let guard = BanGuard::new(store.clone());
        (store, guard)
    }

    fn fail_from(store: &SqliteStore, ip: &str, at: DateTime<Utc>) {
        store
            .add_login_attempt(&LoginAttempt::new(ip, Some("x@y.com"), false, at))
            .unwrap();
    }

    #[test]
    fn test_unknown_ip_not_banned() {
        let (_, guard) = create_guard();
        assert!(!guard.is_banned("1.1.1.1", Utc::now()).unwrap());
    }

    #[test]
    fn test_timed_ban_expires_without_deletion() {
        let (store, guard) = create_guard();
        let now = Utc::now();
        guard.ban("1.1.1.1", "manual", Some(24), now).unwrap();

        assert!(guard.is_banned("1.1.1.1", now + Duration::hours(23)).unwrap());
        assert!(!guard.is_banned("1.1.1.1", now + Duration::hours(25)).unwrap());
        assert_eq!(store.list_bans().unwrap().len(), 1);
    }

    #[test]
    fn test_permanent_ban() {
        let (_, guard) = create_guard();
        let now = Utc::now();
        let ban = guard.ban("2.2.2.2", "manual", None, now).unwrap();

        assert!(ban.banned_until.is_none());
        assert!(guard.is_banned("2.2.2.2", now + Duration::days(1000)).unwrap());
    }

    #[test]
    fn test_first_ban_wins() {
        let (_, guard) = create_guard();
        let now = Utc::now();
        guard.ban("3.3.3.3", "old", Some(1), now - Duration::hours(2)).unwrap();
        guard.ban("3.3.3.3", "new", None, now).unwrap();

        // The expired first record shadows the permanent one
        assert!(!guard.is_banned("3.3.3.3", now).unwrap());
    }

    #[test]
    fn test_unban_is_idempotent() {
        let (_, guard) = create_guard();
        let now = Utc::now();
        let ban = guard.ban("4.4.4.4", "manual", None, now).unwrap();

        guard.unban(&ban.id).unwrap();
        assert!(!guard.is_banned("4.4.4.4", now).unwrap());
        guard.unban(&ban.id).unwrap();
        guard.unban("never-existed").unwrap();
    }

    #[test]
    fn test_recent_failures_window() {
        let (store, guard) = create_guard();
        let now = Utc::now();
        fail_from(&store, "5.5.5.5", now - Duration::minutes(90));
        fail_from(&store, "5.5.5.5", now - Duration::minutes(30));
        fail_from(&store, "5.5.5.5", now - Duration::minutes(1));
        fail_from(&store, "6.6.6.6", now);
        store
            .add_login_attempt(&LoginAttempt::new("5.5.5.5", None, true, now))
            .unwrap();

        assert_eq!(guard.recent_failures("5.5.5.5", 1, now).unwrap(), 2);
        assert_eq!(guard.recent_failures("5.5.5.5", 2, now).unwrap(), 3);
    }

    #[test]
    fn test_threshold() {
        let (store, guard) = create_guard();
        let now = Utc::now();
        for i in 0..4 {
            fail_from(&store, "7.7.7.7", now - Duration::minutes(i));
        }
        assert!(!guard.exceeds_failure_threshold("7.7.7.7", now).unwrap());

        fail_from(&store, "7.7.7.7", now);
        assert!(guard.exceeds_failure_threshold("7.7.7.7", now).unwrap());
    }

    #[test]
    fn test_out_of_range_hours_rejected() {
        let (store, guard) = create_guard();
        let now = Utc::now();

        for hours in [10_000_000_000_000, i64::MAX, -1] {
            let err = guard.ban("9.9.9.9", "manual", Some(hours), now).unwrap_err();
            assert!(matches!(err, PersistenceError::InvalidData(_)), "{hours}");
        }
        assert!(store.list_bans().unwrap().is_empty());

        assert!(matches!(
            guard.recent_failures("9.9.9.9", i64::MAX, now),
            Err(PersistenceError::InvalidData(_))
        ));
        assert!(matches!(
            guard.recent_failures("9.9.9.9", -1, now),
            Err(PersistenceError::InvalidData(_))
        ));
    }

    #[test]
    fn test_auto_ban_with_oversized_policy() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let guard = BanGuard::with_policy(
            store,
            GuardPolicy {
                auto_ban_hours: i64::MAX,
                ..GuardPolicy::default()
            },
        );
        assert!(guard.auto_ban("8.8.4.4", Utc::now()).is_err());
    }

    #[test]
    fn test_auto_ban_duration() {
        let (_, guard) = create_guard();
        let now = Utc::now();
        let ban = guard.auto_ban("8.8.8.8", now).unwrap();

        assert_eq!(ban.reason, AUTO_BAN_REASON);
        assert_eq!(ban.banned_until, Some(now + Duration::hours(24)));
    }
}
