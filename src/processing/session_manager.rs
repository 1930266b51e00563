//! Per-user processing session counters

use std::sync::Arc;

use chrono::Utc;

use crate::models::ProcessingSession;
use crate::persistence::{PersistenceError, Store};

/// Owns the lifecycle of a user's `ProcessingSession`
///
/// Every mutation is written through to the store immediately.
pub struct SessionManager {
    store: Arc<dyn Store>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        SessionManager { store }
    }

    /// The user's session, created with zeroed counters on first use
    pub fn load_or_create(&self, user_id: &str) -> Result<ProcessingSession, PersistenceError> {
        if let Some(session) = self.store.find_session_for_user(user_id)? {
            return Ok(session);
        }
        let session = ProcessingSession::new(user_id, Utc::now());
        self.store.insert_session(&session)?;
        log::debug!("Created processing session {} for user {}", session.id, user_id);
        Ok(session)
    }

    /// Reset counters for a new run of `loaded` items and mark it active
    pub fn begin_run(
        &self,
        session: &mut ProcessingSession,
        loaded: u64,
    ) -> Result<(), PersistenceError> {
        session.reset_counters();
        session.loaded_count = loaded;
        session.is_active = true;
        self.save(session)
    }

    /// Count one processed item
    pub fn record(
        &self,
        session: &mut ProcessingSession,
        approved: bool,
    ) -> Result<(), PersistenceError> {
        session.record(approved);
        self.save(session)
    }

    pub fn finish(&self, session: &mut ProcessingSession) -> Result<(), PersistenceError> {
        session.is_active = false;
        self.save(session)
    }

    /// Zero all counters, keeping the active flag
    pub fn reset(&self, session: &mut ProcessingSession) -> Result<(), PersistenceError> {
        session.reset_counters();
        self.save(session)
    }

    fn save(&self, session: &mut ProcessingSession) -> Result<(), PersistenceError> {
        session.updated_at = Utc::now();
        if self.store.update_session(session)? {
            Ok(())
        } else {
            Err(PersistenceError::InvalidData(format!(
                "processing session {} not found",
                session.id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;

    fn create_manager() -> (Arc<SqliteStore>, SessionManager) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (store.clone(), SessionManager::new(store))
    }

    #[test]
    fn test_lazy_creation_is_stable() {
        let (_, manager) = create_manager();
        let first = manager.load_or_create("user-1").unwrap();
        let second = manager.load_or_create("user-1").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.tested_count, 0);
        assert!(!first.is_active);
        assert_ne!(manager.load_or_create("user-2").unwrap().id, first.id);
    }

    #[test]
    fn test_run_lifecycle_is_persisted() {
        let (store, manager) = create_manager();
        let mut session = manager.load_or_create("user-1").unwrap();

        manager.begin_run(&mut session, 3).unwrap();
        manager.record(&mut session, true).unwrap();
        manager.record(&mut session, false).unwrap();

        let stored = store.get_session(&session.id).unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.loaded_count, 3);
        assert_eq!(stored.tested_count, 2);
        assert_eq!(stored.approved_count, 1);
        assert_eq!(stored.rejected_count, 1);

        manager.finish(&mut session).unwrap();
        assert!(!store.get_session(&session.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_begin_run_resets_previous_counts() {
        let (_, manager) = create_manager();
        let mut session = manager.load_or_create("user-1").unwrap();
        manager.begin_run(&mut session, 2).unwrap();
        manager.record(&mut session, true).unwrap();
        manager.finish(&mut session).unwrap();

        manager.begin_run(&mut session, 5).unwrap();
        assert_eq!(session.tested_count, 0);
        assert_eq!(session.approved_count, 0);
        assert_eq!(session.loaded_count, 5);
    }

    #[test]
    fn test_reset() {
        let (store, manager) = create_manager();
        let mut session = manager.load_or_create("user-1").unwrap();
        manager.begin_run(&mut session, 1).unwrap();
        manager.record(&mut session, true).unwrap();
        manager.finish(&mut session).unwrap();

        manager.reset(&mut session).unwrap();
        let stored = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.loaded_count, 0);
        assert_eq!(stored.tested_count, 0);
        assert_eq!(stored.approved_count, 0);
    }

    #[test]
    fn test_missing_session_is_error() {
        let (_, manager) = create_manager();
        let mut orphan = ProcessingSession::new("ghost", Utc::now());
        assert!(manager.record(&mut orphan, true).is_err());
    }
}
