//! Wiring of the store, guard, authenticator and processor from a `Config`

use std::sync::Arc;
use std::time::Duration;

use crate::accounts::{AccountError, UserDirectory};
use crate::auth::{Authenticator, PasswordHasher, Pbkdf2Hasher, SessionStore, SignedSessionStore};
use crate::classifier::ItemClassifier;
use crate::config::Config;
use crate::guard::{BanGuard, GuardPolicy};
use crate::models::{ProcessingSession, User};
use crate::persistence::{PersistenceError, SqliteStore, Store};
use crate::processing::BatchProcessor;

pub struct TerraMail {
    store: Arc<dyn Store>,
    accounts: UserDirectory,
    auth: Authenticator,
    processor: BatchProcessor<ItemClassifier>,
}

impl TerraMail {
    /// Open the database named by the config
    pub fn open(config: &Config) -> Result<Self, PersistenceError> {
        let store = SqliteStore::new(&config.storage.db_path)?;
        log::info!("Using database {:?}", config.storage.db_path);
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn with_store(store: Arc<dyn Store>, config: &Config) -> Self {
        let hasher: Arc<dyn PasswordHasher> =
            Arc::new(Pbkdf2Hasher::new(config.auth.pbkdf2_iterations));
        let sessions: Arc<dyn SessionStore> = Arc::new(SignedSessionStore::new(
            config.auth.session_secret.as_bytes(),
            config.auth.session_ttl_hours,
            store.clone(),
        ));
        let guard = BanGuard::with_policy(store.clone(), GuardPolicy::from(&config.auth));

        TerraMail {
            accounts: UserDirectory::new(store.clone(), hasher.clone()),
            auth: Authenticator::new(store.clone(), guard, hasher, sessions),
            processor: BatchProcessor::new(
                ItemClassifier::from_config(&config.classifier),
                store.clone(),
                Duration::from_millis(config.classifier.pacing_ms),
            ),
            store,
        }
    }

    /// Seed the bootstrap admin when the database has no users
    pub fn bootstrap(&self, config: &Config) -> Result<Option<User>, AccountError> {
        self.accounts.seed_bootstrap_admin(&config.bootstrap)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn accounts(&self) -> &UserDirectory {
        &self.accounts
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn guard(&self) -> &BanGuard {
        self.auth.guard()
    }

    pub fn processor(&self) -> &BatchProcessor<ItemClassifier> {
        &self.processor
    }

    /// Zero the counters of a user's processing session
    pub fn reset_session(&self, user_id: &str) -> Result<ProcessingSession, PersistenceError> {
        let sessions = self.processor.sessions();
        let mut session = sessions.load_or_create(user_id)?;
        sessions.reset(&mut session)?;
        Ok(session)
    }
}
