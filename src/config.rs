use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the TerraMail tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Authentication and rate limiting
    pub auth: AuthConfig,
    /// Item classifier configuration
    pub classifier: ClassifierConfig,
    /// Account seeded into an empty database
    pub bootstrap: BootstrapConfig,
    /// Result output configuration
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Failed attempts per IP that trigger an automatic ban
    pub failure_threshold: usize,
    /// Window in hours over which failed attempts are counted
    pub failure_window_hours: i64,
    /// Duration of an automatic ban in hours
    pub auto_ban_hours: i64,
    /// HMAC key for signing session tokens
    pub session_secret: String,
    /// Lifetime of a session token in hours
    pub session_ttl_hours: i64,
    /// PBKDF2 rounds for new password hashes
    pub pbkdf2_iterations: u32,
}

/// Item classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Remote verdict endpoint; the local heuristic alone is used when unset
    pub endpoint: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Delay between items in milliseconds
    pub pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub admin_email: String,
    pub admin_password: String,
    pub subscription_days: u32,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "json", "jsonl", or "console"
    pub format: String,
    /// Output file path (if format is not "console")
    pub file_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                db_path: PathBuf::from("terramail.db"),
            },
            auth: AuthConfig {
                failure_threshold: 5,
                failure_window_hours: 1,
                auto_ban_hours: 24,
                session_secret: "change-me".to_string(),
                session_ttl_hours: 24,
                pbkdf2_iterations: 100_000,
            },
            classifier: ClassifierConfig {
                endpoint: None,
                timeout_secs: 10,
                pacing_ms: 100,
            },
            bootstrap: BootstrapConfig {
                admin_email: "admin@terramail.com".to_string(),
                admin_password: "admin123".to_string(),
                subscription_days: 999,
            },
            output: OutputConfig {
                format: "console".to_string(),
                file_path: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override settings from `TERRAMAIL_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("TERRAMAIL_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(endpoint) = lookup("TERRAMAIL_CLASSIFIER_ENDPOINT") {
            self.classifier.endpoint = if endpoint.trim().is_empty() {
                None
            } else {
                Some(endpoint)
            };
        }
        if let Some(secret) = lookup("TERRAMAIL_SESSION_SECRET") {
            self.auth.session_secret = secret;
        }
    }
}
