//! SQLite implementation of the Store trait

use super::{PersistenceError, Store};
use crate::models::user::normalize_email;
use crate::models::{AuthSession, BannedIp, LoginAttempt, ProcessingSession, Role, User};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const USER_COLUMNS: &str =
    "id, email, role, subscription_days, allowed_ips, is_banned, created_at, updated_at";
const ATTEMPT_COLUMNS: &str = "id, ip_address, user_email, success, created_at";
const BAN_COLUMNS: &str = "id, ip_address, reason, banned_until, created_at";
const SESSION_COLUMNS: &str = "id, user_id, approved_count, rejected_count, loaded_count, \
                               tested_count, is_active, created_at, updated_at";

/// SQLite-based storage
///
/// One connection behind a mutex; every trait call is a single statement
/// or a transaction, so readers never observe half-applied writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store at the specified path
    ///
    /// Creates the database file and initializes the schema if it doesn't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }
}

fn millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    match ms {
        None => Ok(None),
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
    }
}

fn counter_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    let role = role
        .parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;
    let allowed_ips: String = row.get(4)?;
    let allowed_ips: Vec<String> = serde_json::from_str(&allowed_ips)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        role,
        subscription_days: row.get(3)?,
        allowed_ips,
        is_banned: row.get(5)?,
        created_at: timestamp_at(row, 6)?,
        updated_at: timestamp_at(row, 7)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<LoginAttempt> {
    Ok(LoginAttempt {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        user_email: row.get(2)?,
        success: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn ban_from_row(row: &Row<'_>) -> rusqlite::Result<BannedIp> {
    Ok(BannedIp {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        reason: row.get(2)?,
        banned_until: optional_timestamp_at(row, 3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessingSession> {
    Ok(ProcessingSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        approved_count: counter_at(row, 2)?,
        rejected_count: counter_at(row, 3)?,
        loaded_count: counter_at(row, 4)?,
        tested_count: counter_at(row, 5)?,
        is_active: row.get(6)?,
        created_at: timestamp_at(row, 7)?,
        updated_at: timestamp_at(row, 8)?,
    })
}

fn encode_ips(ips: &[String]) -> Result<String, PersistenceError> {
    serde_json::to_string(ips).map_err(|e| PersistenceError::InvalidData(e.to_string()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

const BOOTSTRAP_KEY: &str = "bootstrap_seeded";

fn insert_user_row(
    conn: &Connection,
    user: &User,
    password_hash: Option<&str>,
) -> Result<(), PersistenceError> {
    let allowed_ips = encode_ips(&user.allowed_ips)?;
    let result = conn.execute(
        "INSERT INTO users
         (id, email, role, subscription_days, allowed_ips, is_banned, password_hash,
          created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user.id,
            user.email,
            user.role.as_str(),
            user.subscription_days,
            allowed_ips,
            user.is_banned,
            password_hash,
            millis(&user.created_at),
            millis(&user.updated_at)
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(PersistenceError::DuplicateEmail(user.email.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

fn is_seeded(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM meta WHERE key = ?)",
        params![BOOTSTRAP_KEY],
        |row| row.get(0),
    )
}

impl Store for SqliteStore {
    fn insert_user(
        &self,
        user: &User,
        password_hash: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        insert_user_row(&conn, user, password_hash)
    }

    fn get_user(&self, id: &str) -> Result<Option<User>, PersistenceError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, PersistenceError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!(
                    "SELECT {} FROM users WHERE email = ? ORDER BY rowid LIMIT 1",
                    USER_COLUMNS
                ),
                params![normalize_email(email)],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users(&self) -> Result<Vec<User>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC, rowid DESC",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn update_user(&self, user: &User) -> Result<bool, PersistenceError> {
        let allowed_ips = encode_ips(&user.allowed_ips)?;
        let conn = self.conn()?;
        let result = conn.execute(
            "UPDATE users SET email = ?, role = ?, subscription_days = ?, allowed_ips = ?,
                              is_banned = ?, updated_at = ?
             WHERE id = ?",
            params![
                user.email,
                user.role.as_str(),
                user.subscription_days,
                allowed_ips,
                user.is_banned,
                millis(&user.updated_at),
                user.id
            ],
        );

        match result {
            Ok(changed) => Ok(changed > 0),
            Err(e) if is_unique_violation(&e) => {
                Err(PersistenceError::DuplicateEmail(user.email.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_user(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM auth_sessions WHERE user_id = ?", params![id])?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn count_users(&self) -> Result<usize, PersistenceError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn set_password_hash(&self, user_id: &str, hash: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            params![hash, user_id],
        )?;
        Ok(changed > 0)
    }

    fn get_password_hash(&self, user_id: &str) -> Result<Option<String>, PersistenceError> {
        let conn = self.conn()?;
        let hash: Option<Option<String>> = conn
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }

    fn add_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO login_attempts (id, ip_address, user_email, success, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                attempt.id,
                attempt.ip_address,
                attempt.user_email,
                attempt.success,
                millis(&attempt.created_at)
            ],
        )?;
        Ok(())
    }

    fn count_failed_attempts_since(
        &self,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, PersistenceError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM login_attempts
             WHERE ip_address = ? AND success = 0 AND created_at > ?",
            params![ip, millis(&since)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn recent_login_attempts(&self, limit: usize) -> Result<Vec<LoginAttempt>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM login_attempts ORDER BY created_at DESC, rowid DESC LIMIT ?",
            ATTEMPT_COLUMNS
        ))?;
        let attempts = stmt
            .query_map(params![limit as i64], attempt_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attempts)
    }

    fn add_ban(&self, ban: &BannedIp) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO banned_ips (id, ip_address, reason, banned_until, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                ban.id,
                ban.ip_address,
                ban.reason,
                ban.banned_until.as_ref().map(millis),
                millis(&ban.created_at)
            ],
        )?;
        Ok(())
    }

    fn find_ban(&self, ip: &str) -> Result<Option<BannedIp>, PersistenceError> {
        let conn = self.conn()?;
        let ban = conn
            .query_row(
                &format!(
                    "SELECT {} FROM banned_ips WHERE ip_address = ? ORDER BY rowid LIMIT 1",
                    BAN_COLUMNS
                ),
                params![ip],
                ban_from_row,
            )
            .optional()?;
        Ok(ban)
    }

    fn remove_ban(&self, id: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM banned_ips WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }

    fn list_bans(&self) -> Result<Vec<BannedIp>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM banned_ips ORDER BY rowid",
            BAN_COLUMNS
        ))?;
        let bans = stmt
            .query_map([], ban_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bans)
    }

    fn insert_session(&self, session: &ProcessingSession) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO processing_sessions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                SESSION_COLUMNS
            ),
            params![
                session.id,
                session.user_id,
                session.approved_count as i64,
                session.rejected_count as i64,
                session.loaded_count as i64,
                session.tested_count as i64,
                session.is_active,
                millis(&session.created_at),
                millis(&session.updated_at)
            ],
        )?;
        Ok(())
    }

    fn find_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<ProcessingSession>, PersistenceError> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM processing_sessions WHERE user_id = ?
                     ORDER BY rowid LIMIT 1",
                    SESSION_COLUMNS
                ),
                params![user_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn get_session(&self, id: &str) -> Result<Option<ProcessingSession>, PersistenceError> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!("SELECT {} FROM processing_sessions WHERE id = ?", SESSION_COLUMNS),
                params![id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn update_session(&self, session: &ProcessingSession) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE processing_sessions
             SET approved_count = ?, rejected_count = ?, loaded_count = ?, tested_count = ?,
                 is_active = ?, updated_at = ?
             WHERE id = ?",
            params![
                session.approved_count as i64,
                session.rejected_count as i64,
                session.loaded_count as i64,
                session.tested_count as i64,
                session.is_active,
                millis(&session.updated_at),
                session.id
            ],
        )?;
        Ok(changed > 0)
    }

    fn insert_auth_session(&self, session: &AuthSession) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO auth_sessions (token_id, user_id, issued_at, expires_at)
             VALUES (?, ?, ?, ?)",
            params![
                session.token_id,
                session.user_id,
                millis(&session.issued_at),
                millis(&session.expires_at)
            ],
        )?;
        Ok(())
    }

    fn get_auth_session(&self, token_id: &str) -> Result<Option<AuthSession>, PersistenceError> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                "SELECT token_id, user_id, issued_at, expires_at
                 FROM auth_sessions WHERE token_id = ?",
                params![token_id],
                |row| {
                    Ok(AuthSession {
                        token_id: row.get(0)?,
                        user_id: row.get(1)?,
                        issued_at: timestamp_at(row, 2)?,
                        expires_at: timestamp_at(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    fn delete_auth_session(&self, token_id: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM auth_sessions WHERE token_id = ?",
            params![token_id],
        )?;
        Ok(deleted > 0)
    }

    fn bootstrap_seeded(&self) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        Ok(is_seeded(&conn)?)
    }

    fn seed_bootstrap_user(
        &self,
        user: &User,
        password_hash: Option<&str>,
    ) -> Result<bool, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if is_seeded(&tx)? {
            return Ok(false);
        }

        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if existing == 0 {
            insert_user_row(&tx, user, password_hash)?;
        }
        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)",
            params![BOOTSTRAP_KEY, millis(&user.created_at).to_string()],
        )?;
        tx.commit()?;
        Ok(existing == 0)
    }

    fn clear_all(&self) -> Result<(), PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM users;
             DELETE FROM login_attempts;
             DELETE FROM banned_ips;
             DELETE FROM processing_sessions;
             DELETE FROM auth_sessions;
             DELETE FROM meta;",
        )?;
        tx.commit()?;
        Ok(())
    }
}
