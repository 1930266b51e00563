//! Signed authentication session tokens
//!
//! Tokens are HS256 JWTs: base64url (no padding) header and claims, signed
//! with HMAC-SHA256. The token id is also recorded in the store, so a
//! logout revokes the token before it expires.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::models::{new_id, AuthSession, Role, User};
use crate::persistence::{PersistenceError, Store};

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),

    #[error("Token encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Invalid session lifetime: {0} hours")]
    InvalidLifetime(i64),
}

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    /// Token id
    pub jti: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks authentication sessions
pub trait SessionStore: Send + Sync {
    /// Start a session for `user`, returning the client-held token
    fn establish(&self, user: &User, now: DateTime<Utc>) -> Result<String, SessionError>;

    /// Claims of a valid, unexpired, unrevoked token; `None` otherwise
    fn resolve(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionClaims>, SessionError>;

    /// Revoke a token; false if it was not a live session
    fn revoke(&self, token: &str) -> Result<bool, SessionError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

pub struct SignedSessionStore {
    secret: Vec<u8>,
    ttl_hours: i64,
    store: Arc<dyn Store>,
}

impl SignedSessionStore {
    pub fn new(secret: &[u8], ttl_hours: i64, store: Arc<dyn Store>) -> Self {
        SignedSessionStore {
            secret: secret.to_vec(),
            ttl_hours,
            store,
        }
    }

    /// Expiry of a token issued at `now`; the lifetime must be positive
    fn expiry(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SessionError> {
        Duration::try_hours(self.ttl_hours)
            .filter(|ttl| *ttl > Duration::zero())
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(SessionError::InvalidLifetime(self.ttl_hours))
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| SessionError::InvalidKey)
    }

    fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        let header = TokenHeader {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Claims of a well-formed token with a valid signature
    ///
    /// Expiry and revocation are not checked here.
    fn decode(&self, token: &str) -> Result<Option<SessionClaims>, SessionError> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Ok(None);
        };

        let Ok(header_raw) = URL_SAFE_NO_PAD.decode(header_b64) else {
            return Ok(None);
        };
        let header: TokenHeader = match serde_json::from_slice(&header_raw) {
            Ok(header) => header,
            Err(_) => return Ok(None),
        };
        if header.alg != "HS256" || !header.typ.eq_ignore_ascii_case("JWT") {
            return Ok(None);
        }

        let Ok(signature) = URL_SAFE_NO_PAD.decode(sig_b64) else {
            return Ok(None);
        };
        let mut mac = self.mac()?;
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        if mac.verify_slice(&signature).is_err() {
            log::debug!("Rejected session token with bad signature");
            return Ok(None);
        }

        let Ok(claims_raw) = URL_SAFE_NO_PAD.decode(claims_b64) else {
            return Ok(None);
        };
        match serde_json::from_slice(&claims_raw) {
            Ok(claims) => Ok(Some(claims)),
            Err(_) => Ok(None),
        }
    }
}

impl SessionStore for SignedSessionStore {
    fn establish(&self, user: &User, now: DateTime<Utc>) -> Result<String, SessionError> {
        let expires_at = self.expiry(now)?;
        let claims = SessionClaims {
            sub: user.id.clone(),
            jti: new_id(),
            role: user.role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self.encode(&claims)?;

        self.store.insert_auth_session(&AuthSession {
            token_id: claims.jti.clone(),
            user_id: user.id.clone(),
            issued_at: now,
            expires_at,
        })?;
        Ok(token)
    }

    fn resolve(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionClaims>, SessionError> {
        let Some(claims) = self.decode(token)? else {
            return Ok(None);
        };
        if claims.exp <= now.timestamp() {
            return Ok(None);
        }

        match self.store.get_auth_session(&claims.jti)? {
            Some(session) if session.user_id == claims.sub => Ok(Some(claims)),
            _ => Ok(None),
        }
    }

    fn revoke(&self, token: &str) -> Result<bool, SessionError> {
        match self.decode(token)? {
            Some(claims) => Ok(self.store.delete_auth_session(&claims.jti)?),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;

    fn create_sessions(secret: &[u8]) -> SignedSessionStore {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        SignedSessionStore::new(secret, 24, store)
    }

    fn create_user() -> User {
        User::new("a@b.com", Role::Admin, 30, Utc::now())
    }

    #[test]
    fn test_establish_and_resolve() {
        let sessions = create_sessions(b"secret");
        let user = create_user();
        let now = Utc::now();

        let token = sessions.establish(&user, now).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = sessions.resolve(&token, now).unwrap().unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn test_invalid_lifetime() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let user = create_user();
        for ttl in [0, -5, i64::MAX] {
            let sessions = SignedSessionStore::new(b"secret", ttl, store.clone());
            let err = sessions.establish(&user, Utc::now()).unwrap_err();
            assert!(matches!(err, SessionError::InvalidLifetime(_)), "{ttl}");
        }
    }

    #[test]
    fn test_expired_token() {
        let sessions = create_sessions(b"secret");
        let now = Utc::now();
        let token = sessions.establish(&create_user(), now).unwrap();

        assert!(sessions.resolve(&token, now + Duration::hours(25)).unwrap().is_none());
    }

    #[test]
    fn test_revoked_token() {
        let sessions = create_sessions(b"secret");
        let now = Utc::now();
        let token = sessions.establish(&create_user(), now).unwrap();

        assert!(sessions.revoke(&token).unwrap());
        assert!(sessions.resolve(&token, now).unwrap().is_none());
        assert!(!sessions.revoke(&token).unwrap());
    }

    #[test]
    fn test_token_signed_with_other_key() {
        let sessions = create_sessions(b"secret");
        let other = create_sessions(b"other-secret");
        let now = Utc::now();
        let token = other.establish(&create_user(), now).unwrap();

        assert!(sessions.resolve(&token, now).unwrap().is_none());
    }

    #[test]
    fn test_tampered_claims() {
        let sessions = create_sessions(b"secret");
        let now = Utc::now();
        let token = sessions.establish(&create_user(), now).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = URL_SAFE_NO_PAD.encode(
            br#"{"sub":"someone-else","jti":"x","role":"admin","iat":0,"exp":99999999999}"#,
        );
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

        assert!(sessions.resolve(&forged, now).unwrap().is_none());
    }

    #[test]
    fn test_garbage_tokens() {
        let sessions = create_sessions(b"secret");
        let now = Utc::now();
        for token in ["", "abc", "a.b", "a.b.c", "a.b.c.d"] {
            assert!(sessions.resolve(token, now).unwrap().is_none());
            assert!(!sessions.revoke(token).unwrap());
        }
    }
}
