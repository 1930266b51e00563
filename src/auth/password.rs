//! Salted password hashing

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const OUTPUT_LEN: usize = 32;

/// Produces and checks stored password credentials
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;

    /// False for a wrong password and for any malformed encoding
    fn verify(&self, password: &str, encoded: &str) -> bool;
}

/// PBKDF2-HMAC-SHA256 with a random per-password salt
///
/// Encoded as `pbkdf2-sha256$<iterations>$<salt>$<hash>` with unpadded
/// base64, so a hash made with older settings still verifies after the
/// iteration count changes.
#[derive(Debug, Clone)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: u32) -> Self {
        Pbkdf2Hasher {
            iterations: iterations.max(1),
        }
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self::new(100_000)
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

impl PasswordHasher for Pbkdf2Hasher {
    fn hash(&self, password: &str) -> String {
        let salt: [u8; SALT_LEN] = rand::random();
        let hash = derive(password, &salt, self.iterations, OUTPUT_LEN);
        format!(
            "{}${}${}${}",
            SCHEME,
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(hash)
        )
    }

    fn verify(&self, password: &str, encoded: &str) -> bool {
        let parts: Vec<&str> = encoded.split('$').collect();
        let [scheme, iterations, salt, expected] = parts.as_slice() else {
            return false;
        };
        if *scheme != SCHEME {
            return false;
        }
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        if iterations == 0 {
            return false;
        }
        let (Ok(salt), Ok(expected)) = (
            STANDARD_NO_PAD.decode(salt.as_bytes()),
            STANDARD_NO_PAD.decode(expected.as_bytes()),
        ) else {
            return false;
        };
        if expected.is_empty() {
            return false;
        }

        let actual = derive(password, &salt, iterations, expected.len());
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}
