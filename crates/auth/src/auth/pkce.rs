//! PKCE (Proof Key for Code Exchange) implementation for OAuth 2.0
//!
//! Implements RFC 7636 `S256`. Every random value here comes from the
//! operating system CSPRNG; if it cannot be read the call fails with
//! [`AuthError::EntropySourceUnavailable`] rather than falling back to a
//! weaker generator.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuthError, AuthResult};

/// RFC 7636 unreserved characters: `ALPHA / DIGIT / "-" / "." / "_" / "~"`
const UNRESERVED: &[u8; 66] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Minimum verifier length allowed by RFC 7636
pub const MIN_VERIFIER_LEN: usize = 43;

/// Maximum verifier length allowed by RFC 7636
pub const MAX_VERIFIER_LEN: usize = 128;

/// Verifier length used by [`generate_code_verifier`]
pub const DEFAULT_VERIFIER_LEN: usize = 64;

/// Largest multiple of 66 that fits in a byte; bytes at or above it are
/// rejected so every character is equally likely.
const REJECTION_BOUND: u8 = 198;

fn fill_secure(buf: &mut [u8]) -> AuthResult<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| AuthError::EntropySourceUnavailable(e.to_string()))
}

/// Generate a cryptographically secure code verifier of the default length
///
/// # Errors
/// Returns [`AuthError::EntropySourceUnavailable`] if the OS random source
/// fails
pub fn generate_code_verifier() -> AuthResult<String> {
    generate_code_verifier_with_length(DEFAULT_VERIFIER_LEN)
}

/// Generate a code verifier of `len` unreserved characters
///
/// # Errors
/// - [`AuthError::Config`] if `len` is outside `[43, 128]`
/// - [`AuthError::EntropySourceUnavailable`] if the OS random source fails
pub fn generate_code_verifier_with_length(len: usize) -> AuthResult<String> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(AuthError::Config(format!(
            "PKCE verifier length must be within {MIN_VERIFIER_LEN}..={MAX_VERIFIER_LEN}, got {len}"
        )));
    }

    let mut verifier = String::with_capacity(len);
    let mut pool = [0u8; 64];
    while verifier.len() < len {
        fill_secure(&mut pool)?;
        for &byte in pool.iter().filter(|&&b| b < REJECTION_BOUND) {
            if verifier.len() == len {
                break;
            }
            verifier.push(char::from(UNRESERVED[usize::from(byte) % UNRESERVED.len()]));
        }
    }
    pool.zeroize();

    Ok(verifier)
}

/// Generate code challenge from verifier using SHA256
///
/// Per RFC 7636, the challenge is `BASE64URL(SHA256(ASCII(code_verifier)))`.
/// Deterministic: the same verifier always yields the same challenge.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Check length and character set of a verifier
#[must_use]
pub fn is_valid_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
        && verifier.bytes().all(|b| UNRESERVED.contains(&b))
}

/// Generate a random state token for CSRF protection
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43
/// characters).
///
/// # Errors
/// Returns [`AuthError::EntropySourceUnavailable`] if the OS random source
/// fails
pub fn generate_state() -> AuthResult<String> {
    let mut bytes = [0u8; 32];
    fill_secure(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Validate that the state token matches
///
/// Compares SHA-256 digests so the running time depends neither on where the
/// inputs differ nor on their lengths.
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let actual = Sha256::digest(actual.as_bytes());
    expected.iter().zip(actual.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// PKCE verifier/challenge pair for one authorization attempt
///
/// The verifier is wiped from memory when the pair is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Generate a new pair with a default-length verifier
    ///
    /// # Examples
    /// ```
    /// use tokenward_auth::auth::pkce::PkcePair;
    ///
    /// let pair = PkcePair::generate().expect("entropy available");
    /// assert!(pair.verifier().len() >= 43);
    /// assert!(pair.verifier().len() <= 128);
    /// assert_eq!(pair.method(), "S256");
    /// ```
    ///
    /// # Errors
    /// Returns [`AuthError::EntropySourceUnavailable`] if the OS random
    /// source fails
    pub fn generate() -> AuthResult<Self> {
        Self::from_verifier(generate_code_verifier()?)
    }

    /// Build a pair around an existing verifier
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] if the verifier violates RFC 7636
    pub fn from_verifier(verifier: String) -> AuthResult<Self> {
        if !is_valid_verifier(&verifier) {
            return Err(AuthError::Config(
                "PKCE verifier must be 43-128 unreserved characters".to_string(),
            ));
        }
        let challenge = generate_code_challenge(&verifier);
        Ok(Self { verifier, challenge })
    }

    /// Secret sent only during code exchange
    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Public value sent in the authorization request
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Challenge method (always "S256")
    #[must_use]
    pub fn method(&self) -> &'static str {
        "S256"
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[redacted]")
            .field("challenge", &self.challenge)
            .finish()
    }
}
