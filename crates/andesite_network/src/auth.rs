//! The external session-authenticator interface.
//!
//! After the server recovers the shared secret, it hands the login to an
//! authenticator before allowing the transition to play. The core never
//! talks to a session service itself; implementations typically POST the
//! username, server id string, shared secret, and the server's DER public
//! key to one.

use async_trait::async_trait;
use num_bigint::BigInt;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

/// Everything an authenticator needs to validate a joining session.
#[derive(Clone, Debug)]
pub struct AuthRequest {
    pub username: String,
    /// The random server id string issued in the encryption request.
    pub server_id: String,
    /// The decrypted 16-byte shared secret.
    pub shared_secret: Vec<u8>,
    /// The server's public key in ASN.1 DER form.
    pub public_key_der: Vec<u8>,
}

impl AuthRequest {
    /// The standard session digest: SHA-1 over shared secret then public
    /// key, rendered as signed-magnitude hex.
    pub fn digest(&self) -> String {
        let hash = Sha1::new()
            .chain_update(&self.shared_secret)
            .chain_update(&self.public_key_der)
            .finalize();

        auth_digest(&hash)
    }
}

/// The profile an authenticator vouches for.
#[derive(Clone, Debug)]
pub struct AuthOutcome {
    pub uuid: Uuid,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The authenticator answered and said no.
    #[error("session authenticator denied the login: {0}")]
    Denied(String),
    /// The authenticator could not be reached or gave garbage back.
    #[error("session authenticator unreachable: {0}")]
    Unreachable(String),
}

/// Validates logins against an external session service.
///
/// Called from within the reactor's async context; implementations are free
/// to perform network I/O.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync + 'static {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthOutcome, AuthError>;
}

/// Accepts every login, deriving a stable UUID from the username. For
/// development and tests only.
pub struct OfflineAuthenticator;

#[async_trait]
impl SessionAuthenticator for OfflineAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthOutcome, AuthError> {
        let uuid = Uuid::from_slice(&Sha256::digest(request.username.as_bytes())[..16])
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        Ok(AuthOutcome {
            uuid,
            username: request.username.clone(),
        })
    }
}

fn auth_digest(bytes: &[u8]) -> String {
    BigInt::from_signed_bytes_be(bytes).to_str_radix(16)
}
