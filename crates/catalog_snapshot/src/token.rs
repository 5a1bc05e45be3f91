//! Session tokens for the snapshot streams.
//!
//! A token binds a stream to one session and proves it was issued by this
//! server recently. Tokens are HMAC-SHA256 signed with a secret generated
//! per server instance, so a token never outlives the process that issued it.
//!
//! ## Token Format
//!
//! - 16 bytes: session id
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 56 bytes.

use crate::error::{SnapshotError, SnapshotResult};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_LEN: usize = 24;
const TOKEN_LEN: usize = SIGNED_LEN + 32;

/// Issues and checks session tokens.
#[derive(Clone)]
pub struct SessionTokens {
    secret: Vec<u8>,
    expiry: Duration,
}

impl SessionTokens {
    /// Creates a token issuer with a fresh random secret.
    pub fn new(expiry: Duration) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(secret, expiry)
    }

    /// Creates a token issuer with a known secret.
    pub fn with_secret(secret: Vec<u8>, expiry: Duration) -> Self {
        Self { secret, expiry }
    }

    /// Issues a token for `session_id`.
    pub fn issue(&self, session_id: Uuid) -> SnapshotResult<Vec<u8>> {
        self.issue_at(session_id, now_millis())
    }

    fn issue_at(&self, session_id: Uuid, timestamp: u64) -> SnapshotResult<Vec<u8>> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(session_id.as_bytes());
        token.extend_from_slice(&timestamp.to_be_bytes());
        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Checks that `token` was issued by this server for `session_id` and
    /// has not expired.
    pub fn verify(&self, token: &[u8], session_id: Uuid) -> SnapshotResult<()> {
        if token.len() != TOKEN_LEN {
            return Err(SnapshotError::NotAuthorized("invalid token length".into()));
        }
        let (signed, signature) = token.split_at(SIGNED_LEN);

        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| SnapshotError::NotAuthorized("invalid signature".into()))?;

        if &signed[..16] != session_id.as_bytes() {
            return Err(SnapshotError::NotAuthorized("session mismatch".into()));
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&signed[16..]);
        let issued = u64::from_be_bytes(timestamp);
        let expiry = self.expiry.as_millis() as u64;
        if now_millis() > issued.saturating_add(expiry) {
            return Err(SnapshotError::NotAuthorized("token expired".into()));
        }
        Ok(())
    }

    fn mac(&self, data: &[u8]) -> SnapshotResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SnapshotError::Internal(e.to_string()))?;
        mac.update(data);
        Ok(mac)
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
