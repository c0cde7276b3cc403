//! # Request Signatures
//!
//! The scoring service authenticates each session with a SHA-1 hex digest over
//! the application key, a millisecond timestamp, an optional user id and the
//! secret key. The service recomputes the digest on its side and rejects stale
//! timestamps, so signatures are generated fresh for every request and never cached.
//!
//! ## Concatenation order:
//! - connection scope: `app_key + timestamp + secret_key`
//! - user scope: `app_key + timestamp + user_id + secret_key`

use serde::Serialize;
use sha1::{Digest, Sha1};

/// Application key and secret key of the scoring service.
///
/// Read-only after startup and shared by every request.
#[derive(Clone)]
pub struct Credentials {
    app_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &self.app_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A signature together with the timestamp it was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureMaterial {
    pub sig: String,
    pub timestamp: String,
    pub user_id: Option<String>,
}

impl Credentials {
    pub fn new(app_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Signature for the `connect` command, stamped with the current time.
    pub fn connect_signature(&self) -> SignatureMaterial {
        self.sign_at(&current_timestamp_millis(), None)
    }

    /// Signature for the `start` command, stamped with the current time.
    pub fn start_signature(&self, user_id: &str) -> SignatureMaterial {
        self.sign_at(&current_timestamp_millis(), Some(user_id))
    }

    /// Sign for an explicit timestamp. Pure function of its inputs.
    pub fn sign_at(&self, timestamp: &str, user_id: Option<&str>) -> SignatureMaterial {
        let mut hasher = Sha1::new();
        hasher.update(self.app_key.as_bytes());
        hasher.update(timestamp.as_bytes());
        if let Some(user_id) = user_id {
            hasher.update(user_id.as_bytes());
        }
        hasher.update(self.secret_key.as_bytes());

        SignatureMaterial {
            sig: hex::encode(hasher.finalize()),
            timestamp: timestamp.to_string(),
            user_id: user_id.map(str::to_string),
        }
    }
}

/// Wall-clock time in milliseconds since the Unix epoch, as a decimal string.
fn current_timestamp_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
