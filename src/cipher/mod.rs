//! Envelope encryption for GitHub access tokens.
//!
//! Tokens are encrypted with a centrally managed key before they reach the
//! connection store. Two backends implement [`SecretCipher`]:
//!
//! - [`KmsCipher`]: the managed key service (Cloud KMS REST API)
//! - [`LocalKeyCipher`]: AES-256-GCM with a key held in memory, for local runs
//!
//! Both report failure as a value ([`CipherError`]), never by panicking, so
//! callers can classify the failure and report it upward.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod kms;
mod local;

pub use kms::{
    KmsCipher, KmsKeyRef, TokenSource, DEFAULT_KMS_ENDPOINT, DEFAULT_METADATA_TOKEN_URL,
};
pub use local::{validate_key, LocalKeyCipher};

/// Opaque, base64-safe encrypted secret. Safe to persist.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext({} bytes)", self.0.len())
    }
}

/// Cipher failures. The string carries diagnostic context, never secret material.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CipherError {
    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),
    #[error("decryption unavailable: {0}")]
    DecryptionUnavailable(String),
}

/// Encrypt/decrypt adapter over a managed key.
///
/// One outbound call per invocation for remote backends; no retries.
#[async_trait]
pub trait SecretCipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError>;

    async fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CipherError>;
}
