//! Private key file SSH authentication.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::mcp::client::TunnelClientHandler;
use crate::mcp::error::TunnelError;

use super::traits::AuthStrategy;

/// Private key file authentication strategy.
///
/// The key is read from disk on every attempt, so a key fixed between
/// retries is picked up. Encrypted keys are decoded with the passphrase.
pub struct KeyAuth {
    key_path: PathBuf,
    passphrase: Option<String>,
}

impl KeyAuth {
    /// Create a new key authentication strategy.
    ///
    /// # Arguments
    ///
    /// * `key_path` - Path to the private key file
    /// * `passphrase` - Passphrase for an encrypted key
    pub fn new(key_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            key_path: key_path.into(),
            passphrase,
        }
    }

    /// Read and decode the private key.
    pub(crate) async fn load(&self) -> Result<keys::PrivateKey, TunnelError> {
        let content = tokio::fs::read_to_string(&self.key_path)
            .await
            .map_err(|e| TunnelError::KeyRead {
                path: self.key_path.clone(),
                reason: e.to_string(),
            })?;

        keys::decode_secret_key(&content, self.passphrase.as_deref()).map_err(|e| {
            TunnelError::KeyRead {
                path: self.key_path.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TunnelClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError> {
        let key_pair = self.load().await?;

        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| TunnelError::Protocol(format!("key authentication error: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_key_auth_name() {
        assert_eq!(KeyAuth::new("/path/to/key", None).name(), "key");
    }

    #[tokio::test]
    async fn test_missing_key_file_is_key_read_error() {
        let auth = KeyAuth::new("/nonexistent/id_ed25519", None);
        let err = auth.load().await.unwrap_err();
        match err {
            TunnelError::KeyRead { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/id_ed25519"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_key_file_is_key_read_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a private key").unwrap();

        let auth = KeyAuth::new(file.path(), Some("words".to_string()));
        let err = auth.load().await.unwrap_err();
        assert!(matches!(err, TunnelError::KeyRead { .. }));
        assert!(!err.is_retryable());
    }
}
