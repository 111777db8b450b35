//! Bearer token sources.
//!
//! Obtaining and refreshing OAuth tokens is left to an external helper; the
//! poller only reads the current access token, either from configuration or
//! from a file that the helper keeps up to date.

use async_trait::async_trait;
use log::info;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::client::CredentialProvider;
use crate::error::RequestError;

/// A fixed token, e.g. from `UPLINK_ACCESS_TOKEN`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Result<String, RequestError> {
        if self.0.trim().is_empty() {
            return Err(RequestError::Auth("access token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// Token read from a file; cached until the API rejects it.
pub struct TokenFile {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenFile {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    fn cached(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialProvider for TokenFile {
    async fn token(&self) -> Result<String, RequestError> {
        if let Some(token) = self.cached().clone() {
            return Ok(token);
        }
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RequestError::Auth(format!("failed to read {}: {}", self.path.display(), e)))?;
        let token = raw.trim().to_string();
        if token.is_empty() {
            return Err(RequestError::Auth(format!("{} is empty", self.path.display())));
        }
        info!("Loaded access token from {}", self.path.display());
        *self.cached() = Some(token.clone());
        Ok(token)
    }

    fn invalidate(&self) {
        *self.cached() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_file_is_reread_after_invalidation() {
        let path = std::env::temp_dir().join(format!("uplink-token-{}.txt", std::process::id()));
        std::fs::write(&path, "first\n").unwrap();
        let provider = TokenFile::new(&path);
        assert_eq!(provider.token().await.unwrap(), "first");

        std::fs::write(&path, "second").unwrap();
        assert_eq!(provider.token().await.unwrap(), "first");
        provider.invalidate();
        assert_eq!(provider.token().await.unwrap(), "second");

        std::fs::remove_file(&path).unwrap();
        provider.invalidate();
        assert!(matches!(provider.token().await, Err(RequestError::Auth(_))));
    }

    #[tokio::test]
    async fn empty_static_token_is_an_auth_error() {
        assert!(matches!(StaticToken::new(" ").token().await, Err(RequestError::Auth(_))));
        assert_eq!(StaticToken::new("abc").token().await.unwrap(), "abc");
    }
}
