use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::common::{BrokerError, BrokerResult};

/// A projected service account token read from disk.
///
/// The kubelet rotates the file, so a token is read fresh for every exchange
/// and never cached.
#[derive(Clone)]
pub struct WebIdentityToken {
    value: String,
    path: PathBuf,
    read_at: DateTime<Utc>,
}

impl WebIdentityToken {
    /// Reads the whole file and trims surrounding whitespace
    pub async fn load(path: &Path) -> BrokerResult<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BrokerError::io(path, e))?;

        let value = contents.trim();
        if value.is_empty() {
            return Err(BrokerError::empty_token(path));
        }

        debug!("Loaded web identity token from {}", path.display());
        Ok(Self {
            value: value.to_string(),
            path: path.to_path_buf(),
            read_at: Utc::now(),
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }
}

impl fmt::Debug for WebIdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebIdentityToken")
            .field("value", &"** redacted **")
            .field("path", &self.path)
            .field("read_at", &self.read_at)
            .finish()
    }
}

/// Where the token lives; every [`TokenSource::load`] hits the file again
#[derive(Debug, Clone)]
pub struct TokenSource {
    path: PathBuf,
}

impl TokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> BrokerResult<WebIdentityToken> {
        WebIdentityToken::load(&self.path).await
    }
}
