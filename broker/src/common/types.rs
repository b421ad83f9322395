use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

const PROVIDER_NAME: &str = "WebIdentitySts";

/// Why a set of credential fields could not become a [`Credential`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("expiration {0} is not in the future")]
    AlreadyExpired(DateTime<Utc>),
}

/// Temporary tenant credentials issued by the STS.
///
/// Immutable once built: a refresh produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

impl Credential {
    /// Validates that all four fields are present and that the expiration lies
    /// in the future.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let access_key_id = access_key_id.into();
        let secret_access_key = secret_access_key.into();
        let session_token = session_token.into();

        if access_key_id.trim().is_empty() {
            return Err(CredentialError::MissingField("AccessKeyId"));
        }
        if secret_access_key.trim().is_empty() {
            return Err(CredentialError::MissingField("SecretAccessKey"));
        }
        if session_token.trim().is_empty() {
            return Err(CredentialError::MissingField("SessionToken"));
        }
        if expiration <= Utc::now() {
            return Err(CredentialError::AlreadyExpired(expiration));
        }

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
            expiration,
        })
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// Validity left at `now`; negative once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expiration - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl From<&Credential> for aws_credential_types::Credentials {
    fn from(credential: &Credential) -> Self {
        aws_credential_types::Credentials::new(
            credential.access_key_id.clone(),
            credential.secret_access_key.clone(),
            Some(credential.session_token.clone()),
            Some(SystemTime::from(credential.expiration)),
            PROVIDER_NAME,
        )
    }
}
