use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::common::{BrokerResult, Credential, Endpoint};
use crate::sts::{AssumeRoleRequestBuilder, StsClient};
use crate::token::TokenSource;

pub mod holder;

pub use holder::CredentialHolder;

/// Produces a fresh [`Credential`] on every call
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    async fn fetch(&self, cancel: &CancellationToken) -> BrokerResult<Credential>;
}

/// Wall clock, replaceable in tests
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reads the projected token and exchanges it with the tenant's STS.
///
/// The token is read again for every fetch so kubelet rotations are picked up.
#[derive(Debug, Clone)]
pub struct WebIdentityCredentialSource {
    token_source: TokenSource,
    sts_client: StsClient,
    sts_endpoint: Endpoint,
    tenant_namespace: String,
    request: AssumeRoleRequestBuilder,
}

impl WebIdentityCredentialSource {
    pub fn new(
        token_source: TokenSource,
        sts_client: StsClient,
        sts_endpoint: Endpoint,
        tenant_namespace: impl Into<String>,
        request: AssumeRoleRequestBuilder,
    ) -> Self {
        Self {
            token_source,
            sts_client,
            sts_endpoint,
            tenant_namespace: tenant_namespace.into(),
            request,
        }
    }
}

#[async_trait]
impl CredentialSource for WebIdentityCredentialSource {
    async fn fetch(&self, cancel: &CancellationToken) -> BrokerResult<Credential> {
        let token = self.token_source.load().await?;
        let request = self.request.build(token)?;
        self.sts_client
            .assume_role_with_web_identity(&self.sts_endpoint, &self.tenant_namespace, &request, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BrokerError;
    use crate::test_support::ScriptedTransport;
    use std::path::Path;
    use std::sync::Arc;

    fn source(token_path: &Path, transport: ScriptedTransport) -> WebIdentityCredentialSource {
        WebIdentityCredentialSource::new(
            TokenSource::new(token_path),
            StsClient::new(Arc::new(transport)),
            Endpoint::parse("https://sts.local:4223/sts").unwrap(),
            "tenant-1",
            AssumeRoleRequestBuilder::new(),
        )
    }

    #[tokio::test]
    async fn test_empty_token_skips_network() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let transport = ScriptedTransport::statuses(&[200]);
        let err = source(file.path(), transport.clone())
            .fetch(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::EmptyToken { .. }));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn test_fetch_sends_current_token() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "rotated.jwt.value\n").unwrap();
        let transport = ScriptedTransport::statuses(&[403]);

        let err = source(file.path(), transport.clone())
            .fetch(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Signature { .. }));

        let sent = transport.sent();
        let form: std::collections::HashMap<String, String> =
            serde_urlencoded::from_bytes(&sent[0].body).unwrap();
        assert_eq!(form["WebIdentityToken"], "rotated.jwt.value");
    }
}
