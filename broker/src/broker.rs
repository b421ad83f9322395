use aws_sdk_s3::config::SharedHttpClient;
use hyper::client::HttpConnector;
use hyper_tls::HttpsConnector;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::{BrokerConfig, BrokerError, BrokerResult, Credential, ValidatedConfig};
use crate::credentials::{CredentialHolder, CredentialSource, WebIdentityCredentialSource};
use crate::storage::{self, StorageClient, StorageClientFactory};
use crate::sts::{AssumeRoleRequestBuilder, StsClient};
use crate::tls::{self, TrustBundle};
use crate::token::TokenSource;
use crate::transport::{HttpTransport, HyperTransport, RetryPolicy, RetryingTransport};

/// Wires a [`BrokerConfig`] into the token source, the STS client, the
/// credential holder and the storage client factory
#[derive(Debug)]
pub struct WebIdentityBroker {
    config: ValidatedConfig,
    source: Arc<WebIdentityCredentialSource>,
    holder: CredentialHolder,
    storage_factory: StorageClientFactory,
    storage_http: SharedHttpClient,
}

impl WebIdentityBroker {
    /// Validates `config` and builds one TLS connector from the system bundle
    /// plus the custom CA, if one is configured and loadable. The STS exchange
    /// and the storage clients share it.
    pub fn new(config: BrokerConfig) -> BrokerResult<Self> {
        let validated = config.validate()?;

        let system = TrustBundle::system_default(validated.system_ca_file.as_deref());
        let bundle = tls::bundle::build_or_default(&system, validated.custom_ca_file.as_deref());
        let connector = connector_for(&bundle, &system, &validated)?;

        let transport = RetryingTransport::new(
            HyperTransport::from_connector(connector.clone()),
            RetryPolicy::from(&validated.retry),
        );
        Self::assemble(validated, Arc::new(transport), storage::http_client(connector))
    }

    /// Like [`new`](Self::new) but over caller-supplied STS and storage clients
    pub fn with_clients(
        config: BrokerConfig,
        transport: Arc<dyn HttpTransport>,
        storage_http: SharedHttpClient,
    ) -> BrokerResult<Self> {
        Self::assemble(config.validate()?, transport, storage_http)
    }

    fn assemble(
        config: ValidatedConfig,
        transport: Arc<dyn HttpTransport>,
        storage_http: SharedHttpClient,
    ) -> BrokerResult<Self> {
        let mut request = AssumeRoleRequestBuilder::new()
            .role_arn(config.role_arn.clone())
            .duration_seconds(config.duration_seconds);
        if let Some(session_name) = &config.session_name {
            request = request.session_name(session_name.clone());
        }
        if let Some(policy_file) = &config.policy_file {
            request = request.policy(read_policy(policy_file)?);
        }

        let sts_client = StsClient::new(transport).with_timeout(config.request_timeout);
        let source = Arc::new(WebIdentityCredentialSource::new(
            TokenSource::new(&config.token_file),
            sts_client,
            config.sts_endpoint.clone(),
            config.tenant_namespace.clone(),
            request,
        ));

        let holder = CredentialHolder::builder(source.clone())
            .refresh_margin(config.refresh_margin)
            .build();

        let storage_factory = StorageClientFactory::new(config.region.clone())
            .with_timeout(config.request_timeout)
            .with_retry(RetryPolicy::from(&config.retry));

        info!(
            "🔐 Broker ready for tenant {} via {}",
            config.tenant_namespace, config.sts_endpoint
        );

        Ok(Self {
            config,
            source,
            holder,
            storage_factory,
            storage_http,
        })
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Performs one exchange with a freshly read token, bypassing the holder
    pub async fn fetch_credential(&self, cancel: &CancellationToken) -> BrokerResult<Credential> {
        self.source.fetch(cancel).await
    }

    /// Shared, self-refreshing credential cache backed by this broker's STS exchange
    pub fn credential_holder(&self) -> CredentialHolder {
        self.holder.clone()
    }

    /// Client for the configured storage endpoint signing with `credential`
    pub fn storage_client(&self, credential: Credential) -> StorageClient {
        self.storage_factory.build(
            &self.config.storage_endpoint,
            credential,
            self.storage_http.clone(),
        )
    }
}

/// Connector over `bundle`, falling back to the bare system bundle when the
/// merged one cannot seed it
fn connector_for(
    bundle: &TrustBundle,
    system: &TrustBundle,
    config: &ValidatedConfig,
) -> BrokerResult<HttpsConnector<HttpConnector>> {
    let verification = config.tls.verification;
    match tls::https_connector(bundle, verification) {
        Ok(connector) => Ok(connector),
        Err(e) if bundle != system => {
            warn!("{}; retrying with the system trust bundle", e);
            tls::https_connector(system, verification)
        }
        Err(e) => {
            warn!("{}; relying on platform roots only", e);
            tls::https_connector(&TrustBundle::empty(), verification)
        }
    }
}

fn read_policy(path: &Path) -> BrokerResult<String> {
    let policy = std::fs::read_to_string(path).map_err(|e| BrokerError::io(path, e))?;
    if policy.trim().is_empty() {
        return Err(BrokerError::invalid_request(format!(
            "policy file {} is empty",
            path.display()
        )));
    }
    Ok(policy)
}
