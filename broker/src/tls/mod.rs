use hyper::client::HttpConnector;
use hyper_tls::HttpsConnector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{BrokerError, BrokerResult};

pub mod bundle;

pub use bundle::TrustBundle;

/// Server certificate verification policy for outbound TLS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVerification {
    /// Verify against the platform roots plus the trust bundle
    #[default]
    Verify,
    /// Accept any certificate and hostname. Development endpoints only.
    InsecureSkipVerify,
}

/// Builds an HTTPS-capable connector trusting the platform roots plus every
/// certificate in `bundle`
pub fn https_connector(
    bundle: &TrustBundle,
    verification: TlsVerification,
) -> BrokerResult<HttpsConnector<HttpConnector>> {
    let mut builder = native_tls::TlsConnector::builder();

    for (index, der) in bundle.certificates().iter().enumerate() {
        let certificate = native_tls::Certificate::from_der(der).map_err(|e| {
            BrokerError::certificate_load(
                "trust bundle",
                format!("certificate #{} is not a valid X.509 certificate: {}", index, e),
            )
        })?;
        builder.add_root_certificate(certificate);
    }

    if verification == TlsVerification::InsecureSkipVerify {
        warn!("⚠️  TLS certificate verification is disabled - this should only be used in development!");
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }

    let tls = builder
        .build()
        .map_err(|e| BrokerError::certificate_load("trust bundle", format!("failed to initialize TLS: {}", e)))?;

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    debug!(
        "Built HTTPS connector with {} additional root certificate(s)",
        bundle.len()
    );
    Ok(HttpsConnector::from((
        http,
        tokio_native_tls::TlsConnector::from(tls),
    )))
}
