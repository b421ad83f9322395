use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::{BrokerError, BrokerResult};

const SSL_CERT_FILE: &str = "SSL_CERT_FILE";

/// Where distributions keep their CA bundle
const SYSTEM_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/cert.pem",
    "/etc/ssl/ca-bundle.pem",
];

/// Ordered set of trusted certificate authorities.
///
/// Keeps the PEM text it was built from next to the decoded certificates so an
/// untouched bundle stays byte-identical to its source. Appending only ever
/// adds roots.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct TrustBundle {
    pem: Vec<u8>,
    certificates: Vec<Vec<u8>>,
}

impl TrustBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses every `CERTIFICATE` block; other PEM items are ignored
    pub fn from_pem(pem: &[u8]) -> Result<Self, String> {
        let certificates = rustls_pemfile::certs(&mut &pem[..])
            .map_err(|e| format!("invalid PEM data: {}", e))?;
        Ok(Self {
            pem: pem.to_vec(),
            certificates,
        })
    }

    /// Loads a PEM file that must hold at least one certificate
    pub fn from_pem_file(path: &Path) -> BrokerResult<Self> {
        let origin = path.display().to_string();
        let pem = std::fs::read(path).map_err(|e| BrokerError::certificate_load(&origin, e.to_string()))?;
        let bundle = Self::from_pem(&pem).map_err(|e| BrokerError::certificate_load(&origin, e))?;
        if bundle.is_empty() {
            return Err(BrokerError::certificate_load(origin, "no certificates found"));
        }
        Ok(bundle)
    }

    /// The host's CA bundle.
    ///
    /// Uses `explicit` when given, then `SSL_CERT_FILE`, then the first readable
    /// well-known path. Falls back to an empty bundle, in which case only the
    /// platform's built-in roots are trusted.
    pub fn system_default(explicit: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => std::env::var_os(SSL_CERT_FILE)
                .map(PathBuf::from)
                .into_iter()
                .chain(SYSTEM_BUNDLE_PATHS.iter().map(PathBuf::from))
                .collect(),
        };

        for candidate in candidates {
            match Self::from_pem_file(&candidate) {
                Ok(bundle) => {
                    debug!(
                        "Loaded {} system certificates from {}",
                        bundle.len(),
                        candidate.display()
                    );
                    return bundle;
                }
                Err(e) => debug!("Skipping system bundle candidate: {}", e),
            }
        }

        info!("No system CA bundle found, relying on platform roots");
        Self::empty()
    }

    /// Returns a copy holding this bundle's roots followed by `other`'s
    pub fn appended(&self, other: &TrustBundle) -> TrustBundle {
        let mut pem = self.pem.clone();
        if !pem.is_empty() && !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&other.pem);

        let mut certificates = self.certificates.clone();
        certificates.extend(other.certificates.iter().cloned());

        TrustBundle { pem, certificates }
    }

    /// DER encoded certificates in bundle order
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    pub fn as_pem(&self) -> &[u8] {
        &self.pem
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("certificates", &self.certificates.len())
            .finish()
    }
}

/// Adds the certificates from `custom_ca` to a copy of `system`.
///
/// Without a custom CA the system bundle comes back unchanged.
pub fn build(system: &TrustBundle, custom_ca: Option<&Path>) -> BrokerResult<TrustBundle> {
    match custom_ca {
        None => Ok(system.clone()),
        Some(path) => {
            let custom = TrustBundle::from_pem_file(path)?;
            info!(
                "Trusting {} additional certificate(s) from {}",
                custom.len(),
                path.display()
            );
            Ok(system.appended(&custom))
        }
    }
}

/// Like [`build`], but a custom CA that cannot be loaded only costs a warning
pub fn build_or_default(system: &TrustBundle, custom_ca: Option<&Path>) -> TrustBundle {
    match build(system, custom_ca) {
        Ok(bundle) => bundle,
        Err(e) => {
            warn!("{}; continuing with the system trust bundle", e);
            system.clone()
        }
    }
}
