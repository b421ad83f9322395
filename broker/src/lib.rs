//! Exchanges a projected Kubernetes service account token for temporary
//! tenant credentials through the MinIO Operator STS and builds S3 clients
//! scoped to those credentials.

pub mod broker;
pub mod common;
pub mod credentials;
pub mod storage;
pub mod sts;
pub mod tls;
pub mod token;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use broker::WebIdentityBroker;
pub use common::{BrokerConfig, BrokerError, BrokerResult, Credential, Endpoint};
pub use credentials::{Clock, CredentialHolder, CredentialSource, SystemClock};
pub use storage::{StorageClient, StorageClientFactory};
pub use sts::{assume_role_with_web_identity, AssumeRoleRequest, StsClient};
pub use tls::{TlsVerification, TrustBundle};
pub use token::WebIdentityToken;
