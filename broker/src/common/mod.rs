pub mod config;
pub mod endpoint;
pub mod error;
pub mod types;
pub mod xml;

// Re-export everything for easy access
pub use config::{BrokerConfig, RetryConfig, TlsConfig, ValidatedConfig};
pub use endpoint::{Endpoint, Scheme};
pub use error::{BrokerError, BrokerResult};
pub use types::{Credential, CredentialError};
pub use xml::ServiceError;
