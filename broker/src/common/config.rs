use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::endpoint::Endpoint;
use super::error::{BrokerError, BrokerResult};
use crate::tls::TlsVerification;

/// Environment variables read by the sample workloads
pub const ENV_STS_ENDPOINT: &str = "STS_ENDPOINT";
pub const ENV_STORAGE_ENDPOINT: &str = "MINIO_ENDPOINT";
pub const ENV_TENANT_NAMESPACE: &str = "TENANT_NAMESPACE";
pub const ENV_TOKEN_FILE: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";
pub const ENV_POLICY_FILE: &str = "STS_POLICY";
pub const ENV_CUSTOM_CA: &str = "KUBERNETES_CA_PATH";
pub const ENV_BUCKET: &str = "BUCKET";
pub const ENV_REGION: &str = "MINIO_REGION";
pub const ENV_ROLE_ARN: &str = "AWS_ROLE_ARN";
pub const ENV_SESSION_NAME: &str = "AWS_ROLE_SESSION_NAME";

/// Shortest and longest session the MinIO Operator STS accepts
pub const MIN_DURATION_SECONDS: u32 = 900;
pub const MAX_DURATION_SECONDS: u32 = 31_536_000;

/// Configuration for the credential broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// STS base URL, the tenant namespace is appended as a path segment
    #[serde(default)]
    pub sts_endpoint: Option<String>,

    /// S3 endpoint of the tenant
    #[serde(default)]
    pub storage_endpoint: Option<String>,

    /// Namespace of the tenant, selects the STS signing keys
    #[serde(default)]
    pub tenant_namespace: Option<String>,

    /// Projected service account token
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Session policy document sent with the exchange
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Extra certificate authority to trust (cluster CA or cert-manager CA)
    #[serde(default)]
    pub custom_ca_file: Option<PathBuf>,

    /// Replaces the discovered system bundle
    #[serde(default)]
    pub system_ca_file: Option<PathBuf>,

    /// Bucket used by the listing commands
    #[serde(default)]
    pub bucket: Option<String>,

    /// Region used for request signing
    #[serde(default = "default_region")]
    pub region: String,

    /// Role ARN; routing happens on the namespace so a placeholder is fine
    #[serde(default = "default_role_arn")]
    pub role_arn: String,

    /// Session name, generated per request when unset
    #[serde(default)]
    pub session_name: Option<String>,

    /// Requested credential lifetime in seconds
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u32,

    /// Refresh credentials once less than this many seconds remain
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    /// Per-operation timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub tls: TlsConfig,
}

/// Retry configuration for the HTTP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Statuses worth another attempt
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

/// TLS configuration for outbound connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub verification: TlsVerification,
}

/// A configuration that passed [`BrokerConfig::validate`]
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub sts_endpoint: Endpoint,
    pub storage_endpoint: Endpoint,
    pub tenant_namespace: String,
    pub token_file: PathBuf,
    pub policy_file: Option<PathBuf>,
    pub custom_ca_file: Option<PathBuf>,
    pub system_ca_file: Option<PathBuf>,
    pub bucket: Option<String>,
    pub region: String,
    pub role_arn: String,
    pub session_name: Option<String>,
    pub duration_seconds: u32,
    pub refresh_margin: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub tls: TlsConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            sts_endpoint: None,
            storage_endpoint: None,
            tenant_namespace: None,
            token_file: None,
            policy_file: None,
            custom_ca_file: None,
            system_ca_file: None,
            bucket: None,
            region: default_region(),
            role_arn: default_role_arn(),
            session_name: None,
            duration_seconds: default_duration_seconds(),
            refresh_margin_secs: default_refresh_margin(),
            request_timeout_secs: default_request_timeout(),
            retry: RetryConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl BrokerConfig {
    /// Reads the variables the sample workloads are deployed with
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self {
            sts_endpoint: non_empty(ENV_STS_ENDPOINT),
            storage_endpoint: non_empty(ENV_STORAGE_ENDPOINT),
            tenant_namespace: non_empty(ENV_TENANT_NAMESPACE),
            token_file: non_empty(ENV_TOKEN_FILE).map(PathBuf::from),
            policy_file: non_empty(ENV_POLICY_FILE).map(PathBuf::from),
            custom_ca_file: non_empty(ENV_CUSTOM_CA).map(PathBuf::from),
            bucket: non_empty(ENV_BUCKET),
            session_name: non_empty(ENV_SESSION_NAME),
            ..Self::default()
        };
        if let Some(region) = non_empty(ENV_REGION) {
            config.region = region;
        }
        if let Some(role_arn) = non_empty(ENV_ROLE_ARN) {
            config.role_arn = role_arn;
        }
        config
    }

    pub fn from_yaml_str(yaml: &str) -> BrokerResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BrokerError::config(vec![format!("invalid YAML configuration: {}", e)]))
    }

    pub fn from_yaml_file(path: &Path) -> BrokerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| BrokerError::io(path, e))?;
        Self::from_yaml_str(&contents)
    }

    /// Checks every value at once and reports all problems in one error
    pub fn validate(&self) -> BrokerResult<ValidatedConfig> {
        let mut problems = Vec::new();

        let sts_endpoint = required_endpoint(&self.sts_endpoint, "sts_endpoint", &mut problems);
        let storage_endpoint =
            required_endpoint(&self.storage_endpoint, "storage_endpoint", &mut problems);

        let tenant_namespace = match self.tenant_namespace.as_deref().map(str::trim) {
            Some(namespace) if is_valid_namespace(namespace) => Some(namespace.to_string()),
            Some(namespace) => {
                problems.push(format!(
                    "tenant_namespace '{}' is not a valid Kubernetes namespace",
                    namespace
                ));
                None
            }
            None => {
                problems.push("tenant_namespace is required".to_string());
                None
            }
        };

        let token_file = match &self.token_file {
            Some(path) if !path.as_os_str().is_empty() => Some(path.clone()),
            _ => {
                problems.push("token_file is required".to_string());
                None
            }
        };

        if self.role_arn.trim().is_empty() {
            problems.push("role_arn must not be empty".to_string());
        }
        if self.region.trim().is_empty() {
            problems.push("region must not be empty".to_string());
        }
        if !(MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&self.duration_seconds) {
            problems.push(format!(
                "duration_seconds {} is outside {}..={}",
                self.duration_seconds, MIN_DURATION_SECONDS, MAX_DURATION_SECONDS
            ));
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be greater than zero".to_string());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            problems.push("retry.backoff_multiplier must be at least 1.0".to_string());
        }

        match (sts_endpoint, storage_endpoint, tenant_namespace, token_file) {
            (Some(sts_endpoint), Some(storage_endpoint), Some(tenant_namespace), Some(token_file))
                if problems.is_empty() =>
            {
                Ok(ValidatedConfig {
                    sts_endpoint,
                    storage_endpoint,
                    tenant_namespace,
                    token_file,
                    policy_file: self.policy_file.clone(),
                    custom_ca_file: self.custom_ca_file.clone(),
                    system_ca_file: self.system_ca_file.clone(),
                    bucket: self.bucket.clone().filter(|b| !b.trim().is_empty()),
                    region: self.region.trim().to_string(),
                    role_arn: self.role_arn.trim().to_string(),
                    session_name: self.session_name.clone(),
                    duration_seconds: self.duration_seconds,
                    refresh_margin: Duration::from_secs(self.refresh_margin_secs),
                    request_timeout: Duration::from_secs(self.request_timeout_secs),
                    retry: self.retry.clone(),
                    tls: self.tls.clone(),
                })
            }
            _ => Err(BrokerError::config(problems)),
        }
    }
}

fn required_endpoint(
    raw: &Option<String>,
    name: &str,
    problems: &mut Vec<String>,
) -> Option<Endpoint> {
    match raw.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => match Endpoint::parse(value) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                problems.push(format!("{}: {}", name, e));
                None
            }
        },
        None => {
            problems.push(format!("{} is required", name));
            None
        }
    }
}

/// DNS-1123 label, the format Kubernetes requires for namespaces
fn is_valid_namespace(namespace: &str) -> bool {
    static DNS_LABEL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid DNS-1123 pattern"));
    namespace.len() <= 63 && DNS_LABEL.is_match(namespace)
}

// Default value functions
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_role_arn() -> String {
    "arn:minio:iam:::role/dummy-internal".to_string()
}
fn default_duration_seconds() -> u32 {
    86_400
}
fn default_refresh_margin() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay() -> u64 {
    200
}
fn default_max_delay() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_retryable_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> BrokerConfig {
        BrokerConfig {
            sts_endpoint: Some("https://sts.minio-operator.svc.cluster.local:4223/sts".to_string()),
            storage_endpoint: Some("https://minio.tenant-1.svc.cluster.local".to_string()),
            tenant_namespace: Some("tenant-1".to_string()),
            token_file: Some(PathBuf::from("/var/run/secrets/tokens/sts-token")),
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn test_validate_complete_config() {
        let validated = complete().validate().unwrap();
        assert_eq!(validated.tenant_namespace, "tenant-1");
        assert!(validated.storage_endpoint.is_secure());
        assert_eq!(validated.duration_seconds, 86_400);
        assert_eq!(validated.refresh_margin, Duration::from_secs(60));
        assert_eq!(validated.retry.max_attempts, 5);
        assert_eq!(validated.tls.verification, TlsVerification::Verify);
    }

    #[test]
    fn test_validate_aggregates_missing_values() {
        let err = BrokerConfig::default().validate().unwrap_err();
        match err {
            BrokerError::Config { problems } => {
                assert_eq!(problems.len(), 4);
                assert!(problems.iter().any(|p| p.contains("sts_endpoint")));
                assert!(problems.iter().any(|p| p.contains("storage_endpoint")));
                assert!(problems.iter().any(|p| p.contains("tenant_namespace")));
                assert!(problems.iter().any(|p| p.contains("token_file")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_namespace_format() {
        assert!(is_valid_namespace("tenant-1"));
        assert!(is_valid_namespace("a"));
        assert!(!is_valid_namespace("-tenant"));
        assert!(!is_valid_namespace("tenant-"));
        assert!(!is_valid_namespace("Tenant"));
        assert!(!is_valid_namespace(&"a".repeat(64)));
        assert!(is_valid_namespace(&"a".repeat(63)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = BrokerConfig {
            tenant_namespace: Some("Tenant_1".to_string()),
            storage_endpoint: Some("ftp://minio".to_string()),
            duration_seconds: 60,
            ..complete()
        };
        match config.validate().unwrap_err() {
            BrokerError::Config { problems } => {
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.contains("Tenant_1")));
                assert!(problems.iter().any(|p| p.contains("ftp")));
                assert!(problems.iter().any(|p| p.contains("duration_seconds")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_lookup_reads_sample_variables() {
        let env: HashMap<&str, &str> = [
            (ENV_STS_ENDPOINT, "https://sts.local:4223/sts"),
            (ENV_STORAGE_ENDPOINT, "https://minio.local"),
            (ENV_TENANT_NAMESPACE, "tenant-1"),
            (ENV_TOKEN_FILE, "/token"),
            (ENV_CUSTOM_CA, "/ca.crt"),
            (ENV_BUCKET, "data"),
            (ENV_REGION, "eu-west-1"),
            (ENV_ROLE_ARN, ""),
        ]
        .into_iter()
        .collect();

        let config = BrokerConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.sts_endpoint.as_deref(), Some("https://sts.local:4223/sts"));
        assert_eq!(config.custom_ca_file, Some(PathBuf::from("/ca.crt")));
        assert_eq!(config.bucket.as_deref(), Some("data"));
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.role_arn, "arn:minio:iam:::role/dummy-internal");
        assert!(config.policy_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
sts_endpoint: https://sts.local:4223/sts
storage_endpoint: http://minio.local:9000
tenant_namespace: tenant-1
token_file: /token
retry:
  max_attempts: 3
tls:
  verification: insecure_skip_verify
"#;
        let config = BrokerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.retry.retryable_statuses, vec![500, 502, 503, 504]);
        assert_eq!(config.tls.verification, TlsVerification::InsecureSkipVerify);
        assert_eq!(config.duration_seconds, 86_400);
        assert!(!config.validate().unwrap().storage_endpoint.is_secure());
    }
}
