use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use uuid::Uuid;

use crate::common::config::{MAX_DURATION_SECONDS, MIN_DURATION_SECONDS};
use crate::common::{BrokerError, BrokerResult};
use crate::token::WebIdentityToken;

pub const STS_API_VERSION: &str = "2011-06-15";
pub const ASSUME_ROLE_WITH_WEB_IDENTITY: &str = "AssumeRoleWithWebIdentity";

/// Placeholder role, the operator STS picks the policy from the service account
pub const DEFAULT_ROLE_ARN: &str = "arn:minio:iam:::role/dummy-internal";
pub const DEFAULT_DURATION_SECONDS: u32 = 86_400;

/// Longest compacted session policy the STS accepts
pub const MAX_POLICY_LENGTH: usize = 2048;

const SESSION_NAME_PREFIX: &str = "sts-broker";

/// Collects the exchange parameters; [`build`](Self::build) validates them
#[derive(Debug, Clone)]
pub struct AssumeRoleRequestBuilder {
    role_arn: String,
    session_name: Option<String>,
    policy: Option<String>,
    duration_seconds: u32,
}

impl Default for AssumeRoleRequestBuilder {
    fn default() -> Self {
        Self {
            role_arn: DEFAULT_ROLE_ARN.to_string(),
            session_name: None,
            policy: None,
            duration_seconds: DEFAULT_DURATION_SECONDS,
        }
    }
}

impl AssumeRoleRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = role_arn.into();
        self
    }

    /// Fixed session name; otherwise one is generated per request
    pub fn session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = Some(session_name.into());
        self
    }

    /// JSON session policy further restricting the issued credentials
    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn duration_seconds(mut self, duration_seconds: u32) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    /// Validates everything before any network I/O happens
    pub fn build(&self, token: WebIdentityToken) -> BrokerResult<AssumeRoleRequest> {
        if self.role_arn.trim().is_empty() {
            return Err(BrokerError::invalid_request("RoleArn must not be empty"));
        }

        if !(MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&self.duration_seconds) {
            return Err(BrokerError::invalid_request(format!(
                "DurationSeconds {} is outside {}..={}",
                self.duration_seconds, MIN_DURATION_SECONDS, MAX_DURATION_SECONDS
            )));
        }

        let session_name = match &self.session_name {
            Some(name) => {
                validate_session_name(name)?;
                name.clone()
            }
            None => generate_session_name(),
        };

        let policy = self.policy.as_deref().map(compact_policy).transpose()?;

        Ok(AssumeRoleRequest {
            role_arn: self.role_arn.trim().to_string(),
            session_name,
            policy,
            duration_seconds: self.duration_seconds,
            token,
        })
    }
}

/// A validated `AssumeRoleWithWebIdentity` call
#[derive(Clone)]
pub struct AssumeRoleRequest {
    role_arn: String,
    session_name: String,
    policy: Option<String>,
    duration_seconds: u32,
    token: WebIdentityToken,
}

impl AssumeRoleRequest {
    pub fn builder() -> AssumeRoleRequestBuilder {
        AssumeRoleRequestBuilder::default()
    }

    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Compacted policy document
    pub fn policy(&self) -> Option<&str> {
        self.policy.as_deref()
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn token(&self) -> &WebIdentityToken {
        &self.token
    }

    /// `application/x-www-form-urlencoded` body for the POST
    pub fn form_body(&self) -> BrokerResult<String> {
        let duration = self.duration_seconds.to_string();
        let mut fields = vec![
            ("Action", ASSUME_ROLE_WITH_WEB_IDENTITY),
            ("Version", STS_API_VERSION),
            ("RoleArn", self.role_arn.as_str()),
            ("RoleSessionName", self.session_name.as_str()),
            ("WebIdentityToken", self.token.value()),
            ("DurationSeconds", duration.as_str()),
        ];
        if let Some(policy) = &self.policy {
            fields.push(("Policy", policy.as_str()));
        }

        serde_urlencoded::to_string(&fields)
            .map_err(|e| BrokerError::invalid_request(format!("failed to encode form: {}", e)))
    }
}

impl fmt::Debug for AssumeRoleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumeRoleRequest")
            .field("role_arn", &self.role_arn)
            .field("session_name", &self.session_name)
            .field("policy", &self.policy)
            .field("duration_seconds", &self.duration_seconds)
            .field("token", &self.token)
            .finish()
    }
}

fn generate_session_name() -> String {
    format!("{}-{}", SESSION_NAME_PREFIX, Uuid::new_v4().simple())
}

/// Same character set and length limits as AWS STS
static SESSION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w+=,.@-]{2,64}$").expect("valid session name pattern"));

fn validate_session_name(name: &str) -> BrokerResult<()> {
    if SESSION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(BrokerError::invalid_request(format!(
            "RoleSessionName '{}' must be 2-64 characters of [A-Za-z0-9_+=,.@-]",
            name
        )))
    }
}

fn compact_policy(policy: &str) -> BrokerResult<String> {
    let document: serde_json::Value = serde_json::from_str(policy)
        .map_err(|e| BrokerError::invalid_request(format!("policy is not valid JSON: {}", e)))?;
    let compacted = serde_json::to_string(&document)
        .map_err(|e| BrokerError::invalid_request(format!("failed to compact policy: {}", e)))?;

    if compacted.len() > MAX_POLICY_LENGTH {
        return Err(BrokerError::invalid_request(format!(
            "policy is {} characters after compaction, the limit is {}",
            compacted.len(),
            MAX_POLICY_LENGTH
        )));
    }
    Ok(compacted)
}
