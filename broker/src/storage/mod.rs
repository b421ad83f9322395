use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, SharedHttpClient};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use hyper::client::HttpConnector;
use hyper_tls::HttpsConnector;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::common::{BrokerError, BrokerResult, Credential, Endpoint};
use crate::transport::{run_cancellable, RetryPolicy};

pub mod model;

pub use model::{Bucket, ListObjectsOptions, ObjectInfo};

pub const DEFAULT_REGION: &str = "us-east-1";

const AMZ_REQUEST_ID: &str = "x-amz-request-id";

/// Error codes meaning the store did not accept the credentials
const SIGNATURE_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];

/// Smithy HTTP client over the same TLS connector the STS exchange uses
#[allow(deprecated)]
pub fn http_client(connector: HttpsConnector<HttpConnector>) -> SharedHttpClient {
    aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder::new().build(connector)
}

/// Builds [`StorageClient`]s; no network I/O happens until the client is used
#[derive(Debug, Clone)]
pub struct StorageClientFactory {
    region: String,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl Default for StorageClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl StorageClientFactory {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// S3 client for `endpoint` signing every request with `credential`,
    /// path-style addressing
    pub fn build(&self, endpoint: &Endpoint, credential: Credential, http_client: SharedHttpClient) -> StorageClient {
        debug!(
            "Building storage client for {} with credentials {}",
            endpoint,
            credential.access_key_id()
        );

        let retry_config = RetryConfig::standard()
            .with_max_attempts(self.retry.max_attempts())
            .with_initial_backoff(self.retry.initial_delay())
            .with_max_backoff(self.retry.max_delay());

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .endpoint_url(endpoint.to_string())
            .force_path_style(true)
            .credentials_provider(Credentials::from(&credential))
            .retry_config(retry_config)
            .http_client(http_client)
            .build();

        StorageClient {
            endpoint: endpoint.clone(),
            credential,
            region: self.region.clone(),
            timeout: self.timeout,
            client: aws_sdk_s3::Client::from_conf(config),
        }
    }
}

/// S3 client bound to one endpoint and one [`Credential`]
#[derive(Clone)]
pub struct StorageClient {
    endpoint: Endpoint,
    credential: Credential,
    region: String,
    timeout: Option<Duration>,
    client: aws_sdk_s3::Client,
}

impl StorageClient {
    /// Follows the endpoint scheme
    pub fn is_secure(&self) -> bool {
        self.endpoint.is_secure()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// The underlying SDK client, for operations not wrapped here
    pub fn sdk(&self) -> &aws_sdk_s3::Client {
        &self.client
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn list_buckets(&self, cancel: &CancellationToken) -> BrokerResult<Vec<Bucket>> {
        let endpoint = self.endpoint.to_string();
        let output = run_cancellable("ListBuckets", &endpoint, self.timeout, cancel, async {
            self.client
                .list_buckets()
                .send()
                .await
                .map_err(|e| classify_failure(&endpoint, e))
        })
        .await?;

        let buckets: Vec<Bucket> = output.buckets().iter().filter_map(Bucket::from_sdk).collect();
        debug!("Listed {} bucket(s)", buckets.len());
        Ok(buckets)
    }

    /// ListObjectsV2, following continuation tokens until the listing is complete
    #[instrument(skip_all, fields(endpoint = %self.endpoint, bucket = %bucket))]
    pub async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        cancel: &CancellationToken,
    ) -> BrokerResult<Vec<ObjectInfo>> {
        let bucket = bucket.trim();
        if bucket.is_empty() {
            return Err(BrokerError::invalid_request("bucket name must not be empty"));
        }
        let endpoint = self.endpoint.join_segment(bucket).to_string();
        let max_keys = options.max_keys.and_then(|keys| i32::try_from(keys).ok());

        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(options.prefix.clone())
                .set_delimiter(options.delimiter())
                .set_max_keys(max_keys)
                .set_continuation_token(continuation.clone());

            let page = run_cancellable("ListObjectsV2", &endpoint, self.timeout, cancel, async {
                request.send().await.map_err(|e| classify_failure(&endpoint, e))
            })
            .await?;

            objects.extend(page.contents().iter().filter_map(ObjectInfo::from_object));
            objects.extend(page.common_prefixes().iter().filter_map(ObjectInfo::from_prefix));

            let next = match page.is_truncated() {
                Some(true) => page.next_continuation_token().map(str::to_string),
                _ => None,
            };
            match next {
                Some(next) if continuation.as_deref() == Some(next.as_str()) => {
                    return Err(BrokerError::malformed_response(
                        endpoint,
                        "listing returned the same continuation token twice",
                    ));
                }
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!("Listed {} object(s) in {}", objects.len(), bucket);
        Ok(objects)
    }
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential)
            .field("region", &self.region)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn classify_failure<E>(endpoint: &str, err: SdkError<E, HttpResponse>) -> BrokerError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    let raw = match &err {
        SdkError::ServiceError(service) => service.raw(),
        SdkError::ResponseError(_) => {
            return BrokerError::malformed_response(endpoint, message);
        }
        SdkError::ConstructionFailure(_) => return BrokerError::invalid_request(message),
        // Dispatch failures and timeouts were already retried by the client
        _ => return BrokerError::transport(endpoint, message),
    };

    let status = raw.status().as_u16();
    let request_id = raw.headers().get(AMZ_REQUEST_ID).map(str::to_string);
    let code = err
        .code()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Http{}", status));
    let service_message = err.message().unwrap_or_default().to_string();

    if status == 401 || status == 403 || SIGNATURE_ERROR_CODES.contains(&code.as_str()) {
        BrokerError::Signature {
            endpoint: endpoint.to_string(),
            status,
            code,
            message: service_message,
            request_id,
        }
    } else if (400..500).contains(&status) {
        BrokerError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            code,
            message: service_message,
            request_id,
        }
    } else {
        BrokerError::Transport {
            endpoint: endpoint.to_string(),
            status: Some(status),
            attempts: 1,
            retryable: false,
            message: format!("{}: {}", code, service_message),
        }
    }
}
