use hyper::header::{CONTENT_TYPE, HOST};
use hyper::http::HeaderValue;
use hyper::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::common::{BrokerError, BrokerResult, Credential, Endpoint, ServiceError};
use crate::transport::{run_cancellable, HttpRequest, HttpResponse, HttpTransport};

pub mod request;
pub mod response;

pub use request::{AssumeRoleRequest, AssumeRoleRequestBuilder};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Error codes meaning the STS did not accept the identity token
const SIGNATURE_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidIdentityToken",
    "ExpiredToken",
    "InvalidClientGrantsToken",
];

/// Exchanges a web identity token for tenant credentials.
///
/// Posts to `sts_endpoint` with `tenant_namespace` appended as a path segment,
/// which selects the tenant's keys on the operator STS. No retries happen here;
/// wrap `transport` in a [`RetryingTransport`](crate::transport::RetryingTransport)
/// for that.
#[instrument(
    skip_all,
    fields(endpoint = %sts_endpoint, tenant = %tenant_namespace, session = %request.session_name())
)]
pub async fn assume_role_with_web_identity(
    sts_endpoint: &Endpoint,
    tenant_namespace: &str,
    request: &AssumeRoleRequest,
    transport: &dyn HttpTransport,
) -> BrokerResult<Credential> {
    let tenant_namespace = tenant_namespace.trim();
    if tenant_namespace.is_empty() {
        return Err(BrokerError::invalid_request("tenant namespace must not be empty"));
    }

    let target = sts_endpoint.join_segment(tenant_namespace);
    let endpoint = target.to_string();

    let mut http_request = HttpRequest::new(Method::POST, target.uri("", "")?);
    http_request
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    http_request.headers.insert(
        HOST,
        HeaderValue::from_str(&target.host_header())
            .map_err(|e| BrokerError::invalid_request(format!("invalid host: {}", e)))?,
    );
    http_request.body = request.form_body()?.into();

    debug!("Requesting credentials for {} seconds", request.duration_seconds());
    let response = transport.send(http_request).await?;

    if !response.status.is_success() {
        let err = classify_failure(&endpoint, &response);
        warn!("❌ STS rejected the exchange: {}", err);
        return Err(err);
    }

    let credential = response::parse_credentials(&endpoint, &response.body_text())?;
    info!(
        "✅ Obtained credentials {} valid until {}",
        credential.access_key_id(),
        credential.expiration()
    );
    Ok(credential)
}

/// Maps a non-2xx STS answer onto the error taxonomy
fn classify_failure(endpoint: &str, response: &HttpResponse) -> BrokerError {
    let status = response.status.as_u16();
    let parsed = ServiceError::parse(&response.body_text());
    let request_id = parsed
        .as_ref()
        .and_then(|e| e.request_id.clone())
        .or_else(|| response.request_id());
    let (code, message) = match parsed {
        Some(service_error) => (service_error.code, service_error.message),
        None => (
            response
                .status
                .canonical_reason()
                .unwrap_or("UnknownError")
                .replace(' ', ""),
            response.body_text().chars().take(256).collect(),
        ),
    };

    if status == 401 || status == 403 || SIGNATURE_ERROR_CODES.contains(&code.as_str()) {
        BrokerError::Signature {
            endpoint: endpoint.to_string(),
            status,
            code,
            message,
            request_id,
        }
    } else if response.status.is_client_error() {
        BrokerError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            code,
            message,
            request_id,
        }
    } else {
        BrokerError::Transport {
            endpoint: endpoint.to_string(),
            status: Some(status),
            attempts: 1,
            retryable: false,
            message: format!("{}: {}", code, message),
        }
    }
}

/// STS client bound to a transport, with timeout and cancellation applied
#[derive(Debug, Clone)]
pub struct StsClient {
    transport: Arc<dyn HttpTransport>,
    timeout: Option<Duration>,
}

impl StsClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn assume_role_with_web_identity(
        &self,
        sts_endpoint: &Endpoint,
        tenant_namespace: &str,
        request: &AssumeRoleRequest,
        cancel: &CancellationToken,
    ) -> BrokerResult<Credential> {
        run_cancellable(
            "AssumeRoleWithWebIdentity",
            &sts_endpoint.to_string(),
            self.timeout,
            cancel,
            assume_role_with_web_identity(
                sts_endpoint,
                tenant_namespace,
                request,
                self.transport.as_ref(),
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockReply, MockServer, ScriptedTransport};
    use crate::token::WebIdentityToken;
    use crate::transport::{HyperTransport, RetryPolicy, RetryingTransport};
    use crate::tls::{TlsVerification, TrustBundle};
    use chrono::{SecondsFormat, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn success_body(expiration: chrono::DateTime<Utc>) -> String {
        format!(
            r#"<AssumeRoleWithWebIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
<AssumeRoleWithWebIdentityResult><Credentials>
<AccessKeyId>AK1</AccessKeyId><SecretAccessKey>SK1</SecretAccessKey>
<SessionToken>TOK1</SessionToken><Expiration>{}</Expiration>
</Credentials></AssumeRoleWithWebIdentityResult></AssumeRoleWithWebIdentityResponse>"#,
            expiration.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    fn error_body(code: &str, message: &str) -> String {
        format!(
            "<ErrorResponse><Error><Type>Sender</Type><Code>{}</Code><Message>{}</Message></Error><RequestId>REQ42</RequestId></ErrorResponse>",
            code, message
        )
    }

    async fn request() -> AssumeRoleRequest {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc.def.ghi\n").unwrap();
        let token = WebIdentityToken::load(file.path()).await.unwrap();
        AssumeRoleRequest::builder()
            .duration_seconds(3600)
            .build(token)
            .unwrap()
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("https://sts.minio-operator.svc:4223/sts").unwrap()
    }

    #[tokio::test]
    async fn test_exchange_against_mock_sts() {
        let expires = Utc::now() + chrono::Duration::seconds(3600);
        let body = success_body(expires);
        let server = MockServer::start(move |_| MockReply::new(200, body.clone())).await;

        let transport = HyperTransport::new(&TrustBundle::empty(), TlsVerification::Verify).unwrap();
        let credential = assume_role_with_web_identity(
            &server.endpoint("/sts"),
            "tenant-1",
            &request().await,
            &transport,
        )
        .await
        .unwrap();

        assert_eq!(credential.access_key_id(), "AK1");
        assert_eq!(credential.secret_access_key(), "SK1");
        assert_eq!(credential.session_token(), "TOK1");
        assert_eq!(credential.expiration().timestamp(), expires.timestamp());

        let recorded = &server.requests()[0];
        assert_eq!(recorded.method, "POST");
        assert_eq!(recorded.path, "/sts/tenant-1");
        assert_eq!(recorded.header("content-type"), Some(FORM_CONTENT_TYPE));
        let form = recorded.form();
        assert_eq!(form["Action"], "AssumeRoleWithWebIdentity");
        assert_eq!(form["WebIdentityToken"], "abc.def.ghi");
        assert_eq!(form["DurationSeconds"], "3600");
    }

    #[tokio::test]
    async fn test_tenant_segment_is_encoded() {
        let transport = ScriptedTransport::statuses(&[500]);
        let _ = assume_role_with_web_identity(&endpoint(), "tenant/../admin", &request().await, &transport)
            .await;
        let sent = transport.sent();
        assert_eq!(sent[0].uri.path(), "/sts/tenant%2F..%2Fadmin");
    }

    #[tokio::test]
    async fn test_empty_tenant_is_rejected_before_io() {
        let transport = ScriptedTransport::statuses(&[]);
        let err = assume_role_with_web_identity(&endpoint(), "  ", &request().await, &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidRequest { .. }));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_is_signature_error() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::response(
            400,
            &error_body("InvalidIdentityToken", "token signature mismatch"),
        ))]);
        let err = assume_role_with_web_identity(&endpoint(), "tenant-1", &request().await, &transport)
            .await
            .unwrap_err();
        match err {
            BrokerError::Signature {
                status,
                code,
                request_id,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "InvalidIdentityToken");
                assert_eq!(request_id.as_deref(), Some("REQ42"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forbidden_without_body_is_signature_error() {
        let transport = ScriptedTransport::statuses(&[403]);
        let err = assume_role_with_web_identity(&endpoint(), "tenant-1", &request().await, &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Signature { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_parameter_errors_are_rejected() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::response(
            400,
            &error_body("PackedPolicyTooLarge", "policy too large"),
        ))]);
        let err = assume_role_with_web_identity(&endpoint(), "tenant-1", &request().await, &transport)
            .await
            .unwrap_err();
        match err {
            BrokerError::Rejected { code, .. } => assert_eq!(code, "PackedPolicyTooLarge"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_without_credentials_is_malformed() {
        let transport = ScriptedTransport::new(vec![Ok(ScriptedTransport::response(
            200,
            "<AssumeRoleWithWebIdentityResponse/>",
        ))]);
        let err = assume_role_with_web_identity(&endpoint(), "tenant-1", &request().await, &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_as_transport() {
        let inner = ScriptedTransport::statuses(&[503, 503, 503, 503, 503, 503]);
        let transport = RetryingTransport::new(
            inner.clone(),
            RetryPolicy::new(
                5,
                Duration::from_millis(1),
                Duration::from_millis(2),
                2.0,
                vec![500, 502, 503, 504],
            ),
        );
        let err = assume_role_with_web_identity(&endpoint(), "tenant-1", &request().await, &transport)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Transport {
                status: Some(503),
                attempts: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_client_cancellation() {
        let server = MockServer::start(|_| MockReply::new(200, "")).await;
        let transport = HyperTransport::new(&TrustBundle::empty(), TlsVerification::Verify).unwrap();
        let client = StsClient::new(Arc::new(transport));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .assume_role_with_web_identity(&server.endpoint("/sts"), "tenant-1", &request().await, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled { .. }));
    }
}
