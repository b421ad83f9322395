use async_trait::async_trait;
use hyper::body::{Bytes, HttpBody};
use hyper::client::HttpConnector;
use hyper::header::CONTENT_LENGTH;
use hyper::{Body, Client, HeaderMap, Method, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::common::{BrokerError, BrokerResult};
use crate::tls::{self, TlsVerification, TrustBundle};

pub mod retry;

pub use retry::{RetryPolicy, RetryingTransport};

const AMZ_REQUEST_ID: &str = "x-amz-request-id";

/// Largest response body buffered before the request is abandoned
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// A fully buffered outbound request that can be replayed on retry
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Scheme, authority and path, without the query string
    pub fn target(&self) -> String {
        match (self.uri.scheme_str(), self.uri.authority()) {
            (Some(scheme), Some(authority)) => {
                format!("{}://{}{}", scheme, authority, self.uri.path())
            }
            _ => self.uri.path().to_string(),
        }
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn request_id(&self) -> Option<String> {
        self.headers
            .get(AMZ_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

/// Sends requests to the STS and the object store
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Send a request and buffer the whole response
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse>;
}

/// hyper client over a native-tls connector built from a [`TrustBundle`]
#[derive(Clone)]
pub struct HyperTransport {
    http_client: Client<HttpsConnector<HttpConnector>>,
    max_response_bytes: usize,
}

impl HyperTransport {
    pub fn new(bundle: &TrustBundle, verification: TlsVerification) -> BrokerResult<Self> {
        let connector = tls::https_connector(bundle, verification)?;
        Ok(Self::from_connector(connector))
    }

    pub fn from_connector(connector: HttpsConnector<HttpConnector>) -> Self {
        Self {
            http_client: Client::builder().build::<_, Body>(connector),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    async fn read_body(&self, target: &str, headers: &HeaderMap, mut body: Body) -> BrokerResult<Bytes> {
        let limit = self.max_response_bytes;
        let too_large = || BrokerError::transport(target, format!("response body exceeds {} bytes", limit));

        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if declared.map_or(false, |length| length > limit) {
            return Err(too_large());
        }

        let mut buffer = Vec::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(|e| {
                BrokerError::connection(target, format!("failed to read response body: {}", e))
            })?;
            if buffer.len() + chunk.len() > limit {
                return Err(too_large());
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buffer))
    }
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    #[instrument(skip(self, request), fields(method = %request.method, target = %request.target()))]
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
        let target = request.target();

        let mut request_builder = Request::builder()
            .method(request.method)
            .uri(request.uri);
        for (name, value) in request.headers.iter() {
            request_builder = request_builder.header(name, value);
        }
        let outbound = request_builder
            .body(Body::from(request.body))
            .map_err(|e| BrokerError::invalid_request(format!("failed to build request: {}", e)))?;

        let response = self.http_client.request(outbound).await.map_err(|e| {
            if is_dropped_connection(&e) {
                BrokerError::connection(&target, e.to_string())
            } else {
                BrokerError::transport(&target, e.to_string())
            }
        })?;

        let (parts, body) = response.into_parts();
        let body = self.read_body(&target, &parts.headers, body).await?;

        debug!("Received {} ({} bytes)", parts.status, body.len());

        Ok(HttpResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

/// Whether the connection went away before a response arrived. TLS failures
/// and everything else are fatal since replaying them fails the same way.
fn is_dropped_connection(error: &hyper::Error) -> bool {
    if error.is_incomplete_message() || error.is_closed() {
        return true;
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<native_tls::Error>().is_some() {
            return false;
        }
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_error.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            );
        }
        source = cause.source();
    }
    false
}

/// Runs a network operation under an optional timeout and a cancellation token.
///
/// Cancellation drops the in-flight future and yields [`BrokerError::Cancelled`];
/// running out of time yields [`BrokerError::Transport`].
pub async fn run_cancellable<T, F>(
    operation: &str,
    endpoint: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    future: F,
) -> BrokerResult<T>
where
    F: Future<Output = BrokerResult<T>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::transport(
                    endpoint,
                    format!("{} timed out after {:?}", operation, limit),
                )),
            },
            None => future.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BrokerError::cancelled(operation)),
        result = bounded => result,
    }
}
