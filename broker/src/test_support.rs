//! In-process fakes for the STS and the object store

use hyper::body::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, HeaderMap, Request, Response, Server, StatusCode, Uri};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::common::{BrokerError, BrokerResult, Endpoint};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// A request as the mock server saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn form(&self) -> HashMap<String, String> {
        serde_urlencoded::from_str(&self.body).unwrap()
    }

    pub fn query_params(&self) -> HashMap<String, String> {
        self.query
            .as_deref()
            .map(|q| serde_urlencoded::from_str(q).unwrap())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct MockReply {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
}

impl MockReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Handler = dyn Fn(&RecordedRequest) -> MockReply + Send + Sync;

/// hyper server on an ephemeral loopback port, shut down on drop
pub struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let make_svc = make_service_fn(move |_conn| {
            let handler = handler.clone();
            let recorded = recorded.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let handler = handler.clone();
                    let recorded = recorded.clone();
                    async move {
                        let request = record(req).await;
                        let reply = handler(&request);
                        recorded.lock().unwrap().push(request);

                        let mut builder = Response::builder().status(reply.status);
                        for (name, value) in &reply.headers {
                            builder = builder.header(name.as_str(), value.as_str());
                        }
                        Ok::<_, Infallible>(builder.body(Body::from(reply.body)).unwrap())
                    }
                }))
            }
        });

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.with_graceful_shutdown(async {
            rx.await.ok();
        }));

        Self {
            addr,
            requests,
            shutdown: Some(tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn endpoint(&self, path: &str) -> Endpoint {
        Endpoint::parse(&format!("{}{}", self.base_url(), path)).unwrap()
    }

    pub fn uri(&self, path_and_query: &str) -> Uri {
        format!("{}{}", self.base_url(), path_and_query).parse().unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn record(req: Request<Body>) -> RecordedRequest {
    let (parts, body) = req.into_parts();
    let body = hyper::body::to_bytes(body).await.unwrap_or_default();
    RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Transport that replays a fixed script of outcomes and counts attempts
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<BrokerResult<HttpResponse>>>>,
    sent: Arc<Mutex<Vec<HttpRequest>>>,
    attempts: Arc<AtomicU32>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<BrokerResult<HttpResponse>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Self::default()
        }
    }

    pub fn statuses(statuses: &[u16]) -> Self {
        Self::new(
            statuses
                .iter()
                .map(|status| Ok(Self::response(*status, "")))
                .collect(),
        )
    }

    pub fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let target = request.target();
        self.sent.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BrokerError::transport(target, "script exhausted")))
    }
}
