use aws_credential_types::provider::{self, error::CredentialsError, future, ProvideCredentials};
use aws_credential_types::Credentials;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Clock, CredentialSource, SystemClock};
use crate::common::{BrokerError, BrokerResult, Credential};

/// Refresh once less than this much validity remains
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

type SharedRefresh = Shared<BoxFuture<'static, BrokerResult<Credential>>>;

#[derive(Default)]
struct HolderState {
    current: Option<Credential>,
    refreshing: Option<SharedRefresh>,
}

struct Inner {
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    margin: chrono::Duration,
    cancel: CancellationToken,
    state: Mutex<HolderState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HolderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, credential: &Credential) -> bool {
        credential.remaining(self.clock.now()) >= self.margin
    }
}

/// Caches a [`Credential`] and refreshes it through a [`CredentialSource`]
/// shortly before it expires.
///
/// At most one refresh runs at a time; callers arriving while it is in flight
/// await the same result. If a refresh fails while the held credential is still
/// valid, that credential keeps being served.
#[derive(Clone)]
pub struct CredentialHolder {
    inner: Arc<Inner>,
}

impl CredentialHolder {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self::builder(source).build()
    }

    pub fn builder(source: Arc<dyn CredentialSource>) -> CredentialHolderBuilder {
        CredentialHolderBuilder {
            source,
            clock: Arc::new(SystemClock),
            margin: DEFAULT_REFRESH_MARGIN,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the held credential, refreshing it first when it is within the margin
    pub async fn get(&self) -> BrokerResult<Credential> {
        let refresh = {
            let mut state = self.inner.lock();
            if let Some(current) = &state.current {
                if self.inner.is_fresh(current) {
                    return Ok(current.clone());
                }
            }

            match state.refreshing.clone() {
                Some(refresh) => refresh,
                None => {
                    let refresh = self.start_refresh();
                    state.refreshing = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Like [`get`](Self::get), but gives up with [`BrokerError::Cancelled`]
    /// once `cancel` fires. The shared refresh keeps running for other callers.
    pub async fn get_with_cancel(&self, cancel: &CancellationToken) -> BrokerResult<Credential> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BrokerError::cancelled("credential refresh")),
            result = self.get() => result,
        }
    }

    /// Last credential obtained, without triggering a refresh
    pub fn current(&self) -> Option<Credential> {
        self.inner.lock().current.clone()
    }

    /// Cancels any in-flight and future refreshes
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    fn start_refresh(&self) -> SharedRefresh {
        let inner = self.inner.clone();
        async move {
            debug!("Refreshing tenant credentials");
            let result = inner.source.fetch(&inner.cancel).await;

            let mut state = inner.lock();
            state.refreshing = None;
            match result {
                Ok(credential) => {
                    info!(
                        "🔄 Credentials refreshed, valid until {}",
                        credential.expiration()
                    );
                    state.current = Some(credential.clone());
                    Ok(credential)
                }
                Err(e) => match &state.current {
                    Some(previous) if !previous.is_expired(inner.clock.now()) => {
                        warn!(
                            "Credential refresh failed, serving credentials valid until {}: {}",
                            previous.expiration(),
                            e
                        );
                        Ok(previous.clone())
                    }
                    _ => Err(e),
                },
            }
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for CredentialHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CredentialHolder")
            .field("source", &self.inner.source)
            .field("margin", &self.inner.margin)
            .field("current", &state.current)
            .field("refreshing", &state.refreshing.is_some())
            .finish()
    }
}

impl ProvideCredentials for CredentialHolder {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(async move {
            let credential = self.get().await.map_err(CredentialsError::provider_error)?;
            provider::Result::Ok(Credentials::from(&credential))
        })
    }
}

pub struct CredentialHolderBuilder {
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    cancel: CancellationToken,
}

impl CredentialHolderBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> CredentialHolder {
        let margin = chrono::Duration::from_std(self.margin).unwrap_or_else(|_| chrono::Duration::zero());
        CredentialHolder {
            inner: Arc::new(Inner {
                source: self.source,
                clock: self.clock,
                margin,
                cancel: self.cancel,
                state: Mutex::new(HolderState::default()),
            }),
        }
    }
}
