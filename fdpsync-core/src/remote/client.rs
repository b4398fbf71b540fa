//! Remote data client: retries, batching, and the concurrent fetch pool.

use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::breaker::CircuitBreaker;
use super::request::{ClientIdentity, FetchRequest};
use super::retry::RetryPolicy;
use super::transport::{
    FormPost, HttpTransport, RawResponse, Transport, TransportError, TransportSettings,
};
use crate::domain::Isin;

/// Fetch failures, as seen by the pipeline.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("remote service unavailable after {attempts} attempt(s)")]
    RemoteUnavailable {
        attempts: u32,
        #[source]
        source: TransientCause,
    },

    #[error("remote service rejected the request with HTTP {status}: {body}")]
    Client { status: u16, body: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// True when the failure came from retry exhaustion rather than a rejection.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable { .. })
    }
}

/// The last transient cause behind a [`FetchError::RemoteUnavailable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransientCause {
    #[error("server error HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("circuit breaker open after earlier batches failed")]
    CircuitOpen,
}

/// Credential that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Everything the client needs besides the transport.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: String,
    pub identity: ClientIdentity,
    pub password: Option<Secret>,
    pub retry: RetryPolicy,
}

/// Outcome of one batch from [`RemoteClient::fetch_batches`].
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub batch_index: usize,
    pub isins: Vec<Isin>,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Posts batch requests to the data service.
///
/// Owns the transport, the request settings and the circuit breaker. The
/// breaker is reset at the start of every [`RemoteClient::fetch_batches`]
/// call, so a trip never outlives the run that caused it.
pub struct RemoteClient<T: Transport = HttpTransport> {
    transport: T,
    settings: ClientSettings,
    breaker: Arc<CircuitBreaker>,
}

impl RemoteClient<HttpTransport> {
    /// Client over a pooled HTTP connection.
    pub fn connect(
        settings: ClientSettings,
        transport: &TransportSettings,
    ) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(transport)
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        Ok(Self::with_transport(transport, settings))
    }
}

impl<T: Transport> RemoteClient<T> {
    pub fn with_transport(transport: T, settings: ClientSettings) -> Self {
        Self {
            transport,
            settings,
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    pub fn with_breaker(mut self, breaker: impl Into<Arc<CircuitBreaker>>) -> Self {
        self.breaker = breaker.into();
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Fetch the raw response body for one request.
    ///
    /// Transient failures are retried per the configured policy; a 4xx status
    /// or an unbuildable request fails immediately.
    pub fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        if request.isins.is_empty() {
            return Err(FetchError::InvalidRequest(
                "request carries no identifiers".into(),
            ));
        }

        let fields = request.form_fields(&self.settings.identity);
        let user = Some(self.settings.identity.user.as_str()).filter(|u| !u.is_empty());
        let post = FormPost {
            url: &self.settings.endpoint,
            fields: &fields,
            user,
            password: self.settings.password.as_ref().map(Secret::expose),
        };

        let policy = self.settings.retry;
        let mut last_cause = TransientCause::CircuitOpen;

        for attempt in 0..policy.max_attempts() {
            if attempt > 0 {
                let delay = policy.delay_for(attempt);
                warn!(
                    event = "remote.retry",
                    batch = request.batch_index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    cause = %last_cause,
                    "retrying batch"
                );
                sleep(delay);
            }

            if !self.breaker.is_allowed() {
                // Still `CircuitOpen` when no attempt has been made.
                return Err(FetchError::RemoteUnavailable {
                    attempts: attempt,
                    source: last_cause,
                });
            }

            debug!(
                event = "remote.request",
                batch = request.batch_index,
                isins = request.isins.len(),
                attempt,
                "posting request"
            );

            match self.transport.post_form(&post) {
                Ok(response) => match classify(response) {
                    Outcome::Body(body) => {
                        self.breaker.record_success();
                        return Ok(body);
                    }
                    Outcome::Retry(cause) => last_cause = cause,
                    Outcome::Fatal(err) => return Err(err),
                },
                Err(e) if e.is_transient() => last_cause = TransientCause::Transport(e),
                Err(e) => return Err(FetchError::InvalidRequest(e.to_string())),
            }
        }

        self.breaker.record_failure();
        Err(FetchError::RemoteUnavailable {
            attempts: policy.max_attempts(),
            source: last_cause,
        })
    }

    /// Fetch every request, up to `concurrency` at a time on a private pool.
    ///
    /// Results come back in request order whatever order they complete in;
    /// `on_complete` is called from the worker threads as each one finishes.
    /// The circuit breaker starts closed for every call.
    pub fn fetch_batches<F>(
        &self,
        requests: &[FetchRequest],
        concurrency: usize,
        on_complete: F,
    ) -> Vec<BatchResponse>
    where
        F: Fn(&BatchResponse) + Sync,
    {
        self.breaker.reset();
        let run_one = |request: &FetchRequest| {
            let response = BatchResponse {
                batch_index: request.batch_index,
                isins: request.isins.clone(),
                result: self.fetch(request),
            };
            on_complete(&response);
            response
        };

        let pool = if concurrency > 1 && requests.len() > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(concurrency.min(requests.len()))
                .thread_name(|i| format!("fdpsync-fetch-{i}"))
                .build()
                .map_err(|e| warn!(error = %e, "fetch pool unavailable, fetching sequentially"))
                .ok()
        } else {
            None
        };

        match pool {
            Some(pool) => pool.install(|| requests.par_iter().map(run_one).collect()),
            None => requests.iter().map(run_one).collect(),
        }
    }
}

enum Outcome {
    Body(Vec<u8>),
    Retry(TransientCause),
    Fatal(FetchError),
}

fn classify(response: RawResponse) -> Outcome {
    if response.is_success() {
        Outcome::Body(response.body)
    } else if response.is_server_error() {
        Outcome::Retry(TransientCause::Status {
            status: response.status,
            body: response.snippet(),
        })
    } else {
        Outcome::Fatal(FetchError::Client {
            status: response.status,
            body: response.snippet(),
        })
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
