//! The wire seam: one form POST in, one status and body out.
//!
//! Retry policy lives above this trait, so a transport makes exactly one
//! attempt per call. Tests substitute a scripted transport.

use std::time::Duration;
use thiserror::Error;

/// A form-encoded POST to send.
#[derive(Debug, Clone, Copy)]
pub struct FormPost<'a> {
    pub url: &'a str,
    pub fields: &'a [(&'static str, String)],
    pub user: Option<&'a str>,
    pub password: Option<&'a str>,
}

/// Status and full body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Leading part of the body as text, for error messages.
    pub fn snippet(&self) -> String {
        const MAX: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        match text.char_indices().nth(MAX) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        }
    }
}

/// Failures below the HTTP status line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection interrupted: {0}")]
    Interrupted(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

/// One attempt at a form POST.
pub trait Transport: Send + Sync {
    fn post_form(&self, post: &FormPost<'_>) -> Result<RawResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post_form(&self, post: &FormPost<'_>) -> Result<RawResponse, TransportError> {
        (**self).post_form(post)
    }
}

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub max_idle_per_host: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("fdpsync/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
            max_idle_per_host: 4,
        }
    }
}

/// HTTP transport over one pooled blocking client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .gzip(true)
            .pool_max_idle_per_host(settings.max_idle_per_host);

        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| TransportError::InvalidRequest(format!("proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post_form(&self, post: &FormPost<'_>) -> Result<RawResponse, TransportError> {
        let mut request = self
            .client
            .post(post.url)
            .header(reqwest::header::ACCEPT, "application/xml, text/xml")
            .form(post.fields);
        if let Some(user) = post.user {
            request = request.basic_auth(user, post.password);
        }

        let response = request.send().map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(classify)?;
        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Interrupted(e.to_string())
    }
}
