//! HTTP transport abstraction.
//!
//! `ocipkg::distribution::client::Client` holds both a redirect-following
//! `reqwest::Client` and a synchronous `ureq::Agent`, choosing between them
//! per call site. This crate needs one async transport that can run *with*
//! or *without* following redirects (blob `locate()` must see the bare
//! redirect, per spec.md §4.4), so that split becomes an explicit capability
//! on a single trait instead of two client types.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use url::Url;

const USER_AGENT: &str = concat!("ocidist/", env!("CARGO_PKG_VERSION"));

/// A request to be sent through a [`Transport`].
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Whether the client should follow redirects itself, or hand the raw
    /// 3xx response back for the caller to inspect (blob `locate()`).
    pub follow_redirects: bool,
    /// Opaque key a wrapping [`Transport`] may use to select/cache
    /// credentials (spec.md §6's `tenantId`). The base transport ignores it.
    pub tenant_id: Option<String>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            headers: Vec::new(),
            body: None,
            follow_redirects: true,
            tenant_id: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// The capability set the rest of the crate needs from an HTTP client:
/// send a request, optionally without following redirects, optionally
/// scoped to a tenant/auth partition.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// A plain transport performing no authentication: two `reqwest::Client`
/// instances, one that follows redirects and one that doesn't, matching the
/// teacher's two-client split but generalized to async/both directions.
pub struct HttpTransport {
    following: reqwest::Client,
    non_following: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let following = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        let non_following = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(HttpTransport {
            following,
            non_following,
        })
    }

    fn build(&self, request: &Request) -> RequestBuilder {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.non_following
        };
        let mut builder = client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new().expect("reqwest client construction should not fail")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let builder = self.build(&request);
        builder.send().await.map_err(Error::Transport)
    }
}

/// An illustrative decorator that injects a static bearer token into every
/// request it forwards. This stands in for the token-exchange client the
/// teacher's `distribution::auth` module implements in full; real deployments
/// would instead wrap [`Transport`] with one that probes `WWW-Authenticate`
/// and exchanges it for short-lived tokens per tenant.
pub struct BearerTransport<T> {
    inner: T,
    token: String,
}

impl<T: Transport> BearerTransport<T> {
    pub fn new(inner: T, token: impl Into<String>) -> Self {
        BearerTransport {
            inner,
            token: token.into(),
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for BearerTransport<T> {
    async fn send(&self, mut request: Request) -> Result<Response> {
        request = request.header("Authorization", format!("Bearer {}", self.token));
        self.inner.send(request).await
    }
}

/// Maps a non-2xx/3xx response into the appropriate [`Error`] variant,
/// decoding the registry error body when present.
pub async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(Error::registry_error_body(status, &body))
}

pub fn is_success_or_redirect(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}
