//! Portal transport layer.
//!
//! Provides the `PortalHttp` seam over the concrete HTTP client plus the
//! [`Gateway`], the single place where the session cookie and anti-forgery
//! token are attached to outbound requests and where transport-level
//! failures are classified as retryable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header};
use reqwest::{Client, redirect::Policy};
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use crate::session::TokenStore;

/// Transport-level failure (timeout, connection reset, protocol error)
/// reported by a [`PortalHttp`] implementation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Surfaced once the gateway has used up its retry budget.
#[derive(Debug, Clone, Error)]
#[error("transport failure after {attempts} attempts: {source}")]
pub struct ExhaustedRetries {
    pub attempts: u32,
    pub source: TransportError,
}

/// Raw portal response handed to the page classifier and extractors.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub url: Url,
}

impl PortalResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Redirect target, when the response is a redirect.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(header::LOCATION)?.to_str().ok()
    }

    /// Whether the portal is bouncing this request back to its login page.
    /// Anchored on the path segment so a target merely mentioning login in
    /// its query string does not count.
    pub fn redirects_to_login(&self) -> bool {
        self.is_redirect()
            && self.location().is_some_and(|target| {
                target
                    .split(['?', '#'])
                    .next()
                    .is_some_and(|path| path.ends_with("login.php"))
            })
    }

    /// First `name=value` pair of the `Set-Cookie` header, with cookie
    /// attributes stripped.
    pub fn session_cookie(&self) -> Option<String> {
        let raw = self.headers.get(header::SET_COOKIE)?.to_str().ok()?;
        let pair = raw.split(';').next()?;
        Some(pair.trim().to_string())
    }
}

/// HTTP seam between the gateway and the concrete transport, so tests can
/// drive the client against a scripted portal.
#[async_trait]
pub trait PortalHttp: Send + Sync {
    async fn get(&self, url: &Url, headers: &HeaderMap)
        -> Result<PortalResponse, TransportError>;

    async fn post_form(
        &self,
        url: &Url,
        headers: &HeaderMap,
        fields: &HashMap<String, String>,
    ) -> Result<PortalResponse, TransportError>;
}

/// Reqwest-backed portal transport.
///
/// Redirects are disabled so login redirects stay observable to the session
/// manager, and the cookie is threaded explicitly by the gateway instead of
/// a built-in cookie store. Connection keep-alive is configured here and
/// nowhere else.
pub struct ReqwestPortalHttp {
    client: Client,
}

impl ReqwestPortalHttp {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .pool_max_idle_per_host(2)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PortalHttp for ReqwestPortalHttp {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<PortalResponse, TransportError> {
        let response = self
            .client
            .get(url.as_str())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        to_portal_response(response).await
    }

    async fn post_form(
        &self,
        url: &Url,
        headers: &HeaderMap,
        fields: &HashMap<String, String>,
    ) -> Result<PortalResponse, TransportError> {
        let response = self
            .client
            .post(url.as_str())
            .headers(headers.clone())
            .form(fields)
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        to_portal_response(response).await
    }
}

async fn to_portal_response(response: reqwest::Response) -> Result<PortalResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|err| TransportError(err.to_string()))?;
    Ok(PortalResponse {
        status,
        headers,
        body,
        url,
    })
}

/// Bounded retry budget applied to transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(400),
        }
    }
}

/// Issues portal requests carrying the current session cookie and, for form
/// posts and authenticated page fetches, the live anti-forgery token. The
/// gateway performs no parsing; it only retries transient transport
/// failures with a short linear backoff.
pub struct Gateway {
    http: Arc<dyn PortalHttp>,
    store: Arc<RwLock<TokenStore>>,
    retry: RetryPolicy,
}

impl Gateway {
    pub fn new(http: Arc<dyn PortalHttp>, store: Arc<RwLock<TokenStore>>, retry: RetryPolicy) -> Self {
        let retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        Self { http, store, retry }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts
    }

    pub async fn get(&self, url: &Url) -> Result<PortalResponse, ExhaustedRetries> {
        let url = self.with_token(url);
        let headers = self.auth_headers();
        let mut last: Option<TransportError> = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.http.get(&url, &headers).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    log::warn!(
                        "GET {} failed (attempt {attempt}/{}): {err}",
                        url.path(),
                        self.retry.max_attempts
                    );
                    last = Some(err);
                    if attempt < self.retry.max_attempts {
                        sleep(self.retry.backoff * attempt).await;
                    }
                }
            }
        }

        Err(ExhaustedRetries {
            attempts: self.retry.max_attempts,
            source: last.unwrap_or_else(|| TransportError("no attempt was made".into())),
        })
    }

    /// Form post with the live anti-forgery token merged into the fields.
    pub async fn post_form(
        &self,
        url: &Url,
        mut fields: HashMap<String, String>,
    ) -> Result<PortalResponse, ExhaustedRetries> {
        if let Some((name, value)) = self.current_token() {
            fields.insert(name, value);
        }
        let headers = self.auth_headers();
        let mut last: Option<TransportError> = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.http.post_form(url, &headers, &fields).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    log::warn!(
                        "POST {} failed (attempt {attempt}/{}): {err}",
                        url.path(),
                        self.retry.max_attempts
                    );
                    last = Some(err);
                    if attempt < self.retry.max_attempts {
                        sleep(self.retry.backoff * attempt).await;
                    }
                }
            }
        }

        Err(ExhaustedRetries {
            attempts: self.retry.max_attempts,
            source: last.unwrap_or_else(|| TransportError("no attempt was made".into())),
        })
    }

    fn current_token(&self) -> Option<(String, String)> {
        self.store.read().ok().and_then(|store| store.token())
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = self.store.read().ok().and_then(|store| store.cookie())
            && let Ok(value) = HeaderValue::from_str(&cookie)
        {
            headers.insert(header::COOKIE, value);
        }
        headers
    }

    /// The portal expects the anti-forgery value on authenticated page
    /// fetches as well, carried as a query parameter.
    fn with_token(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if let Some((name, value)) = self.current_token() {
            url.query_pairs_mut().append_pair(&name, &value);
        }
        url
    }
}
