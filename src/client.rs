//! High level client facade.
//!
//! Composes the session manager, the request gateway, and the extractors
//! into the operations consumed by external callers (CLI, report
//! generator). Callers only ever see typed records and the error kinds
//! below; raw HTML and session state never cross this boundary.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::extract::{Assignment, CourseInfo, CourseMessage, CourseRef, assignments, courses, messages};
use crate::pages::{self, PageKind};
use crate::session::{Credentials, SessionManager, SessionPhase, TokenStore};
use crate::transport::{ExhaustedRetries, Gateway, PortalHttp, PortalResponse, ReqwestPortalHttp, RetryPolicy};

/// Result alias used across the facade.
pub type WebClassResult<T> = Result<T, WebClassError>;

/// Errors that cross the facade boundary. Parse failures never show up
/// here: an authenticated page of unexpected shape degrades to an empty
/// result set at the extractor, with one exception for the login form
/// itself, which surfaces as `Authentication`.
#[derive(Debug, Error)]
pub enum WebClassError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("session expired and silent re-login was rejected")]
    SessionExpired,
    #[error("{0}")]
    Transport(#[from] ExhaustedRetries),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Client configuration used by the builder.
#[derive(Debug, Clone)]
pub struct WebClassConfig {
    /// Per-request timeout; an elapsed timeout counts as a retryable
    /// transport failure.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for WebClassConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(400),
        }
    }
}

/// Fluent builder for [`WebClassClient`].
pub struct WebClassClientBuilder {
    base_url: String,
    credentials: Option<Credentials>,
    config: WebClassConfig,
    http: Option<Arc<dyn PortalHttp>>,
}

impl WebClassClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
            config: WebClassConfig::default(),
            http: None,
        }
    }

    pub fn credentials(mut self, identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            identifier: identifier.into(),
            secret: secret.into(),
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Swap the transport, primarily so tests can script the portal.
    pub fn with_http(mut self, http: Arc<dyn PortalHttp>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> WebClassResult<WebClassClient> {
        let mut base_url = self.base_url;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url)?;

        let credentials = self.credentials.ok_or_else(|| {
            WebClassError::Authentication("no credentials configured".into())
        })?;

        let http: Arc<dyn PortalHttp> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestPortalHttp::new(self.config.timeout)?),
        };

        let store = Arc::new(RwLock::new(TokenStore::default()));
        let gateway = Gateway::new(
            http,
            store.clone(),
            RetryPolicy {
                max_attempts: self.config.max_attempts,
                backoff: self.config.backoff,
            },
        );
        let session = SessionManager::new(base.clone(), credentials, store);

        Ok(WebClassClient {
            base,
            gateway,
            session: Mutex::new(session),
        })
    }
}

/// Authenticated portal client. One instance drives one portal session;
/// operations are serialised through the session mutex because the token
/// and cookie are single-writer resources.
pub struct WebClassClient {
    base: Url,
    gateway: Gateway,
    session: Mutex<SessionManager>,
}

impl WebClassClient {
    pub fn builder(base_url: impl Into<String>) -> WebClassClientBuilder {
        WebClassClientBuilder::new(base_url)
    }

    /// Authenticate with the configured credentials. `Ok(false)` means the
    /// portal rejected the login; see [`crate::session::SessionManager::login`].
    pub async fn login(&self) -> WebClassResult<bool> {
        let mut session = self.session.lock().await;
        session.login(&self.gateway).await
    }

    /// Best-effort logout; always leaves the session unauthenticated.
    /// Returns whether the logout call itself went through.
    pub async fn logout(&self) -> bool {
        let mut session = self.session.lock().await;
        session.logout(&self.gateway).await
    }

    /// Current phase of the session state machine.
    pub async fn session_phase(&self) -> SessionPhase {
        self.session.lock().await.phase()
    }

    /// Courses visible to the account, in portal presentation order.
    pub async fn list_courses(&self) -> WebClassResult<Vec<CourseRef>> {
        let url = self.page_url("index.php", &[])?;
        let body = self.fetch_data_page(&url).await?;
        Ok(courses::parse_course_list(&body))
    }

    /// Overview metadata for one course.
    pub async fn course_info(&self, course_id: &str) -> WebClassResult<CourseInfo> {
        let url = self.page_url(&format!("course.php/{course_id}/"), &[])?;
        let body = self.fetch_data_page(&url).await?;
        Ok(courses::parse_course_info(course_id, &body))
    }

    /// Display name for one course.
    pub async fn course_name(&self, course_id: &str) -> WebClassResult<String> {
        Ok(self.course_info(course_id).await?.name)
    }

    /// Assignments listed as of the reference date. Availability windows
    /// stay portal-local text; see [`Assignment`].
    pub async fn assignments(&self, as_of: NaiveDate) -> WebClassResult<Vec<Assignment>> {
        let url = self.page_url(
            "assignment_list.php",
            &[("date", as_of.format("%Y-%m-%d").to_string())],
        )?;
        let body = self.fetch_data_page(&url).await?;
        Ok(assignments::parse_assignment_list(&body))
    }

    /// Announcements for one course on or after the reference date, paired
    /// with the course display name. One request per course; callers fan
    /// this out over [`Self::list_courses`].
    pub async fn course_messages(
        &self,
        course_id: &str,
        since: NaiveDate,
    ) -> WebClassResult<Vec<CourseMessage>> {
        let course_name = self.course_name(course_id).await?;
        let url = self.page_url(
            "message_list.php",
            &[
                ("id", course_id.to_string()),
                ("date", since.format("%Y-%m-%d").to_string()),
            ],
        )?;
        let body = self.fetch_data_page(&url).await?;
        Ok(messages::parse_message_list(&course_name, &body))
    }

    /// Fetch an authenticated page, recovering from session expiry.
    ///
    /// A response in the login-page shape triggers exactly one silent
    /// re-login and one retry of the original request; a login page on the
    /// retry is a hard [`WebClassError::SessionExpired`]. A refreshed
    /// anti-forgery token embedded in the page is handed back to the
    /// session manager.
    async fn fetch_data_page(&self, url: &Url) -> WebClassResult<String> {
        let response = self.gateway.get(url).await?;

        if page_kind(&response) != PageKind::Login {
            self.adopt_refreshed_token(&response.body).await;
            return Ok(response.body);
        }

        {
            let mut session = self.session.lock().await;
            session.reauthenticate(&self.gateway).await?;
        }

        let retried = self.gateway.get(url).await?;
        if page_kind(&retried) == PageKind::Login {
            return Err(WebClassError::SessionExpired);
        }
        self.adopt_refreshed_token(&retried.body).await;
        Ok(retried.body)
    }

    async fn adopt_refreshed_token(&self, body: &str) {
        if let Some((name, value)) = pages::find_embedded_token(body) {
            let session = self.session.lock().await;
            session.refresh_token(name, value);
        }
    }

    fn page_url(&self, path: &str, query: &[(&str, String)]) -> WebClassResult<Url> {
        let mut url = self.base.join(path)?;
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }
}

/// Shape tag for a gateway response; a redirect back to the login endpoint
/// counts as the login-page shape even without a body.
fn page_kind(response: &PortalResponse) -> PageKind {
    if response.redirects_to_login() {
        return PageKind::Login;
    }
    pages::classify(&response.body)
}
