//! Authenticated-session lifecycle.
//!
//! Owns the `UNAUTHENTICATED → AUTHENTICATING → AUTHENTICATED → EXPIRED`
//! state machine and the [`TokenStore`] holding the anti-forgery token and
//! session cookie. All mutations of the store go through the
//! [`SessionManager`]; the gateway and extractors only ever read it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use url::Url;

use crate::client::{WebClassError, WebClassResult};
use crate::pages::{self, PageKind};
use crate::transport::Gateway;

/// Form field the portal expects the account identifier in.
const USERNAME_FIELD: &str = "username";
/// Form field the portal expects the password in.
const PASSWORD_FIELD: &str = "val";

/// Login credentials, retained for the lifetime of the session so an
/// expired session can be re-established silently. Never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Current anti-forgery token and session cookie. Pure data; no validation
/// happens here. Kept separate from the session manager so a refreshed
/// token discovered inside a non-login page can be adopted without a full
/// re-login.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Option<(String, String)>,
    cookie: Option<String>,
}

impl TokenStore {
    /// `(field name, value)` pair of the live anti-forgery token.
    pub fn token(&self) -> Option<(String, String)> {
        self.token.clone()
    }

    /// The authenticated session cookie as a `name=value` pair.
    pub fn cookie(&self) -> Option<String> {
        self.cookie.clone()
    }

    /// Atomically replace both the token and the cookie.
    pub fn set(&mut self, token: Option<(String, String)>, cookie: Option<String>) {
        self.token = token;
        self.cookie = cookie;
    }

    pub fn set_token(&mut self, name: String, value: String) {
        self.token = Some((name, value));
    }

    pub fn set_cookie(&mut self, cookie: String) {
        self.cookie = Some(cookie);
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.cookie = None;
    }
}

/// Session state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

/// Owns the authentication state machine. Login scrapes the anti-forgery
/// token from the login form, submits the credentials, and stores the
/// resulting token and cookie; expiry recovery re-runs login exactly once
/// with the retained credentials.
pub struct SessionManager {
    base: Url,
    credentials: Credentials,
    store: Arc<RwLock<TokenStore>>,
    phase: SessionPhase,
}

impl SessionManager {
    pub fn new(base: Url, credentials: Credentials, store: Arc<RwLock<TokenStore>>) -> Self {
        Self {
            base,
            credentials,
            store,
            phase: SessionPhase::Unauthenticated,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Authenticate against the portal.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when the portal
    /// rejects the credentials or serves something other than its login
    /// page (maintenance notices included), so callers can branch without
    /// unwinding. A login page that carries no anti-forgery token is an
    /// [`WebClassError::Authentication`]: the form cannot be submitted at
    /// all.
    pub async fn login(&mut self, gateway: &Gateway) -> WebClassResult<bool> {
        self.phase = SessionPhase::Authenticating;

        let login_url = match self.base.join("login.php") {
            Ok(url) => url,
            Err(err) => return self.fail_login(err),
        };
        let page = match gateway.get(&login_url).await {
            Ok(page) => page,
            Err(err) => return self.fail_login(err),
        };

        if pages::classify(&page.body) != PageKind::Login {
            log::warn!("login endpoint did not serve a login page; portal down or relocated");
            self.phase = SessionPhase::Unauthenticated;
            return Ok(false);
        }

        let Some((token_field, token_value)) = pages::find_embedded_token(&page.body) else {
            self.phase = SessionPhase::Unauthenticated;
            return Err(WebClassError::Authentication(
                "login form carries no anti-forgery token".into(),
            ));
        };

        // The token and any pre-auth cookie must reach the store before the
        // post so the gateway can attach them.
        self.write_store(|store| {
            store.set_token(token_field, token_value);
            if let Some(cookie) = page.session_cookie() {
                store.set_cookie(cookie);
            }
        });

        let mut fields = HashMap::new();
        fields.insert(USERNAME_FIELD.to_string(), self.credentials.identifier.clone());
        fields.insert(PASSWORD_FIELD.to_string(), self.credentials.secret.clone());

        let response = match gateway.post_form(&login_url, fields).await {
            Ok(response) => response,
            Err(err) => return self.fail_login(err),
        };

        let accepted = (response.is_redirect() && !response.redirects_to_login())
            || pages::classify(&response.body) == PageKind::Authenticated;

        if !accepted {
            log::debug!("portal rejected login for {}", self.credentials.identifier);
            self.write_store(TokenStore::clear);
            self.phase = SessionPhase::Unauthenticated;
            return Ok(false);
        }

        // Landing pages embed a fresh token; fall back to the form token
        // already in the store when they don't.
        self.write_store(|store| {
            if let Some((name, value)) = pages::find_embedded_token(&response.body) {
                store.set_token(name, value);
            }
            if let Some(cookie) = response.session_cookie() {
                store.set_cookie(cookie);
            }
        });

        self.phase = SessionPhase::Authenticated;
        log::debug!("session established for {}", self.credentials.identifier);
        Ok(true)
    }

    /// Best-effort logout. The state always ends `Unauthenticated` and the
    /// store is cleared, whatever the portal answers; the return value only
    /// reports whether the network call went through.
    pub async fn logout(&mut self, gateway: &Gateway) -> bool {
        let result = match self.base.join("logout.php") {
            Ok(url) => gateway.get(&url).await,
            Err(err) => {
                log::warn!("logout url could not be built: {err}");
                self.write_store(TokenStore::clear);
                self.phase = SessionPhase::Unauthenticated;
                return false;
            }
        };

        self.write_store(TokenStore::clear);
        self.phase = SessionPhase::Unauthenticated;

        match result {
            Ok(response) if response.status < 400 => true,
            Ok(response) => {
                log::warn!("logout answered status {}", response.status);
                false
            }
            Err(err) => {
                log::warn!("logout request failed: {err}");
                false
            }
        }
    }

    /// Single silent re-login after the portal served a login page where
    /// data was expected. A rejected re-login surfaces as
    /// [`WebClassError::SessionExpired`]; there is no second attempt.
    pub async fn reauthenticate(&mut self, gateway: &Gateway) -> WebClassResult<()> {
        self.phase = SessionPhase::Expired;
        log::debug!("session expired; attempting silent re-login");

        if self.login(gateway).await? {
            Ok(())
        } else {
            Err(WebClassError::SessionExpired)
        }
    }

    /// Adopt a refreshed token found embedded in an already-authenticated
    /// page. Keeps the single-writer discipline: extractors report the
    /// token here instead of touching the store.
    pub fn refresh_token(&self, name: String, value: String) {
        self.write_store(|store| store.set_token(name, value));
    }

    /// Errors during login must not leave the machine resting in the
    /// transient `Authenticating` phase.
    fn fail_login<T>(&mut self, err: impl Into<WebClassError>) -> WebClassResult<T> {
        self.phase = SessionPhase::Unauthenticated;
        Err(err.into())
    }

    fn write_store(&self, f: impl FnOnce(&mut TokenStore)) {
        if let Ok(mut store) = self.store.write() {
            f(&mut store);
        }
    }
}
