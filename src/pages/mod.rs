//! Portal page classification.
//!
//! The portal signals session expiry by shape, not status: an authenticated
//! URL can come back rendering the login page. Instead of scattering string
//! matching across the extractors, every fetched body goes through
//! [`classify`] and is tagged as one of the known page kinds. This module
//! also scrapes the anti-forgery token the portal embeds as a hidden form
//! field.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

/// Hidden form fields starting with this prefix carry the anti-forgery
/// token. The portal suffixes the name per form generation.
pub const TOKEN_FIELD_PREFIX: &str = "acs_";

/// Shape-based tag for a fetched portal page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// A page rendered for an authenticated session.
    Authenticated,
    /// The login page, either served directly or in place of requested data.
    Login,
    /// Anything else: maintenance notices, error pages, layout changes.
    Unknown,
}

static LOGIN_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        build_regex(r#"<input[^>]*type=["']?password"#),
        build_regex(r#"<form[^>]*action=["'][^"']*login"#),
    ]
});

static AUTHENTICATED_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        build_regex(r#"href=["'][^"']*logout"#),
        build_regex(r#"class=["'][^"']*course-list"#),
        build_regex(r#"class=["'][^"']*schedule-table"#),
    ]
});

/// Tag a response body by its markup shape. Login markers win over
/// authenticated ones; a login form can sit inside an otherwise ordinary
/// portal frame.
pub fn classify(body: &str) -> PageKind {
    if LOGIN_MARKERS.iter().any(|marker| marker.is_match(body)) {
        return PageKind::Login;
    }
    if AUTHENTICATED_MARKERS
        .iter()
        .any(|marker| marker.is_match(body))
    {
        return PageKind::Authenticated;
    }
    PageKind::Unknown
}

/// Scrape the anti-forgery token embedded in the page, returned as the
/// `(field name, value)` pair to submit. The portal embeds a fresh token on
/// the login page and on most pages rendered after state-changing actions.
pub fn find_embedded_token(body: &str) -> Option<(String, String)> {
    let document = Html::parse_document(body);
    let hidden = Selector::parse(r#"input[type="hidden"]"#).ok()?;

    for input in document.select(&hidden) {
        let (Some(name), Some(value)) = (input.value().attr("name"), input.value().attr("value"))
        else {
            continue;
        };
        if name.starts_with(TOKEN_FIELD_PREFIX) && !value.is_empty() {
            return Some((name.to_string(), value.to_string()));
        }
    }
    None
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid page marker regex `{}`: {}", pattern, err))
}
