//! # webclass-rs
//!
//! A session-aware client for the WebClass learning portal.
//!
//! The crate covers the authenticated-session lifecycle (login, logout,
//! expiry detection with a single silent re-login) and the extraction layer
//! built on top of it: course list, per-course metadata, assignments with
//! availability windows, and announcement messages, parsed out of the
//! portal's loosely structured markup into typed records.
//!
//! ## Example
//!
//! ```no_run
//! use webclass_rs::WebClassClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WebClassClient::builder("https://portal.example/webclass/")
//!         .credentials("s1234567", "hunter2")
//!         .build()?;
//!
//!     if client.login().await? {
//!         for course in client.list_courses().await? {
//!             println!("{}: {}", course.id, course.name);
//!         }
//!         client.logout().await;
//!     }
//!     Ok(())
//! }
//! ```

mod client;

pub mod extract;
pub mod pages;
pub mod session;
pub mod transport;

pub use crate::client::{
    WebClassClient,
    WebClassClientBuilder,
    WebClassConfig,
    WebClassError,
    WebClassResult,
};

pub use crate::extract::{
    Assignment,
    CourseInfo,
    CourseMessage,
    CourseRef,
    dedup_assignments,
    sort_assignments_by_deadline,
};

pub use crate::pages::PageKind;

pub use crate::session::{Credentials, SessionPhase};

pub use crate::transport::{
    ExhaustedRetries,
    PortalHttp,
    PortalResponse,
    ReqwestPortalHttp,
    RetryPolicy,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
