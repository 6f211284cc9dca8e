//! Typed record extraction from portal pages.
//!
//! Each submodule turns one portal page shape into records, tolerating
//! missing optional fields by substituting empty values. A page that does
//! not match the expected shape yields an empty result set; partial data
//! beats aborting the run for a digest tool.

pub mod assignments;
pub mod courses;
pub mod messages;

pub use assignments::{Assignment, dedup_assignments, sort_assignments_by_deadline};
pub use courses::{CourseInfo, CourseRef};
pub use messages::CourseMessage;

/// Collapsed, trimmed text content of an element. Non-breaking spaces the
/// portal scatters through table cells become plain spaces.
pub(crate) fn node_text(element: scraper::ElementRef<'_>) -> String {
    let joined = element.text().collect::<Vec<_>>().join(" ");
    joined
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
