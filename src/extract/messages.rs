//! Announcement message extraction.

use std::collections::HashSet;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::node_text;

/// One announcement, paired with the display name of the course it was
/// posted under. Duplicate bodies under the same course are
/// indistinguishable on the portal and collapse to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseMessage {
    pub course: String,
    pub body: String,
}

/// Parse a course's announcement view. The course display name comes from
/// the course metadata extractor; this page only carries bodies.
pub fn parse_message_list(course_name: &str, body: &str) -> Vec<CourseMessage> {
    let document = Html::parse_document(body);
    let Ok(entries) = Selector::parse(".message-list .message-body") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut messages = Vec::new();
    for entry in document.select(&entries) {
        let text = node_text(entry);
        if text.is_empty() || !seen.insert(text.clone()) {
            continue;
        }
        messages.push(CourseMessage {
            course: course_name.to_string(),
            body: text,
        });
    }

    if messages.is_empty() {
        log::warn!("message page for {course_name} matched no entries; returning empty list");
    }
    messages
}
