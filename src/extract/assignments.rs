//! Assignment list extraction and the consumer-side ordering helpers.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::node_text;

/// Portal-local timestamp format used in availability windows.
const WINDOW_FORMAT: &str = "%Y/%m/%d %H:%M";

/// One assignment row. The availability window is kept as portal-local
/// text (`YYYY/MM/DD HH:MM`); interpreting or converting it is a caller
/// concern. Identity is the `(subject, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub subject: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub available_from: String,
    #[serde(default)]
    pub available_until: String,
}

/// Parse the assignment-listing view. Each table row becomes one record;
/// rows with unparseable or missing date cells are still emitted with the
/// raw text preserved so downstream urgency classification can apply its
/// own fallback.
pub fn parse_assignment_list(body: &str) -> Vec<Assignment> {
    let document = Html::parse_document(body);
    let (Ok(rows), Ok(cells)) = (
        Selector::parse("table.assignment-list tr"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let mut assignments = Vec::new();
    for row in document.select(&rows) {
        let values: Vec<String> = row.select(&cells).map(node_text).collect();
        if values.is_empty() {
            // Header rows carry <th> cells only.
            continue;
        }
        let field = |index: usize| values.get(index).cloned().unwrap_or_default();
        let subject = field(0);
        let name = field(1);
        if subject.is_empty() && name.is_empty() {
            continue;
        }
        assignments.push(Assignment {
            subject,
            name,
            category: field(2),
            available_from: field(3),
            available_until: field(4),
        });
    }

    if assignments.is_empty() {
        log::warn!("assignment page matched no rows; returning empty list");
    }
    assignments
}

/// Drop duplicate assignments by their `(subject, name)` identity,
/// first-seen wins. Listing pages can overlap, so the same logical
/// assignment may arrive with differing availability windows; which copy
/// survives is documented policy, not an accident.
pub fn dedup_assignments(assignments: Vec<Assignment>) -> Vec<Assignment> {
    let mut seen = HashSet::new();
    assignments
        .into_iter()
        .filter(|assignment| seen.insert((assignment.subject.clone(), assignment.name.clone())))
        .collect()
}

/// Sort ascending by availability-window end. Windows that don't parse as
/// `YYYY/MM/DD HH:MM` (including empty ones) sort last, which downstream
/// treats as "no deadline pressure".
pub fn sort_assignments_by_deadline(assignments: &mut [Assignment]) {
    assignments.sort_by(|a, b| window_key(&a.available_until).cmp(&window_key(&b.available_until)));
}

fn window_key(raw: &str) -> (u8, String) {
    let trimmed = raw.trim();
    match NaiveDateTime::parse_from_str(trimmed, WINDOW_FORMAT) {
        Ok(_) => (0, trimmed.to_string()),
        Err(_) => (1, trimmed.to_string()),
    }
}
