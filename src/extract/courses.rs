//! Course list and course overview extraction.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::node_text;

/// A course as listed on the portal's course-list view. Identity is the
/// id; the order of a parsed list matches portal presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: String,
    pub name: String,
}

/// Metadata scraped from a course's overview page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Parse the course-list view into course references, in presentation
/// order. Course links look like `…/course.php/<id>/…`.
pub fn parse_course_list(body: &str) -> Vec<CourseRef> {
    let document = Html::parse_document(body);
    let Ok(links) = Selector::parse(r#"a[href*="course.php/"]"#) else {
        return Vec::new();
    };

    let mut courses: Vec<CourseRef> = Vec::new();
    for link in document.select(&links) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(id) = course_id_from_href(href) else {
            continue;
        };
        if courses.iter().any(|course| course.id == id) {
            continue;
        }
        courses.push(CourseRef {
            id,
            name: node_text(link),
        });
    }

    if courses.is_empty() {
        log::warn!("course list page matched no course links; returning empty list");
    }
    courses
}

/// Parse a course overview page. Missing pieces degrade to empty strings.
pub fn parse_course_info(course_id: &str, body: &str) -> CourseInfo {
    let document = Html::parse_document(body);

    let name = Selector::parse("h1.course-name, h1")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(node_text))
        .unwrap_or_default();
    let description = Selector::parse(".course-description")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(node_text))
        .unwrap_or_default();

    if name.is_empty() {
        log::warn!("course {course_id} overview page carried no recognisable name");
    }

    CourseInfo {
        id: course_id.to_string(),
        name,
        description,
    }
}

fn course_id_from_href(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("course.php/")?;
    let id: String = rest
        .chars()
        .take_while(|c| *c != '/' && *c != '?')
        .collect();
    (!id.is_empty()).then_some(id)
}
