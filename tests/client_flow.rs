//! End-to-end client behaviour against a scripted portal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use http::{HeaderMap, header};
use url::Url;

use webclass_rs::{
    Assignment, PortalHttp, PortalResponse, SessionPhase, TransportError, WebClassClient,
    WebClassError,
};

const BASE: &str = "https://portal.example/webclass/";

#[derive(Clone, Debug)]
struct Recorded {
    method: &'static str,
    path: String,
    query: String,
    headers: HeaderMap,
    fields: HashMap<String, String>,
}

/// Portal double: responses are scripted per path and consumed in order,
/// while every request is recorded for assertions.
#[derive(Default)]
struct ScriptedPortal {
    scripts: Mutex<HashMap<String, VecDeque<Result<PortalResponse, TransportError>>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedPortal {
    fn script(&self, path: &str, response: Result<PortalResponse, TransportError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    fn next(&self, path: &str) -> Result<PortalResponse, TransportError> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| panic!("unscripted request to {path}"))
    }

    fn record(
        &self,
        method: &'static str,
        url: &Url,
        headers: &HeaderMap,
        fields: HashMap<String, String>,
    ) {
        self.requests.lock().unwrap().push(Recorded {
            method,
            path: url.path().to_string(),
            query: url.query().unwrap_or("").to_string(),
            headers: headers.clone(),
            fields,
        });
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn posts_to(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "POST" && r.path == path)
            .count()
    }
}

#[async_trait]
impl PortalHttp for ScriptedPortal {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<PortalResponse, TransportError> {
        self.record("GET", url, headers, HashMap::new());
        self.next(url.path())
    }

    async fn post_form(
        &self,
        url: &Url,
        headers: &HeaderMap,
        fields: &HashMap<String, String>,
    ) -> Result<PortalResponse, TransportError> {
        self.record("POST", url, headers, fields.clone());
        self.next(url.path())
    }
}

fn page(body: &str) -> Result<PortalResponse, TransportError> {
    Ok(PortalResponse {
        status: 200,
        headers: HeaderMap::new(),
        body: body.to_string(),
        url: Url::parse(BASE).unwrap(),
    })
}

fn redirect(location: &str, cookie: Option<&str>) -> Result<PortalResponse, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, location.parse().unwrap());
    if let Some(cookie) = cookie {
        headers.insert(header::SET_COOKIE, format!("{cookie}; Path=/").parse().unwrap());
    }
    Ok(PortalResponse {
        status: 302,
        headers,
        body: String::new(),
        url: Url::parse(BASE).unwrap(),
    })
}

fn status_only(status: u16) -> Result<PortalResponse, TransportError> {
    Ok(PortalResponse {
        status,
        headers: HeaderMap::new(),
        body: String::new(),
        url: Url::parse(BASE).unwrap(),
    })
}

fn login_page(token: &str) -> String {
    format!(
        r#"<html><body>
        <form action="/webclass/login.php" method="post">
            <input type="text" name="username">
            <input type="password" name="val">
            <input type="hidden" name="acs_" value="{token}">
        </form>
        </body></html>"#
    )
}

const COURSE_LIST_PAGE: &str = r#"<html><body>
    <a href="/webclass/logout.php">Logout</a>
    <div class="course-list">
        <a href="/webclass/course.php/101/">Math I</a>
        <a href="/webclass/course.php/102/">Physics</a>
    </div>
    </body></html>"#;

const ASSIGNMENT_PAGE: &str = r#"<html><body>
    <a href="/webclass/logout.php">Logout</a>
    <table class="assignment-list">
        <tr><th>Subject</th><th>Name</th><th>Category</th><th>From</th><th>Until</th></tr>
        <tr><td>Math</td><td>HW1</td><td></td><td></td><td>2024/01/05 23:59</td></tr>
    </table>
    </body></html>"#;

const COURSE_PAGE: &str = r#"<html><body>
    <a href="/webclass/logout.php">Logout</a>
    <h1 class="course-name">Math I</h1>
    <div class="course-description">Calculus and linear algebra.</div>
    </body></html>"#;

const MESSAGE_PAGE: &str = r#"<html><body>
    <a href="/webclass/logout.php">Logout</a>
    <div class="message-list">
        <div class="message-body">Lecture moved to room 204.</div>
    </div>
    </body></html>"#;

fn client_with(portal: Arc<ScriptedPortal>) -> WebClassClient {
    WebClassClient::builder(BASE)
        .credentials("s1234567", "hunter2")
        .backoff(Duration::from_millis(1))
        .with_http(portal)
        .build()
        .expect("client builds")
}

fn script_login(portal: &ScriptedPortal, token: &str, cookie: &str) {
    portal.script("/webclass/login.php", page(&login_page(token)));
    portal.script(
        "/webclass/login.php",
        redirect("/webclass/index.php", Some(cookie)),
    );
}

#[tokio::test]
async fn login_then_listing_needs_no_second_login() {
    let portal = Arc::new(ScriptedPortal::default());
    script_login(&portal, "abc123", "sid=1");
    portal.script("/webclass/index.php", page(COURSE_LIST_PAGE));

    let client = client_with(portal.clone());
    assert!(client.login().await.unwrap());
    assert_eq!(client.session_phase().await, SessionPhase::Authenticated);

    let courses = client.list_courses().await.unwrap();
    let ids: Vec<&str> = courses.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["101", "102"]);

    assert_eq!(portal.posts_to("/webclass/login.php"), 1);

    let requests = portal.requests();
    let post = requests
        .iter()
        .find(|r| r.method == "POST")
        .expect("login post recorded");
    assert_eq!(post.fields.get("username").unwrap(), "s1234567");
    assert_eq!(post.fields.get("val").unwrap(), "hunter2");
    assert_eq!(post.fields.get("acs_").unwrap(), "abc123");

    let listing = requests
        .iter()
        .find(|r| r.path == "/webclass/index.php")
        .expect("listing fetched");
    assert_eq!(
        listing.headers.get(header::COOKIE).unwrap(),
        &"sid=1".parse::<http::HeaderValue>().unwrap()
    );
    assert!(listing.query.contains("acs_=abc123"));
}

#[tokio::test]
async fn expiry_triggers_exactly_one_relogin() {
    let portal = Arc::new(ScriptedPortal::default());
    script_login(&portal, "abc123", "sid=1");
    // First listing fetch comes back in the login-page shape.
    portal.script("/webclass/index.php", page(&login_page("stale")));
    script_login(&portal, "def456", "sid=2");
    portal.script("/webclass/index.php", page(COURSE_LIST_PAGE));

    let client = client_with(portal.clone());
    assert!(client.login().await.unwrap());

    let courses = client.list_courses().await.unwrap();
    assert_eq!(courses.len(), 2);
    assert_eq!(portal.posts_to("/webclass/login.php"), 2);

    let listings: Vec<Recorded> = portal
        .requests()
        .into_iter()
        .filter(|r| r.path == "/webclass/index.php")
        .collect();
    assert_eq!(listings.len(), 2);
    assert!(listings[1].query.contains("acs_=def456"));
    assert_eq!(
        listings[1].headers.get(header::COOKIE).unwrap(),
        &"sid=2".parse::<http::HeaderValue>().unwrap()
    );
}

#[tokio::test]
async fn rejected_relogin_surfaces_and_never_loops() {
    let portal = Arc::new(ScriptedPortal::default());
    script_login(&portal, "abc123", "sid=1");
    portal.script("/webclass/index.php", page(&login_page("stale")));
    // Re-login round: fresh form, but the portal rejects the credentials.
    portal.script("/webclass/login.php", page(&login_page("def456")));
    portal.script("/webclass/login.php", page(&login_page("def456")));

    let client = client_with(portal.clone());
    assert!(client.login().await.unwrap());

    let err = client.list_courses().await.expect_err("relogin rejected");
    assert!(matches!(err, WebClassError::SessionExpired));
    assert_eq!(portal.posts_to("/webclass/login.php"), 2);
}

#[tokio::test]
async fn rejected_credentials_return_false_without_error() {
    let portal = Arc::new(ScriptedPortal::default());
    portal.script("/webclass/login.php", page(&login_page("abc123")));
    portal.script("/webclass/login.php", page(&login_page("abc123")));

    let client = client_with(portal.clone());
    assert!(!client.login().await.unwrap());
    assert_eq!(client.session_phase().await, SessionPhase::Unauthenticated);
}

#[tokio::test]
async fn tokenless_login_form_is_an_authentication_error() {
    let portal = Arc::new(ScriptedPortal::default());
    portal.script(
        "/webclass/login.php",
        page(
            r#"<form action="/webclass/login.php">
            <input type="password" name="val"></form>"#,
        ),
    );

    let client = client_with(portal);
    let err = client.login().await.expect_err("form is unusable");
    assert!(matches!(err, WebClassError::Authentication(_)));
}

#[tokio::test]
async fn logout_ends_unauthenticated_even_on_server_error() {
    let portal = Arc::new(ScriptedPortal::default());
    script_login(&portal, "abc123", "sid=1");
    portal.script("/webclass/logout.php", status_only(500));

    let client = client_with(portal);
    assert!(client.login().await.unwrap());
    assert!(!client.logout().await);
    assert_eq!(client.session_phase().await, SessionPhase::Unauthenticated);
}

#[tokio::test]
async fn assignment_row_survives_extraction_unmodified() {
    let portal = Arc::new(ScriptedPortal::default());
    script_login(&portal, "abc123", "sid=1");
    portal.script("/webclass/assignment_list.php", page(ASSIGNMENT_PAGE));

    let client = client_with(portal.clone());
    assert!(client.login().await.unwrap());

    let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let assignments = client.assignments(as_of).await.unwrap();
    assert_eq!(
        assignments,
        vec![Assignment {
            subject: "Math".into(),
            name: "HW1".into(),
            category: String::new(),
            available_from: String::new(),
            available_until: "2024/01/05 23:59".into(),
        }]
    );

    let request = portal
        .requests()
        .into_iter()
        .find(|r| r.path == "/webclass/assignment_list.php")
        .expect("assignment fetch recorded");
    assert!(request.query.contains("date=2024-01-01"));
}

#[tokio::test]
async fn messages_carry_the_course_display_name() {
    let portal = Arc::new(ScriptedPortal::default());
    script_login(&portal, "abc123", "sid=1");
    portal.script("/webclass/course.php/101/", page(COURSE_PAGE));
    portal.script("/webclass/message_list.php", page(MESSAGE_PAGE));

    let client = client_with(portal.clone());
    assert!(client.login().await.unwrap());

    let since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let messages = client.course_messages("101", since).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].course, "Math I");
    assert_eq!(messages[0].body, "Lecture moved to room 204.");

    let request = portal
        .requests()
        .into_iter()
        .find(|r| r.path == "/webclass/message_list.php")
        .expect("message fetch recorded");
    assert!(request.query.contains("id=101"));
    assert!(request.query.contains("date=2024-01-01"));
}

#[tokio::test]
async fn dead_transport_login_leaves_machine_unauthenticated() {
    let portal = Arc::new(ScriptedPortal::default());
    for _ in 0..3 {
        portal.script(
            "/webclass/login.php",
            Err(TransportError("connection reset".into())),
        );
    }

    let client = client_with(portal);
    let err = client.login().await.expect_err("transport is dead");
    assert!(matches!(err, WebClassError::Transport(_)));
    assert_eq!(client.session_phase().await, SessionPhase::Unauthenticated);
}

#[tokio::test]
async fn maintenance_page_at_login_endpoint_returns_false() {
    let portal = Arc::new(ScriptedPortal::default());
    portal.script(
        "/webclass/login.php",
        page("<html><body><h1>Scheduled maintenance</h1></body></html>"),
    );

    let client = client_with(portal.clone());
    assert!(!client.login().await.unwrap());
    assert_eq!(client.session_phase().await, SessionPhase::Unauthenticated);
    assert_eq!(portal.posts_to("/webclass/login.php"), 0);
}

#[tokio::test]
async fn transient_transport_failures_are_retried() {
    let portal = Arc::new(ScriptedPortal::default());
    portal.script(
        "/webclass/login.php",
        Err(TransportError("connection reset".into())),
    );
    script_login(&portal, "abc123", "sid=1");

    let client = client_with(portal);
    assert!(client.login().await.unwrap());
}
