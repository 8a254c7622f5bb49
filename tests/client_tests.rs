use std::sync::{Arc, Mutex};

use pellematic::catalog::{OUTSIDE_TEMPERATURE, SYSTEM_MODE};
use pellematic::{
    DecodedValue, Entry, ErrorKind, Event, LoginForm, Numeric, PellematicClient,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SETPOINT: &str = "CAPPL:LOCAL.hk[0].raumtemp_heizen";

fn login_ok() -> ResponseTemplate {
    ResponseTemplate::new(303)
        .append_header("Set-Cookie", "LoginError=0; Path=/")
        .append_header("Set-Cookie", "pksession=abc123; Path=/")
        .insert_header("Location", "/home.cgi")
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(login_ok())
        .mount(server)
        .await;
}

fn fetch_mock() -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(query_param("action", "get"))
        .and(query_param("attr", "1"))
}

fn write_mock() -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(query_param("action", "set"))
}

fn client(server: &MockServer) -> PellematicClient {
    PellematicClient::builder(server.uri())
        .credentials("admin", "secret")
        .build()
        .expect("build should succeed")
}

fn recording_client(server: &MockServer) -> (PellematicClient, Arc<Mutex<Vec<Event>>>) {
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();
    let client = PellematicClient::builder(server.uri())
        .credentials("admin", "secret")
        .on_event(move |event| {
            events_clone.lock().unwrap().push(event.clone());
        })
        .build()
        .expect("build should succeed");
    (client, events)
}

#[tokio::test]
async fn login_posts_form_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .and(body_string_contains("username=admin"))
        .and(body_string_contains("password=secret"))
        .and(body_string_contains("language=de"))
        .and(body_string_contains("submit=Anmelden"))
        .respond_with(login_ok())
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client
        .ensure_authenticated()
        .await
        .expect("login should succeed");
    assert!(client.is_authenticated().await);
}

#[tokio::test]
async fn login_redirect_is_not_followed() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/home.cgi"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    client(&server).ensure_authenticated().await.unwrap();
}

#[tokio::test]
async fn ensure_authenticated_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(login_ok())
        .expect(1)
        .mount(&server)
        .await;

    let (client, events) = recording_client(&server);
    client.ensure_authenticated().await.unwrap();
    client.ensure_authenticated().await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(*events, vec![Event::SessionEstablished]);
}

#[tokio::test]
async fn login_error_cookie_overrides_session_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(
            ResponseTemplate::new(302)
                .append_header("Set-Cookie", "pksession=stale; Path=/")
                .append_header("Set-Cookie", "LoginError=1; Path=/")
                .insert_header("Location", "/login.cgi"),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.ensure_authenticated().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!client.is_authenticated().await);
}

#[tokio::test]
async fn rejected_login_cookie_does_not_satisfy_next_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(
            ResponseTemplate::new(302)
                .append_header("Set-Cookie", "pksession=stray; Path=/")
                .append_header("Set-Cookie", "LoginError=1; Path=/"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client(&server);
    let first = client.ensure_authenticated().await.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Authentication);

    let second = client.ensure_authenticated().await.unwrap_err();
    assert_eq!(second.kind(), ErrorKind::Authentication);
    assert!(!client.is_authenticated().await);
}

#[tokio::test]
async fn login_without_cookie_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let err = client(&server).ensure_authenticated().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn legacy_form_accepts_bare_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .and(body_string_contains("user=admin"))
        .and(body_string_contains("pass=secret"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/"))
        .expect(1)
        .mount(&server)
        .await;

    let client = PellematicClient::builder(server.uri())
        .credentials("admin", "secret")
        .login_form(LoginForm::legacy())
        .build()
        .unwrap();
    client.ensure_authenticated().await.unwrap();
}

#[tokio::test]
async fn unreachable_device_is_connection_error() {
    let client = PellematicClient::builder("127.0.0.1:1")
        .credentials("admin", "secret")
        .build()
        .unwrap();
    let err = client.fetch(&[OUTSIDE_TEMPERATURE]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn empty_fetch_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let ids: [&str; 0] = [];
    let readings = client(&server).fetch(&ids).await.unwrap();
    assert!(readings.is_empty());
}

#[tokio::test]
async fn fetch_decodes_scaled_value() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .and(body_json(json!([OUTSIDE_TEMPERATURE])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"value": "215", "divisor": "10", "unitText": "°C", "status": "OK"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let readings = client(&server).fetch(&[OUTSIDE_TEMPERATURE]).await.unwrap();
    let reading = readings.reading(OUTSIDE_TEMPERATURE).unwrap();
    assert_eq!(reading.value, DecodedValue::Scaled(Numeric::Decimal(21.5)));
    assert_eq!(reading.unit(), Some("°C"));
    assert!(reading.is_ok());
}

#[tokio::test]
async fn fetch_null_entry_is_missing() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"value": "1"},
            {"value": "2"},
            null,
            {"value": "4"},
            {"value": "5"}
        ])))
        .mount(&server)
        .await;

    let ids = ["a", "b", "c", "d", "e"];
    let readings = client(&server).fetch(&ids).await.unwrap();
    assert_eq!(readings.len(), 5);
    assert_eq!(readings.missing().collect::<Vec<_>>(), vec!["c"]);
    assert_eq!(
        readings.value("d"),
        Some(&DecodedValue::Number(Numeric::Integer(4)))
    );
    let order: Vec<&str> = readings.iter().map(|(id, _)| id).collect();
    assert_eq!(order, ids);
}

#[tokio::test]
async fn empty_value_is_missing() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"value": ""}, {"value": "7"}])),
        )
        .mount(&server)
        .await;

    let readings = client(&server).fetch(&["a", "b"]).await.unwrap();
    assert!(readings.is_missing("a"));
    assert_eq!(
        readings.value("b"),
        Some(&DecodedValue::Number(Numeric::Integer(7)))
    );
}

#[tokio::test]
async fn short_reply_marks_trailing_missing() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"value": "1"}])))
        .mount(&server)
        .await;

    let readings = client(&server).fetch(&["a", "b", "c"]).await.unwrap();
    assert!(matches!(readings.get("a"), Some(Entry::Value(_))));
    assert!(readings.is_missing("b"));
    assert!(readings.is_missing("c"));
}

#[tokio::test]
async fn fetch_reauthenticates_once_on_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(login_ok())
        .expect(2)
        .mount(&server)
        .await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"value": "3"}])))
        .mount(&server)
        .await;

    let (client, events) = recording_client(&server);
    let readings = client.fetch(&["a"]).await.unwrap();
    assert_eq!(
        readings.value("a"),
        Some(&DecodedValue::Number(Numeric::Integer(3)))
    );

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            Event::SessionEstablished,
            Event::SessionExpired,
            Event::SessionEstablished,
        ]
    );
}

#[tokio::test]
async fn persistent_403_fails_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(login_ok())
        .expect(2)
        .mount(&server)
        .await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server).fetch(&["a"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
}

#[tokio::test]
async fn non_array_reply_is_fetch_error() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "busy"})))
        .mount(&server)
        .await;

    let err = client(&server).fetch(&["a"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
}

#[tokio::test]
async fn server_error_is_connection_kind() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server).fetch(&["a"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn close_forces_new_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(login_ok())
        .expect(2)
        .mount(&server)
        .await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"value": "1"}])))
        .mount(&server)
        .await;

    let client = client(&server);
    client.fetch(&["a"]).await.unwrap();
    client.close().await;
    assert!(!client.is_authenticated().await);
    client.fetch(&["a"]).await.unwrap();
}

#[tokio::test]
async fn value_change_emits_event() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"value": "215", "divisor": "10"}])),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    fetch_mock()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"value": "220", "divisor": "10"}])),
        )
        .mount(&server)
        .await;

    let (client, events) = recording_client(&server);
    client.fetch(&[OUTSIDE_TEMPERATURE]).await.unwrap();
    client.fetch(&[OUTSIDE_TEMPERATURE]).await.unwrap();

    let events = events.lock().unwrap();
    assert!(events.contains(&Event::ValueChanged {
        identifier: OUTSIDE_TEMPERATURE.to_string(),
        previous: DecodedValue::Scaled(Numeric::Decimal(21.5)),
        current: DecodedValue::Scaled(Numeric::Integer(22)),
    }));
}

#[tokio::test]
async fn readings_callback_sees_each_fetch() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"value": "1"}, null])))
        .mount(&server)
        .await;

    let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(vec![]));
    let seen_clone = seen.clone();
    let client = PellematicClient::builder(server.uri())
        .credentials("admin", "secret")
        .on_readings(move |readings| {
            seen_clone.lock().unwrap().push(readings.missing().count());
        })
        .build()
        .unwrap();

    client.fetch(&["a", "b"]).await.unwrap();
    client.fetch(&["a", "b"]).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 1]);
}

#[tokio::test]
async fn write_sends_json_object() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    write_mock()
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .and(body_json(json!({SYSTEM_MODE: "1"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.set_parameter(SYSTEM_MODE, "1").await);
}

#[tokio::test]
async fn rejected_write_returns_false() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    write_mock()
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(!client.set_parameter(SYSTEM_MODE, "1").await);
    let err = client.write(SYSTEM_MODE, "1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn set_mode_checks_known_labels() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"value": "1", "formatTexts": "Aus|Auto|Heizen|Absenken|Sommer"}
        ])))
        .mount(&server)
        .await;
    write_mock()
        .and(body_json(json!({SYSTEM_MODE: "2"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let readings = client.fetch(&[SYSTEM_MODE]).await.unwrap();
    assert_eq!(readings.value(SYSTEM_MODE).and_then(|v| v.label()), Some("Auto"));

    let err = client.set_system_mode(9).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    client.set_system_mode(2).await.unwrap();
}

#[tokio::test]
async fn set_setpoint_encodes_with_divisor() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    fetch_mock()
        .and(body_json(json!([SETPOINT])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"value": "200", "divisor": "10", "lowerLimit": "100", "upperLimit": "300"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    write_mock()
        .and(body_json(json!({SETPOINT: "215"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.set_setpoint(SETPOINT, 21.5).await.unwrap();

    let err = client.set_setpoint(SETPOINT, 35.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[tokio::test]
async fn validate_succeeds_against_device() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&server)
        .await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"value": "-35", "divisor": "10"}])),
        )
        .mount(&server)
        .await;

    client(&server).validate().await.unwrap();
}

#[tokio::test]
async fn validate_reports_bad_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/index.cgi"))
        .respond_with(
            ResponseTemplate::new(302).append_header("Set-Cookie", "LoginError=1; Path=/"),
        )
        .mount(&server)
        .await;

    let err = client(&server).validate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn validate_reports_unreachable_device() {
    let client = PellematicClient::builder("127.0.0.1:1").build().unwrap();
    let err = client.validate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn validate_requires_test_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_login(&server).await;
    fetch_mock()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([null])))
        .mount(&server)
        .await;

    let err = client(&server).validate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
}
