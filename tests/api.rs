//! Router-level tests: headers in, JSON and status codes out.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use seat_ledger::clock::ManualClock;
use seat_ledger::controllers;
use seat_ledger::services::BookingService;
use seat_ledger::store::MemoryLedger;
use seat_ledger::AppState;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    store: MemoryLedger,
}

fn app() -> TestApp {
    let store = MemoryLedger::new();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2034, 4, 1, 8, 0, 0).unwrap()));
    let service = BookingService::new(Arc::new(store.clone()), clock.clone());
    let router = controllers::router(AppState::new(service, std::time::Duration::from_secs(2)));
    TestApp { router, clock, store }
}

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    user: Option<(i64, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = user {
        req = req.header("x-user-id", id.to_string()).header("x-user-role", role);
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_event(app: &TestApp, seats: i32) -> i64 {
    let date = app.clock_now() + Duration::days(5);
    let (status, body) = call(
        app,
        Method::POST,
        "/events",
        Some((1, "admin")),
        Some(json!({
            "title": "Derby",
            "event_date": date,
            "booking_window": 60,
            "total_seats": seats,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["event"]["id"].as_i64().unwrap()
}

impl TestApp {
    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use seat_ledger::clock::Clock;
        self.clock.now()
    }
}

#[tokio::test]
async fn health_and_request_id() {
    let app = app();
    let res = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn identity_headers_are_required() {
    let app = app();

    let (status, body) = call(&app, Method::GET, "/events", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, Method::GET, "/events", Some((0, "user")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::GET, "/events", Some((3, "superuser")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_admins_manage_events() {
    let app = app();
    let date = app.clock_now() + Duration::days(1);
    let payload = json!({ "title": "Expo", "event_date": date, "booking_window": 30, "total_seats": 3 });

    let (status, body) = call(&app, Method::POST, "/events", Some((2, "user")), Some(payload)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("permissions"), "{body}");

    let event_id = create_event(&app, 3).await;
    let (status, _) = call(&app, Method::DELETE, &format!("/events/{event_id}"), Some((2, "user")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, Method::DELETE, &format!("/events/{event_id}"), Some((1, "admin")), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(app.store.event(event_id).is_none());
}

#[tokio::test]
async fn malformed_event_payload_is_a_validation_error() {
    let app = app();

    let (status, body) = call(&app, Method::POST, "/events", Some((1, "admin")), Some(json!({ "title": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let date = app.clock_now() + Duration::days(1);
    let zero_seats = json!({ "title": "Expo", "event_date": date, "booking_window": 30, "total_seats": 0 });
    let (status, _) = call(&app, Method::POST, "/events", Some((1, "admin")), Some(zero_seats)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn booking_flow_over_http() {
    let app = app();
    let event_id = create_event(&app, 1).await;

    let (status, body) = call(&app, Method::POST, "/bookings", Some((5, "user")), Some(json!({ "event_id": event_id }))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["booking"]["status"], "created");
    let booking_id = body["booking"]["id"].as_i64().unwrap();

    let (status, body) = call(&app, Method::POST, "/bookings", Some((6, "user")), Some(json!({ "event_id": event_id }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let confirm = format!("/bookings/{booking_id}/confirm");
    let (status, _) = call(&app, Method::POST, &confirm, Some((6, "user")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, Method::POST, &confirm, Some((5, "user")), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, Method::POST, &confirm, Some((5, "user")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, Method::GET, "/bookings/my", Some((5, "user")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bookings"].as_array().unwrap().len(), 1);
    assert_eq!(body["bookings"][0]["status"], "confirmed");

    let (status, _) = call(&app, Method::DELETE, &format!("/events/{event_id}"), Some((1, "admin")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_and_missing_rows() {
    let app = app();
    let event_id = create_event(&app, 2).await;

    let (_, body) = call(&app, Method::POST, "/bookings", Some((5, "user")), Some(json!({ "event_id": event_id }))).await;
    let booking_id = body["booking"]["id"].as_i64().unwrap();

    let (status, _) = call(&app, Method::DELETE, &format!("/bookings/{booking_id}"), Some((5, "user")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.event(event_id).unwrap().available_seats, 2);

    let (status, _) = call(&app, Method::DELETE, "/bookings/9999", Some((5, "user")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::POST, "/bookings", Some((5, "user")), Some(json!({ "event_id": 4242 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_see_only_upcoming_events() {
    let app = app();
    let event_id = create_event(&app, 2).await;

    app.clock.advance(Duration::days(6));

    let (_, body) = call(&app, Method::GET, "/events", Some((5, "user")), None).await;
    assert!(body["events"].as_array().unwrap().is_empty());

    let (_, body) = call(&app, Method::GET, "/events", Some((1, "admin")), None).await;
    assert_eq!(body["events"][0]["id"].as_i64(), Some(event_id));
}
