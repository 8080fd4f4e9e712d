use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use ride_dispatch::api::rest::router;
use ride_dispatch::config::Config;
use ride_dispatch::state::AppState;
use serde_json::{Value, json};
use tower::ServiceExt;

fn setup() -> axum::Router {
    router(Arc::new(AppState::new(&Config::default())))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn delete_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn order_body(passenger_id: &str) -> Value {
    json!({
        "passenger_id": passenger_id,
        "pickup": { "lat": 25.033, "lng": 121.565 },
        "dropoff": { "lat": 25.0478, "lng": 121.5318 },
        "ride_type": "economy"
    })
}

async fn create_order(app: &axum::Router, passenger_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/orders", order_body(passenger_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["id"].as_str().unwrap().to_string()
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(json_request("POST", uri, body))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_empty_pool() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pool"]["drivers"], 0);
    assert_eq!(body["pool"]["passengers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    create_order(&app, "p_metrics").await;

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("order_transitions_total"));
    assert!(body.contains("overdue_payments_total"));
}

#[tokio::test]
async fn create_order_is_waiting_with_a_fare() {
    let app = setup();
    let response = post(&app, "/orders", order_body("p1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "waiting");
    assert_eq!(body["order_type"], "instant");
    assert_eq!(body["status_version"], 0);
    assert_eq!(body["estimated_fee"]["currency"], "TWD");
    assert!(body["estimated_fee"]["amount"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn create_order_without_passenger_is_bad_request() {
    let app = setup();
    let response = post(&app, "/orders", order_body("")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "bad_request");
}

#[tokio::test]
async fn second_active_order_is_conflict() {
    let app = setup();
    create_order(&app, "p1").await;

    let response = post(&app, "/orders", order_body("p1")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "active_order");
}

#[tokio::test]
async fn unknown_order_returns_404() {
    let app = setup();
    let response = app
        .oneshot(get_request(&format!("/orders/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["kind"], "not_found");
}

#[tokio::test]
async fn full_trip_over_http() {
    let app = setup();
    let id = create_order(&app, "p_trip").await;
    let driver = json!({ "driver_id": "d1" });

    for step in ["accept", "arrive", "meet", "complete"] {
        let response = post(&app, &format!("/orders/{id}/{step}"), driver.clone()).await;
        assert_eq!(response.status(), StatusCode::OK, "step {step}");
    }

    let response = post(&app, &format!("/orders/{id}/pay"), json!({ "passenger_id": "p_trip" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let paid = body_json(response).await;
    assert_eq!(paid["from"], "payment");
    assert_eq!(paid["to"], "complete");
    assert_eq!(paid["status_version"], 5);

    let order = body_json(app.clone().oneshot(get_request(&format!("/orders/{id}"))).await.unwrap()).await;
    assert_eq!(order["status"], "complete");
    assert_eq!(order["driver_id"], "d1");
    assert_eq!(order["actual_fee"]["amount"], order["estimated_fee"]["amount"]);

    let events = body_json(
        app.oneshot(get_request(&format!("/orders/{id}/events")))
            .await
            .unwrap(),
    )
    .await;
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0]["from_status"], "none");
    assert_eq!(events[5]["to_status"], "complete");
    assert_eq!(events[5]["actor_type"], "passenger");
}

#[tokio::test]
async fn skipping_a_step_is_invalid_state() {
    let app = setup();
    let id = create_order(&app, "p1").await;

    let response = post(&app, &format!("/orders/{id}/meet"), json!({ "driver_id": "d1" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "invalid_state");
}

#[tokio::test]
async fn second_accept_loses() {
    let app = setup();
    let id = create_order(&app, "p1").await;

    let first = post(&app, &format!("/orders/{id}/accept"), json!({ "driver_id": "d1" })).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post(&app, &format!("/orders/{id}/accept"), json!({ "driver_id": "d2" })).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn passenger_cancel_then_rebook() {
    let app = setup();
    let id = create_order(&app, "p1").await;

    let response = post(
        &app,
        &format!("/orders/{id}/cancel"),
        json!({ "actor": { "type": "passenger", "id": "p1" }, "reason": "changed my mind" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["to"], "cancelled");

    create_order(&app, "p1").await;
}

#[tokio::test]
async fn deny_puts_order_back_to_waiting() {
    let app = setup();
    let id = create_order(&app, "p1").await;

    let response = post(&app, &format!("/orders/{id}/deny"), json!({ "driver_id": "d1" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["from"], "denied");
    assert_eq!(body["to"], "waiting");
}

#[tokio::test]
async fn scheduled_order_claim_and_hand_back() {
    let app = setup();
    let scheduled_at = Utc::now() + Duration::hours(3);
    let response = post(
        &app,
        "/orders/scheduled",
        json!({
            "passenger_id": "p_sched",
            "pickup": { "lat": 25.033, "lng": 121.565 },
            "dropoff": { "lat": 25.0478, "lng": 121.5318 },
            "ride_type": "economy",
            "scheduled_at": scheduled_at,
            "schedule_window_mins": 30
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = body_json(response).await;
    assert_eq!(order["status"], "scheduled");
    assert_eq!(order["schedule"]["incentive_bonus"], 0);
    let id = order["id"].as_str().unwrap().to_string();

    let available = body_json(
        app.clone()
            .oneshot(get_request("/orders/scheduled/available"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(available.as_array().unwrap().len(), 1);

    let claim = post(&app, &format!("/orders/{id}/claim"), json!({ "driver_id": "d1" })).await;
    assert_eq!(claim.status(), StatusCode::OK);
    let again = post(&app, &format!("/orders/{id}/claim"), json!({ "driver_id": "d2" })).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let back = post(
        &app,
        &format!("/orders/{id}/driver-cancel"),
        json!({ "driver_id": "d1" }),
    )
    .await;
    assert_eq!(back.status(), StatusCode::OK);
    assert_eq!(body_json(back).await["to"], "scheduled");

    let mine = body_json(
        app.oneshot(get_request("/orders/scheduled?passenger_id=p_sched"))
            .await
            .unwrap(),
    )
    .await;
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["driver_id"], Value::Null);
    assert_eq!(mine[0]["schedule"]["incentive_bonus"], 50);
}

#[tokio::test]
async fn scheduled_order_too_soon_is_bad_request() {
    let app = setup();
    let response = post(
        &app,
        "/orders/scheduled",
        json!({
            "passenger_id": "p1",
            "pickup": { "lat": 25.033, "lng": 121.565 },
            "dropoff": { "lat": 25.0478, "lng": 121.5318 },
            "ride_type": "economy",
            "scheduled_at": Utc::now() + Duration::minutes(5),
            "schedule_window_mins": 30
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scheduled_order_with_huge_window_is_bad_request() {
    let app = setup();
    let response = post(
        &app,
        "/orders/scheduled",
        json!({
            "passenger_id": "p1",
            "pickup": { "lat": 25.033, "lng": 121.565 },
            "dropoff": { "lat": 25.0478, "lng": 121.5318 },
            "ride_type": "economy",
            "scheduled_at": Utc::now() + Duration::hours(3),
            "schedule_window_mins": 1_000_000_000_000i64
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "bad_request");
}

#[tokio::test]
async fn candidate_match_over_http() {
    let app = setup();
    let id = create_order(&app, "p1").await;

    let miss = post(
        &app,
        "/candidates/passenger/p1/match",
        json!({ "order_id": id, "position": { "lat": 25.033, "lng": 121.565 } }),
    )
    .await;
    assert_eq!(miss.status(), StatusCode::OK);
    assert_eq!(body_json(miss).await["driver_id"], Value::Null);

    let joined = post(
        &app,
        "/candidates",
        json!({
            "id": "d1",
            "type": "driver",
            "ride_types": ["economy"],
            "position": { "lat": 25.034, "lng": 121.565 }
        }),
    )
    .await;
    assert_eq!(joined.status(), StatusCode::OK);

    let hit = post(
        &app,
        "/candidates/passenger/p1/match",
        json!({ "order_id": id, "position": { "lat": 25.033, "lng": 121.565 } }),
    )
    .await;
    assert_eq!(hit.status(), StatusCode::OK);
    assert_eq!(body_json(hit).await["driver_id"], "d1");

    let order = body_json(app.oneshot(get_request(&format!("/orders/{id}"))).await.unwrap()).await;
    assert_eq!(order["status"], "approaching");
    assert_eq!(order["driver_id"], "d1");
}

#[tokio::test]
async fn candidate_removal() {
    let app = setup();
    let joined = post(
        &app,
        "/candidates",
        json!({
            "id": "d1",
            "type": "driver",
            "position": { "lat": 25.034, "lng": 121.565 }
        }),
    )
    .await;
    assert_eq!(joined.status(), StatusCode::OK);

    let removed = app
        .clone()
        .oneshot(delete_request("/candidates/driver/d1"))
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    let missing = app
        .oneshot(delete_request("/candidates/driver/d1"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn drivers_cannot_request_an_immediate_match() {
    let app = setup();
    let id = create_order(&app, "p1").await;

    let response = post(
        &app,
        "/candidates/driver/d1/match",
        json!({ "order_id": id, "position": { "lat": 25.033, "lng": 121.565 } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
