use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::matching::service::DISPATCH_HORIZON_DAYS;
use crate::models::event::{Actor, OrderEvent};
use crate::models::order::Order;
use crate::order::schedule::NewScheduledOrder;
use crate::order::service::{NewOrder, Transitioned};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route(
            "/orders/scheduled",
            post(create_scheduled_order).get(list_passenger_scheduled),
        )
        .route("/orders/scheduled/available", get(list_available_scheduled))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/events", get(list_events))
        .route("/orders/:id/match", post(match_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/deny", post(deny_order))
        .route("/orders/:id/arrive", post(arrive))
        .route("/orders/:id/meet", post(meet))
        .route("/orders/:id/complete", post(complete))
        .route("/orders/:id/pay", post(pay))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/claim", post(claim_scheduled))
        .route("/orders/:id/driver-cancel", post(driver_cancel_scheduled))
        .route("/orders/:id/passenger-cancel", post(passenger_cancel_scheduled))
}

#[derive(Deserialize)]
pub struct DriverRequest {
    pub driver_id: String,
}

#[derive(Deserialize)]
pub struct PayRequest {
    /// Omitted when the payment is settled by the system.
    pub passenger_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct PassengerCancelRequest {
    pub passenger_id: String,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct PassengerQuery {
    pub passenger_id: String,
}

#[derive(Deserialize)]
pub struct WindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.create(payload).await?))
}

async fn create_scheduled_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewScheduledOrder>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.create_scheduled(payload).await?))
}

async fn list_passenger_scheduled(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PassengerQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(
        state
            .orders
            .list_scheduled_by_passenger(&query.passenger_id)
            .await?,
    ))
}

async fn list_available_scheduled(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let from = query.from.unwrap_or_else(Utc::now);
    let to = query
        .to
        .unwrap_or_else(|| from + Duration::days(DISPATCH_HORIZON_DAYS));

    Ok(Json(state.orders.list_available_scheduled(from, to).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get(id).await?))
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderEvent>>, AppError> {
    Ok(Json(state.orders.events(id).await?))
}

async fn match_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(state.orders.match_driver(id, &payload.driver_id).await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(state.orders.accept(id, &payload.driver_id).await?))
}

async fn deny_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(state.orders.deny(id, &payload.driver_id).await?))
}

async fn arrive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(state.orders.arrive(id, &payload.driver_id).await?))
}

async fn meet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(state.orders.meet(id, &payload.driver_id).await?))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(state.orders.complete(id, &payload.driver_id).await?))
}

async fn pay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PayRequest>,
) -> Result<Json<Transitioned>, AppError> {
    let payer = payload
        .passenger_id
        .map(Actor::Passenger)
        .unwrap_or(Actor::System);
    Ok(Json(state.orders.pay(id, payer).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(
        state
            .orders
            .cancel(id, payload.actor, payload.reason)
            .await?,
    ))
}

async fn claim_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(
        state
            .orders
            .claim_scheduled(id, &payload.driver_id)
            .await?,
    ))
}

async fn driver_cancel_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(
        state
            .orders
            .cancel_scheduled_by_driver(id, &payload.driver_id)
            .await?,
    ))
}

async fn passenger_cancel_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PassengerCancelRequest>,
) -> Result<Json<Transitioned>, AppError> {
    Ok(Json(
        state
            .orders
            .cancel_scheduled_by_passenger(id, &payload.passenger_id, payload.reason)
            .await?,
    ))
}
