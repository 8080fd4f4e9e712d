use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrderConfig;
use crate::error::AppError;
use crate::geo::{GeoPoint, haversine_km};
use crate::models::event::{Actor, OrderEvent};
use crate::models::order::{Money, Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::order::schedule::driver_reopen;
use crate::order::store::{DriverChange, OrderStore, StatusUpdate};
use crate::order::transitions::{can_transition, next_statuses};
use crate::pricing::{FareRequest, Pricing};

/// Trip duration assumed when pricing, from an average city speed of 30 km/h.
const MINUTES_PER_KM: f64 = 2.0;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub passenger_id: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub ride_type: String,
}

/// Result of an applied transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transitioned {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub status_version: i64,
}

pub(crate) enum Write {
    Status {
        driver: DriverChange,
        cancel_reason: Option<String>,
        actual_fee: Option<Money>,
    },
    Claim {
        driver_id: String,
    },
    Reopen {
        bonus_delta: i64,
    },
}

pub(crate) struct Transition {
    pub(crate) to: OrderStatus,
    pub(crate) actor: Actor,
    pub(crate) write: Write,
}

impl Transition {
    pub(crate) fn to(to: OrderStatus, actor: Actor) -> Self {
        Self {
            to,
            actor,
            write: Write::Status {
                driver: DriverChange::Keep,
                cancel_reason: None,
                actual_fee: None,
            },
        }
    }

    pub(crate) fn driver(mut self, change: DriverChange) -> Self {
        if let Write::Status { driver, .. } = &mut self.write {
            *driver = change;
        }
        self
    }

    pub(crate) fn cancel_reason(mut self, reason: Option<String>) -> Self {
        if let Write::Status { cancel_reason, .. } = &mut self.write {
            *cancel_reason = reason;
        }
        self
    }

    pub(crate) fn actual_fee(mut self, fee: Money) -> Self {
        if let Write::Status { actual_fee, .. } = &mut self.write {
            *actual_fee = Some(fee);
        }
        self
    }

    pub(crate) fn with_write(mut self, write: Write) -> Self {
        self.write = write;
        self
    }
}

pub struct OrderService {
    pub(crate) store: Arc<dyn OrderStore>,
    pricing: Arc<dyn Pricing>,
    pub(crate) config: OrderConfig,
    pub(crate) metrics: Arc<Metrics>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        pricing: Arc<dyn Pricing>,
        config: OrderConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            pricing,
            config,
            metrics,
        }
    }

    pub async fn create(&self, cmd: NewOrder) -> Result<Order, AppError> {
        validate_trip(&cmd.passenger_id, &cmd.ride_type, &cmd.pickup, &cmd.dropoff)?;
        self.ensure_no_active_order(&cmd.passenger_id).await?;

        let now = Utc::now();
        let estimated_fee = self
            .estimate_fee(&cmd.pickup, &cmd.dropoff, &cmd.ride_type, now)
            .await;
        let order = Order::instant(
            cmd.passenger_id,
            cmd.pickup,
            cmd.dropoff,
            cmd.ride_type,
            estimated_fee,
            now,
        );

        self.persist_new(order).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Order, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }

    /// Audit trail of an order, oldest first.
    pub async fn events(&self, id: Uuid) -> Result<Vec<OrderEvent>, AppError> {
        self.get(id).await?;
        Ok(self.store.events(id).await?)
    }

    /// System-initiated pairing of a waiting order with a driver.
    pub async fn match_driver(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        self.apply(order_id, |order| {
            if order.status != OrderStatus::Waiting {
                return Err(AppError::InvalidState(format!(
                    "order {order_id} is {}, only waiting orders can be matched",
                    order.status
                )));
            }
            Ok(Transition::to(OrderStatus::Approaching, Actor::System)
                .driver(DriverChange::Set(driver_id.to_string())))
        })
        .await
    }

    /// A driver takes a waiting order, or departs for a scheduled order they claimed.
    pub async fn accept(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        self.apply(order_id, |order| {
            let change = if order.status == OrderStatus::Assigned {
                ensure_assigned_driver(order, driver_id)?;
                DriverChange::Keep
            } else {
                DriverChange::Set(driver_id.to_string())
            };
            Ok(Transition::to(OrderStatus::Approaching, Actor::Driver(driver_id.to_string()))
                .driver(change))
        })
        .await
    }

    /// A driver declines a waiting order; the system immediately puts it back
    /// up for matching. Returns the re-queue transition.
    pub async fn deny(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        let denied = self
            .apply(order_id, |order| {
                if order.driver_id.as_deref().is_some_and(|d| d != driver_id) {
                    return Err(AppError::InvalidState(format!(
                        "order {order_id} is assigned to another driver"
                    )));
                }
                Ok(Transition::to(OrderStatus::Denied, Actor::Driver(driver_id.to_string())))
            })
            .await?;

        match self.requeue(order_id).await {
            Ok(requeued) => Ok(requeued),
            Err(err) => {
                // The timeout monitor re-queues stranded denials.
                warn!(order_id = %order_id, error = %err, "re-queue after denial failed");
                Ok(denied)
            }
        }
    }

    /// System re-dispatch: `denied -> waiting`, or the `waiting -> waiting` retry loop.
    pub async fn requeue(&self, order_id: Uuid) -> Result<Transitioned, AppError> {
        self.apply(order_id, |_| Ok(Transition::to(OrderStatus::Waiting, Actor::System)))
            .await
    }

    pub async fn arrive(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        self.drive(order_id, driver_id, OrderStatus::Arrived).await
    }

    /// Passenger is on board.
    pub async fn meet(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        self.drive(order_id, driver_id, OrderStatus::Driving).await
    }

    /// Trip over; the fare (estimate plus any incentive) becomes payable.
    pub async fn complete(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        self.apply(order_id, |order| {
            ensure_assigned_driver(order, driver_id)?;
            let fee = Money::new(
                order.estimated_fee.amount + order.incentive_bonus(),
                order.estimated_fee.currency.clone(),
            );
            Ok(Transition::to(OrderStatus::Payment, Actor::Driver(driver_id.to_string()))
                .actual_fee(fee))
        })
        .await
    }

    pub async fn pay(&self, order_id: Uuid, payer: Actor) -> Result<Transitioned, AppError> {
        self.apply(order_id, |order| {
            match &payer {
                Actor::Passenger(passenger_id) => ensure_owner(order, passenger_id)?,
                Actor::System => {}
                Actor::Driver(_) => {
                    return Err(AppError::InvalidState(
                        "payment is settled by the passenger or the system".to_string(),
                    ));
                }
            }
            Ok(Transition::to(OrderStatus::Complete, payer.clone()))
        })
        .await
    }

    /// Cancels on behalf of `actor`. Passengers cancel outright. A driver
    /// backing out of an instant trip sends it back to matching, and backing
    /// out of a claimed scheduled trip re-opens it with a bonus.
    pub async fn cancel(
        &self,
        order_id: Uuid,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Transitioned, AppError> {
        self.apply(order_id, |order| match &actor {
            Actor::Passenger(passenger_id) => {
                ensure_owner(order, passenger_id)?;
                Ok(passenger_cancel(actor.clone(), reason.clone()))
            }
            Actor::System => Ok(passenger_cancel(Actor::System, reason.clone())),
            Actor::Driver(driver_id) => {
                ensure_assigned_driver(order, driver_id)?;
                Ok(match order.status {
                    OrderStatus::Approaching => Transition::to(OrderStatus::Waiting, actor.clone())
                        .driver(DriverChange::Clear),
                    OrderStatus::Assigned => driver_reopen(actor.clone()),
                    _ => Transition::to(OrderStatus::Cancelled, actor.clone())
                        .driver(DriverChange::Clear)
                        .cancel_reason(reason.clone()),
                })
            }
        })
        .await
    }

    /// Gives up on a waiting order nobody took, as long as it is still the
    /// version the caller looked at.
    pub async fn expire(&self, order_id: Uuid, seen_version: i64) -> Result<Transitioned, AppError> {
        self.apply(order_id, |order| {
            ensure_unchanged(order, seen_version)?;
            Ok(Transition::to(OrderStatus::Expired, Actor::System))
        })
        .await
    }

    pub(crate) async fn ensure_no_active_order(&self, passenger_id: &str) -> Result<(), AppError> {
        if self.store.has_active_by_passenger(passenger_id).await? {
            return Err(AppError::ActiveOrder(passenger_id.to_string()));
        }
        Ok(())
    }

    pub(crate) async fn persist_new(&self, order: Order) -> Result<Order, AppError> {
        let passenger = Actor::Passenger(order.passenger_id.clone());
        let event = OrderEvent::new(
            order.id,
            OrderStatus::None,
            order.status,
            &passenger,
            order.created_at,
        );

        self.store.create(order.clone()).await?;
        self.metrics.record_transition(order.status.as_str(), "applied");
        info!(
            order_id = %order.id,
            passenger_id = %order.passenger_id,
            status = %order.status,
            estimated_fee = order.estimated_fee.amount,
            "order created"
        );

        self.record_event(event).await;
        Ok(order)
    }

    pub(crate) async fn estimate_fee(
        &self,
        pickup: &GeoPoint,
        dropoff: &GeoPoint,
        ride_type: &str,
        at: DateTime<Utc>,
    ) -> Money {
        let distance_km = haversine_km(pickup, dropoff);
        let request = FareRequest {
            distance_km,
            duration_min: distance_km * MINUTES_PER_KM,
            ride_type: ride_type.to_string(),
            requested_at: at,
        };

        match self.pricing.estimate(&request).await {
            Ok(quote) => quote.total,
            Err(err) => {
                warn!(error = %err, distance_km, "fare estimate failed, using zero");
                Money::zero()
            }
        }
    }

    async fn drive(
        &self,
        order_id: Uuid,
        driver_id: &str,
        to: OrderStatus,
    ) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        self.apply(order_id, |order| {
            ensure_assigned_driver(order, driver_id)?;
            Ok(Transition::to(to, Actor::Driver(driver_id.to_string())))
        })
        .await
    }

    /// Load, plan, check the edge, compare-and-swap, audit. A swap that does
    /// not apply is reported as `Conflict` and never retried here.
    pub(crate) async fn apply<F>(&self, order_id: Uuid, plan: F) -> Result<Transitioned, AppError>
    where
        F: FnOnce(&Order) -> Result<Transition, AppError>,
    {
        let order = self.get(order_id).await?;
        let transition = plan(&order)?;
        let (from, to) = (order.status, transition.to);

        if !can_transition(from, to) {
            self.metrics.record_transition(to.as_str(), "invalid");
            let allowed: Vec<&str> = next_statuses(from).iter().map(|s| s.as_str()).collect();
            return Err(AppError::InvalidState(format!(
                "order {order_id} cannot move from {from} to {to} (allowed: [{}])",
                allowed.join(", ")
            )));
        }

        let now = Utc::now();
        let version = order.status_version;
        let applied = match transition.write {
            Write::Status {
                driver,
                cancel_reason,
                actual_fee,
            } => {
                let update = StatusUpdate {
                    from,
                    to,
                    expected_version: version,
                    driver,
                    cancel_reason,
                    actual_fee,
                    at: now,
                };
                self.store.update_status(order_id, update).await?
            }
            Write::Claim { driver_id } => {
                self.store
                    .claim_scheduled(order_id, &driver_id, version, now)
                    .await?
            }
            Write::Reopen { bonus_delta } => {
                self.store
                    .reopen_scheduled(order_id, version, bonus_delta, now)
                    .await?
            }
        };

        if !applied {
            self.metrics.record_transition(to.as_str(), "conflict");
            debug!(order_id = %order_id, %from, %to, version, "lost transition race");
            return Err(AppError::Conflict(format!(
                "order {order_id} changed while moving from {from} to {to}"
            )));
        }

        self.metrics.record_transition(to.as_str(), "applied");
        info!(
            order_id = %order_id,
            %from,
            %to,
            actor = ?transition.actor.actor_type(),
            version = version + 1,
            "order transitioned"
        );
        self.record_event(OrderEvent::new(order_id, from, to, &transition.actor, now))
            .await;

        Ok(Transitioned {
            order_id,
            from,
            to,
            status_version: version + 1,
        })
    }

    /// The audit log is observability: a failed append is logged, never
    /// allowed to undo or block the transition it describes.
    pub(crate) async fn record_event(&self, event: OrderEvent) {
        let (order_id, to) = (event.order_id, event.to_status);
        if let Err(err) = self.store.append_event(event).await {
            warn!(order_id = %order_id, to = %to, error = %err, "failed to append order event");
        }
    }
}

pub(crate) fn passenger_cancel(actor: Actor, reason: Option<String>) -> Transition {
    Transition::to(OrderStatus::Cancelled, actor)
        .driver(DriverChange::Clear)
        .cancel_reason(reason)
}

pub(crate) fn require_id(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

pub(crate) fn validate_trip(
    passenger_id: &str,
    ride_type: &str,
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
) -> Result<(), AppError> {
    require_id("passenger_id", passenger_id)?;
    require_id("ride_type", ride_type)?;
    if !pickup.is_valid() || !dropoff.is_valid() {
        return Err(AppError::BadRequest(
            "pickup and dropoff must be valid coordinates".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_owner(order: &Order, passenger_id: &str) -> Result<(), AppError> {
    if order.passenger_id != passenger_id {
        return Err(AppError::InvalidState(format!(
            "order {} belongs to another passenger",
            order.id
        )));
    }
    Ok(())
}

pub(crate) fn ensure_assigned_driver(order: &Order, driver_id: &str) -> Result<(), AppError> {
    if !order.is_driven_by(driver_id) {
        return Err(AppError::InvalidState(format!(
            "driver {driver_id} is not assigned to order {}",
            order.id
        )));
    }
    Ok(())
}

pub(crate) fn ensure_unchanged(order: &Order, seen_version: i64) -> Result<(), AppError> {
    if order.status_version != seen_version {
        return Err(AppError::Conflict(format!(
            "order {} moved on from version {seen_version} to {}",
            order.id, order.status_version
        )));
    }
    Ok(())
}
