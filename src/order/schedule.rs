use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::run_periodic;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::event::{Actor, OrderEvent};
use crate::models::order::{Order, OrderStatus, ScheduleDetails};
use crate::order::service::{
    OrderService, Transition, Transitioned, Write, ensure_assigned_driver, ensure_owner,
    ensure_unchanged, passenger_cancel, require_id, validate_trip,
};

/// Added to a scheduled order's bonus every time its driver backs out.
pub const DRIVER_CANCEL_BONUS: i64 = 50;

/// Added by each incentive tick to unclaimed orders inside their window.
pub const INCENTIVE_STEP: i64 = 25;

/// Earliest pickup a scheduled order may ask for, relative to booking time.
pub const MIN_SCHEDULE_LEAD_MINS: i64 = 30;

/// Latest pickup a scheduled order may ask for, relative to booking time.
pub const MAX_SCHEDULE_LEAD_DAYS: i64 = 7;

pub const MAX_SCHEDULE_WINDOW_MINS: i64 = 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct NewScheduledOrder {
    pub passenger_id: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub ride_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub schedule_window_mins: i64,
}

/// What one pass of the timeout monitor did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeoutSweep {
    pub expired: usize,
    pub requeued: usize,
    pub overdue_payments: usize,
}

impl OrderService {
    pub async fn create_scheduled(&self, cmd: NewScheduledOrder) -> Result<Order, AppError> {
        validate_trip(&cmd.passenger_id, &cmd.ride_type, &cmd.pickup, &cmd.dropoff)?;

        let now = Utc::now();
        if cmd.scheduled_at < now + Duration::minutes(MIN_SCHEDULE_LEAD_MINS) {
            return Err(AppError::BadRequest(format!(
                "scheduled_at must be at least {MIN_SCHEDULE_LEAD_MINS} minutes ahead"
            )));
        }
        if cmd.scheduled_at > now + Duration::days(MAX_SCHEDULE_LEAD_DAYS) {
            return Err(AppError::BadRequest(format!(
                "scheduled_at must be within {MAX_SCHEDULE_LEAD_DAYS} days"
            )));
        }
        if !(1..=MAX_SCHEDULE_WINDOW_MINS).contains(&cmd.schedule_window_mins) {
            return Err(AppError::BadRequest(format!(
                "schedule_window_mins must be between 1 and {MAX_SCHEDULE_WINDOW_MINS}"
            )));
        }
        let schedule = ScheduleDetails::new(cmd.scheduled_at, cmd.schedule_window_mins)
            .ok_or_else(|| AppError::BadRequest("schedule window out of range".to_string()))?;

        self.ensure_no_active_order(&cmd.passenger_id).await?;

        // Priced for the pickup time, not the booking time.
        let estimated_fee = self
            .estimate_fee(&cmd.pickup, &cmd.dropoff, &cmd.ride_type, cmd.scheduled_at)
            .await;
        let order = Order::scheduled(
            cmd.passenger_id,
            cmd.pickup,
            cmd.dropoff,
            cmd.ride_type,
            estimated_fee,
            schedule,
            now,
        );

        self.persist_new(order).await
    }

    /// First driver to claim wins; everyone else sees `Conflict` or `InvalidState`.
    pub async fn claim_scheduled(
        &self,
        order_id: Uuid,
        driver_id: &str,
    ) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        self.apply(order_id, |order| {
            ensure_scheduled(order)?;
            Ok(
                Transition::to(OrderStatus::Assigned, Actor::Driver(driver_id.to_string()))
                    .with_write(Write::Claim {
                        driver_id: driver_id.to_string(),
                    }),
            )
        })
        .await
    }

    pub async fn cancel_scheduled_by_passenger(
        &self,
        order_id: Uuid,
        passenger_id: &str,
        reason: Option<String>,
    ) -> Result<Transitioned, AppError> {
        require_id("passenger_id", passenger_id)?;
        self.apply(order_id, |order| {
            ensure_scheduled(order)?;
            ensure_owner(order, passenger_id)?;
            Ok(passenger_cancel(
                Actor::Passenger(passenger_id.to_string()),
                reason.clone(),
            ))
        })
        .await
    }

    /// Hands a claimed order back to the pool with a larger bonus.
    pub async fn cancel_scheduled_by_driver(
        &self,
        order_id: Uuid,
        driver_id: &str,
    ) -> Result<Transitioned, AppError> {
        require_id("driver_id", driver_id)?;
        self.apply(order_id, |order| {
            if order.status != OrderStatus::Assigned {
                return Err(AppError::InvalidState(format!(
                    "order {order_id} is {}, only assigned orders can be handed back",
                    order.status
                )));
            }
            ensure_assigned_driver(order, driver_id)?;
            Ok(driver_reopen(Actor::Driver(driver_id.to_string())))
        })
        .await
    }

    pub async fn list_scheduled_by_passenger(&self, passenger_id: &str) -> Result<Vec<Order>, AppError> {
        require_id("passenger_id", passenger_id)?;
        Ok(self.store.list_scheduled_by_passenger(passenger_id).await?)
    }

    pub async fn list_available_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, AppError> {
        if from > to {
            return Err(AppError::BadRequest("`from` must not be after `to`".to_string()));
        }
        Ok(self.store.list_available_scheduled(from, to).await?)
    }

    /// Expires abandoned waiting orders, re-queues stranded denials and
    /// reports trips stuck in payment.
    pub async fn tick_timeout_monitor(&self, now: DateTime<Utc>) -> Result<TimeoutSweep, AppError> {
        let mut sweep = TimeoutSweep::default();

        let waiting_cutoff = cutoff(now, self.config.waiting_timeout)?;
        for order in self
            .store
            .list_stale(OrderStatus::Waiting, waiting_cutoff)
            .await?
        {
            match self.expire(order.id, order.status_version).await {
                Ok(_) => sweep.expired += 1,
                Err(err) => debug!(order_id = %order.id, error = %err, "waiting order not expired"),
            }
        }

        for order in self.store.list_stale(OrderStatus::Denied, now).await? {
            let seen_version = order.status_version;
            let requeued = self
                .apply(order.id, |current| {
                    ensure_unchanged(current, seen_version)?;
                    Ok(Transition::to(OrderStatus::Waiting, Actor::System))
                })
                .await;
            match requeued {
                Ok(_) => sweep.requeued += 1,
                Err(err) => debug!(order_id = %order.id, error = %err, "denied order not re-queued"),
            }
        }

        let payment_cutoff = cutoff(now, self.config.payment_timeout)?;
        for order in self
            .store
            .list_stale(OrderStatus::Payment, payment_cutoff)
            .await?
        {
            warn!(
                order_id = %order.id,
                passenger_id = %order.passenger_id,
                since = %order.updated_at,
                "payment overdue"
            );
            self.metrics.overdue_payments_total.inc();
            sweep.overdue_payments += 1;
        }

        Ok(sweep)
    }

    /// Raises the bonus of unclaimed orders whose pickup is inside their window.
    pub async fn tick_schedule_incentive(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let bumped = self
            .store
            .bump_incentive_bonus_for_approaching(INCENTIVE_STEP, now)
            .await?;
        if bumped > 0 {
            info!(bumped, step = INCENTIVE_STEP, "raised scheduled order incentives");
        }
        Ok(bumped)
    }

    /// Expires unclaimed orders whose window has fully elapsed.
    pub async fn tick_schedule_expiry(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.store.expire_overdue_scheduled(now).await?;
        for order_id in &expired {
            self.metrics
                .record_transition(OrderStatus::Expired.as_str(), "applied");
            info!(order_id = %order_id, "scheduled order expired unclaimed");
            self.record_event(OrderEvent::new(
                *order_id,
                OrderStatus::Scheduled,
                OrderStatus::Expired,
                &Actor::System,
                now,
            ))
            .await;
        }
        Ok(expired.len())
    }

    pub async fn run_timeout_monitor(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.timeout_check_interval;
        run_periodic(
            "order_timeout_monitor",
            period,
            shutdown,
            self.metrics.clone(),
            |now| self.tick_timeout_monitor(now),
        )
        .await;
    }

    pub async fn run_schedule_incentive_ticker(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.incentive_interval;
        run_periodic(
            "schedule_incentive",
            period,
            shutdown,
            self.metrics.clone(),
            |now| self.tick_schedule_incentive(now),
        )
        .await;
    }

    pub async fn run_schedule_expire_ticker(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.expire_interval;
        run_periodic(
            "schedule_expiry",
            period,
            shutdown,
            self.metrics.clone(),
            |now| self.tick_schedule_expiry(now),
        )
        .await;
    }
}

pub(crate) fn driver_reopen(actor: Actor) -> Transition {
    Transition::to(OrderStatus::Scheduled, actor).with_write(Write::Reopen {
        bonus_delta: DRIVER_CANCEL_BONUS,
    })
}

fn ensure_scheduled(order: &Order) -> Result<(), AppError> {
    if !order.is_scheduled() {
        return Err(AppError::InvalidState(format!(
            "order {} is not a scheduled order",
            order.id
        )));
    }
    Ok(())
}

fn cutoff(now: DateTime<Utc>, timeout: std::time::Duration) -> Result<DateTime<Utc>, AppError> {
    Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .ok_or_else(|| AppError::Internal(format!("timeout {timeout:?} out of range")))
}
