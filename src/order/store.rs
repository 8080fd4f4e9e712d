//! Order persistence.
//!
//! Every status write is a compare-and-swap on `(id, status, status_version)`.
//! A swap that finds the row moved on returns `Ok(false)`; deciding what that
//! means is the service's job.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::event::OrderEvent;
use crate::models::order::{Money, Order, OrderStatus};

/// What a status write does to `driver_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverChange {
    Keep,
    Set(String),
    Clear,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub expected_version: i64,
    pub driver: DriverChange,
    pub cancel_reason: Option<String>,
    pub actual_fee: Option<Money>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order. Fails with `DuplicateActive` when the passenger
    /// already holds an order in an active status.
    async fn create(&self, order: Order) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<bool, StoreError>;

    /// `scheduled -> assigned` for `driver_id`.
    async fn claim_scheduled(
        &self,
        id: Uuid,
        driver_id: &str,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `assigned -> scheduled`, dropping the driver and raising the bonus.
    async fn reopen_scheduled(
        &self,
        id: Uuid,
        expected_version: i64,
        bonus_delta: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn append_event(&self, event: OrderEvent) -> Result<(), StoreError>;

    async fn events(&self, order_id: Uuid) -> Result<Vec<OrderEvent>, StoreError>;

    async fn has_active_by_passenger(&self, passenger_id: &str) -> Result<bool, StoreError>;

    /// Scheduled-type orders of a passenger, newest first.
    async fn list_scheduled_by_passenger(&self, passenger_id: &str)
    -> Result<Vec<Order>, StoreError>;

    /// Open (`scheduled`) orders picking up within `[from, to]`, soonest first.
    async fn list_available_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError>;

    /// Orders sitting in `status` since before `updated_before`.
    async fn list_stale(
        &self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError>;

    /// Adds `delta` to the bonus of unclaimed orders whose pickup falls inside
    /// their window from `now`. Returns how many orders were bumped.
    async fn bump_incentive_bonus_for_approaching(
        &self,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Moves unclaimed orders whose window has fully elapsed to `expired`.
    /// Returns the ids that moved.
    async fn expire_overdue_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    by_passenger: DashMap<String, Vec<Uuid>>,
    events: DashMap<Uuid, Vec<OrderEvent>>,
    fail_event_appends: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `append_event` fail, to exercise the
    /// best-effort audit path.
    pub fn set_fail_event_appends(&self, fail: bool) {
        self.fail_event_appends.store(fail, Ordering::SeqCst);
    }

    fn collect<F>(&self, keep: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        self.orders
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn is_active(&self, id: &Uuid) -> bool {
        self.orders
            .get(id)
            .is_some_and(|order| order.status.is_active())
    }
}

fn stamp(order: &mut Order, to: OrderStatus, at: DateTime<Utc>) {
    match to {
        OrderStatus::Approaching => {
            order.matched_at.get_or_insert(at);
            order.accepted_at.get_or_insert(at);
        }
        OrderStatus::Driving => {
            order.started_at.get_or_insert(at);
        }
        OrderStatus::Payment => {
            order.completed_at.get_or_insert(at);
        }
        OrderStatus::Cancelled => {
            order.cancelled_at.get_or_insert(at);
        }
        _ => {}
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: Order) -> Result<(), StoreError> {
        // The passenger entry stays locked until the insert lands, so two
        // concurrent creates for one passenger cannot both pass the check.
        let mut owned = self
            .by_passenger
            .entry(order.passenger_id.clone())
            .or_default();

        if owned.iter().any(|id| self.is_active(id)) {
            return Err(StoreError::DuplicateActive(order.passenger_id));
        }
        if self.orders.contains_key(&order.id) {
            return Err(StoreError::Backend(format!("duplicate order id {}", order.id)));
        }

        owned.push(order.id);
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<bool, StoreError> {
        let Some(mut entry) = self.orders.get_mut(&id) else {
            return Ok(false);
        };
        let order = entry.value_mut();
        if order.status != update.from || order.status_version != update.expected_version {
            return Ok(false);
        }

        order.status = update.to;
        order.status_version += 1;
        order.updated_at = update.at;
        match update.driver {
            DriverChange::Keep => {}
            DriverChange::Set(driver_id) => order.driver_id = Some(driver_id),
            DriverChange::Clear => {
                order.driver_id = None;
                order.matched_at = None;
                order.accepted_at = None;
            }
        }
        if !update.to.holds_driver() {
            order.driver_id = None;
        }
        if let Some(reason) = update.cancel_reason {
            order.cancel_reason = Some(reason);
        }
        if let Some(fee) = update.actual_fee {
            order.actual_fee = Some(fee);
        }
        stamp(order, update.to, update.at);
        Ok(true)
    }

    async fn claim_scheduled(
        &self,
        id: Uuid,
        driver_id: &str,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.orders.get_mut(&id) else {
            return Ok(false);
        };
        let order = entry.value_mut();
        if order.status != OrderStatus::Scheduled || order.status_version != expected_version {
            return Ok(false);
        }
        let Some(schedule) = order.schedule.as_mut() else {
            return Ok(false);
        };

        schedule.assigned_at = Some(at);
        order.status = OrderStatus::Assigned;
        order.status_version += 1;
        order.driver_id = Some(driver_id.to_string());
        order.updated_at = at;
        Ok(true)
    }

    async fn reopen_scheduled(
        &self,
        id: Uuid,
        expected_version: i64,
        bonus_delta: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.orders.get_mut(&id) else {
            return Ok(false);
        };
        let order = entry.value_mut();
        if order.status != OrderStatus::Assigned || order.status_version != expected_version {
            return Ok(false);
        }
        let Some(schedule) = order.schedule.as_mut() else {
            return Ok(false);
        };

        schedule.assigned_at = None;
        schedule.incentive_bonus += bonus_delta;
        order.status = OrderStatus::Scheduled;
        order.status_version += 1;
        order.driver_id = None;
        order.updated_at = at;
        Ok(true)
    }

    async fn append_event(&self, event: OrderEvent) -> Result<(), StoreError> {
        if self.fail_event_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("event log unavailable".to_string()));
        }
        self.events.entry(event.order_id).or_default().push(event);
        Ok(())
    }

    async fn events(&self, order_id: Uuid) -> Result<Vec<OrderEvent>, StoreError> {
        Ok(self
            .events
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn has_active_by_passenger(&self, passenger_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .by_passenger
            .get(passenger_id)
            .is_some_and(|owned| owned.iter().any(|id| self.is_active(id))))
    }

    async fn list_scheduled_by_passenger(
        &self,
        passenger_id: &str,
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders =
            self.collect(|order| order.passenger_id == passenger_id && order.is_scheduled());
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_available_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders = self.collect(|order| {
            order.status == OrderStatus::Scheduled
                && order
                    .schedule
                    .as_ref()
                    .is_some_and(|s| s.scheduled_at >= from && s.scheduled_at <= to)
        });
        orders.sort_by_key(|order| order.schedule.as_ref().map(|s| s.scheduled_at));
        Ok(orders)
    }

    async fn list_stale(
        &self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders =
            self.collect(|order| order.status == status && order.updated_at < updated_before);
        orders.sort_by_key(|order| order.updated_at);
        Ok(orders)
    }

    async fn bump_incentive_bonus_for_approaching(
        &self,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut bumped = 0;
        for mut entry in self.orders.iter_mut() {
            let order = entry.value_mut();
            if order.status != OrderStatus::Scheduled {
                continue;
            }
            let Some(schedule) = order.schedule.as_mut() else {
                continue;
            };
            let Some(lookahead) = TimeDelta::try_minutes(schedule.window_mins)
                .and_then(|window| now.checked_add_signed(window))
            else {
                warn!(
                    order_id = %order.id,
                    window_mins = schedule.window_mins,
                    "schedule window out of range, incentive skipped"
                );
                continue;
            };
            if schedule.scheduled_at > now && schedule.scheduled_at <= lookahead {
                schedule.incentive_bonus += delta;
                bumped += 1;
            }
        }
        Ok(bumped)
    }

    async fn expire_overdue_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut expired = Vec::new();
        for mut entry in self.orders.iter_mut() {
            let order = entry.value_mut();
            if order.status != OrderStatus::Scheduled {
                continue;
            }
            let Some(schedule) = order.schedule.as_ref() else {
                continue;
            };
            let Some(expires_at) = schedule.expires_at() else {
                warn!(
                    order_id = %order.id,
                    window_mins = schedule.window_mins,
                    "schedule window out of range, expiry skipped"
                );
                continue;
            };
            if expires_at < now {
                order.status = OrderStatus::Expired;
                order.status_version += 1;
                order.updated_at = now;
                expired.push(order.id);
            }
        }
        Ok(expired)
    }
}
