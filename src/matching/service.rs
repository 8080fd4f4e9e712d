//! Matching: immediate pairing for instant orders and tiered dispatch for
//! scheduled ones.
//!
//! Scheduled dispatch escalates per order, each tier at most once:
//!
//! 1. first sight of an order notifies a handful of nearby drivers;
//! 2. unclaimed 30 seconds later it is left to the public listing;
//! 3. unclaimed inside 24 hours of pickup, a wider ring of drivers is notified.
//!
//! The dispatch timestamp and broadcast latch in [`MatchingStore`] carry the
//! per-order progress between ticks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::engine::run_periodic;
use crate::error::AppError;
use crate::matching::select::pick_random_drivers;
use crate::matching::store::{MatchingStore, PoolSizes};
use crate::models::candidate::{Candidate, CandidateType};
use crate::models::order::{Order, OrderStatus};
use crate::notify::{DispatchTier, Notifier};
use crate::observability::metrics::Metrics;
use crate::order::service::{OrderService, Transitioned};

/// Nearby drivers sampled for the first dispatch.
pub const CANDIDATE_POOL_SIZE: usize = 10;
/// Drivers notified out of that sample.
pub const INITIAL_NOTIFY_COUNT: usize = 5;
pub const WIDE_NOTIFY_COUNT: usize = 10;
pub const WIDE_RADIUS_FACTOR: f64 = 2.0;
pub const PUBLIC_BROADCAST_DELAY_SECS: i64 = 30;
pub const WIDE_BROADCAST_LEAD_HOURS: i64 = 24;
/// How far ahead the scheduler looks for open scheduled orders.
pub const DISPATCH_HORIZON_DAYS: i64 = 7;

/// The slice of the order service matching needs.
#[async_trait]
pub trait OrderMatcher: Send + Sync {
    async fn match_driver(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Order, AppError>;

    async fn list_available_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, AppError>;
}

#[async_trait]
impl OrderMatcher for OrderService {
    async fn match_driver(&self, order_id: Uuid, driver_id: &str) -> Result<Transitioned, AppError> {
        OrderService::match_driver(self, order_id, driver_id).await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        OrderService::get(self, order_id).await
    }

    async fn list_available_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, AppError> {
        OrderService::list_available_scheduled(self, from, to).await
    }
}

/// What one scheduler pass did to a scheduled order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAction {
    Initial { notified: Vec<String> },
    PublicBroadcast,
    WideBroadcast { notified: Vec<String> },
    Idle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchingTick {
    pub initial: usize,
    pub public: usize,
    pub wide: usize,
    pub matched: usize,
    pub dropped: usize,
    pub evicted: usize,
}

pub struct MatchingService {
    store: Arc<dyn MatchingStore>,
    orders: Arc<dyn OrderMatcher>,
    notifier: Arc<dyn Notifier>,
    config: MatchingConfig,
    metrics: Arc<Metrics>,
}

impl MatchingService {
    pub fn new(
        store: Arc<dyn MatchingStore>,
        orders: Arc<dyn OrderMatcher>,
        notifier: Arc<dyn Notifier>,
        config: MatchingConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            orders,
            notifier,
            config,
            metrics,
        }
    }

    pub async fn add_candidate(&self, candidate: Candidate) -> Result<(), AppError> {
        if candidate.id.trim().is_empty() {
            return Err(AppError::BadRequest("candidate id is required".to_string()));
        }
        if !candidate.position.is_valid() {
            return Err(AppError::BadRequest(
                "candidate position must be a valid coordinate".to_string(),
            ));
        }
        if candidate.kind == CandidateType::Passenger && candidate.order_id.is_none() {
            return Err(AppError::BadRequest(
                "passenger candidates must name the order they wait for".to_string(),
            ));
        }

        info!(candidate_id = %candidate.id, kind = %candidate.kind, "candidate joined pool");
        self.store.add_candidate(candidate).await?;
        self.refresh_pool_gauges().await
    }

    pub async fn remove_candidate(&self, id: &str, kind: CandidateType) -> Result<bool, AppError> {
        let removed = self.store.remove_candidate(id, kind).await?;
        if removed {
            debug!(candidate_id = id, %kind, "candidate left pool");
            self.refresh_pool_gauges().await?;
        }
        Ok(removed)
    }

    pub async fn pool_sizes(&self) -> Result<PoolSizes, AppError> {
        Ok(self.store.pool_sizes().await?)
    }

    /// Pairs a waiting passenger with one random driver in range. Returns the
    /// matched driver, or `None` when nobody is close enough yet.
    pub async fn try_immediate_match(&self, candidate: &Candidate) -> Result<Option<String>, AppError> {
        let order_id = match (candidate.kind, candidate.order_id) {
            (CandidateType::Passenger, Some(order_id)) => order_id,
            _ => {
                return Err(AppError::BadRequest(
                    "immediate matching needs a passenger candidate with an order".to_string(),
                ));
            }
        };

        let nearby = self
            .store
            .nearby_drivers(&candidate.position, self.config.radius_km)
            .await?;
        let Some(driver_id) = pick_random_drivers(&nearby, 1).pop() else {
            debug!(order_id = %order_id, "no driver in range");
            return Ok(None);
        };

        self.orders.match_driver(order_id, &driver_id).await?;
        info!(order_id = %order_id, driver_id = %driver_id, "instant order matched");

        self.store
            .remove_candidate(&driver_id, CandidateType::Driver)
            .await?;
        self.store
            .remove_candidate(&candidate.id, CandidateType::Passenger)
            .await?;
        self.refresh_pool_gauges().await?;

        Ok(Some(driver_id))
    }

    /// One scheduler pass. Per-order failures are logged and skipped so one
    /// bad order cannot stall dispatch for the rest.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<MatchingTick, AppError> {
        let mut report = MatchingTick::default();

        let horizon = now + Duration::days(DISPATCH_HORIZON_DAYS);
        for order in self.orders.list_available_scheduled(now, horizon).await? {
            match self.dispatch_scheduled(&order, now).await {
                Ok(DispatchAction::Initial { .. }) => report.initial += 1,
                Ok(DispatchAction::PublicBroadcast) => report.public += 1,
                Ok(DispatchAction::WideBroadcast { .. }) => report.wide += 1,
                Ok(DispatchAction::Idle) => {}
                Err(err) => warn!(order_id = %order.id, error = %err, "scheduled dispatch failed"),
            }
        }

        for passenger in self.store.waiting_passengers().await? {
            match self.sweep_passenger(&passenger).await {
                Ok(Sweep::Matched) => report.matched += 1,
                Ok(Sweep::Dropped) => report.dropped += 1,
                Ok(Sweep::StillWaiting) => {}
                Err(err) => {
                    warn!(candidate_id = %passenger.id, error = %err, "pool sweep failed")
                }
            }
        }

        report.evicted = self.store.evict_expired(now).await?;
        Ok(report)
    }

    /// Applies the escalation policy to one open scheduled order.
    pub async fn dispatch_scheduled(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<DispatchAction, AppError> {
        let Some(schedule) = order.schedule.as_ref() else {
            return Ok(DispatchAction::Idle);
        };

        let Some(dispatched_at) = self.store.get_dispatched_at(order.id).await? else {
            let notified = self.dispatch_initial(order, now).await?;
            return Ok(DispatchAction::Initial { notified });
        };

        if self.store.is_order_broadcast(order.id).await? {
            return Ok(DispatchAction::Idle);
        }

        if schedule.scheduled_at - now <= Duration::hours(WIDE_BROADCAST_LEAD_HOURS) {
            if !self.store.mark_order_broadcast(order.id, now).await? {
                return Ok(DispatchAction::Idle);
            }
            let notified = self.broadcast_wider(order, now).await?;
            return Ok(DispatchAction::WideBroadcast { notified });
        }

        if now - dispatched_at >= Duration::seconds(PUBLIC_BROADCAST_DELAY_SECS) {
            if self.store.mark_order_broadcast(order.id, now).await? {
                self.metrics
                    .dispatch_tiers_total
                    .with_label_values(&["public"])
                    .inc();
                info!(order_id = %order.id, "scheduled order opened to all drivers");
                return Ok(DispatchAction::PublicBroadcast);
            }
        }

        Ok(DispatchAction::Idle)
    }

    pub async fn run_scheduler(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.tick;
        run_periodic("matching", period, shutdown, self.metrics.clone(), |now| {
            self.tick(now)
        })
        .await;
    }

    async fn dispatch_initial(&self, order: &Order, now: DateTime<Utc>) -> Result<Vec<String>, AppError> {
        let nearby = self
            .store
            .nearby_drivers(&order.pickup, self.config.radius_km)
            .await?;
        let pool = pick_random_drivers(&nearby, CANDIDATE_POOL_SIZE);
        let notified = pick_random_drivers(&pool, INITIAL_NOTIFY_COUNT);

        self.store.record_dispatch(order.id, &notified, now).await?;
        self.metrics
            .dispatch_tiers_total
            .with_label_values(&["initial"])
            .inc();
        info!(
            order_id = %order.id,
            in_range = nearby.len(),
            notified = notified.len(),
            "scheduled order dispatched"
        );

        self.notify_all(&notified, order.id, DispatchTier::Initial).await;
        Ok(notified)
    }

    async fn broadcast_wider(&self, order: &Order, now: DateTime<Utc>) -> Result<Vec<String>, AppError> {
        let already = self.store.notified_drivers(order.id).await?;
        let wider: Vec<String> = self
            .store
            .nearby_drivers(&order.pickup, self.config.radius_km * WIDE_RADIUS_FACTOR)
            .await?
            .into_iter()
            .filter(|driver_id| !already.contains(driver_id))
            .collect();
        let notified = pick_random_drivers(&wider, WIDE_NOTIFY_COUNT);

        self.store.record_dispatch(order.id, &notified, now).await?;
        self.metrics
            .dispatch_tiers_total
            .with_label_values(&["wide"])
            .inc();
        info!(
            order_id = %order.id,
            notified = notified.len(),
            "scheduled order broadcast to a wider radius"
        );

        self.notify_all(&notified, order.id, DispatchTier::WideBroadcast)
            .await;
        Ok(notified)
    }

    async fn notify_all(&self, driver_ids: &[String], order_id: Uuid, tier: DispatchTier) {
        for driver_id in driver_ids {
            let outcome = match self.notifier.notify_driver(driver_id, order_id, tier).await {
                Ok(()) => "sent",
                Err(err) => {
                    warn!(order_id = %order_id, driver_id = %driver_id, error = %err, "driver notification failed");
                    "failed"
                }
            };
            self.metrics
                .driver_notifications_total
                .with_label_values(&[outcome])
                .inc();
        }
    }

    async fn sweep_passenger(&self, passenger: &Candidate) -> Result<Sweep, AppError> {
        let Some(order_id) = passenger.order_id else {
            return Ok(Sweep::StillWaiting);
        };

        let still_waiting = match self.orders.get_order(order_id).await {
            Ok(order) => order.status == OrderStatus::Waiting,
            Err(AppError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };
        if !still_waiting {
            self.remove_candidate(&passenger.id, CandidateType::Passenger)
                .await?;
            return Ok(Sweep::Dropped);
        }

        Ok(match self.try_immediate_match(passenger).await? {
            Some(_) => Sweep::Matched,
            None => Sweep::StillWaiting,
        })
    }

    async fn refresh_pool_gauges(&self) -> Result<(), AppError> {
        let sizes = self.store.pool_sizes().await?;
        self.metrics
            .matching_pool_size
            .with_label_values(&["driver"])
            .set(sizes.drivers as i64);
        self.metrics
            .matching_pool_size
            .with_label_values(&["passenger"])
            .set(sizes.passengers as i64);
        Ok(())
    }
}

enum Sweep {
    Matched,
    Dropped,
    StillWaiting,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{DispatchAction, INITIAL_NOTIFY_COUNT, MatchingService, WIDE_NOTIFY_COUNT};
    use crate::config::{MatchingConfig, OrderConfig};
    use crate::error::AppError;
    use crate::geo::GeoPoint;
    use crate::matching::store::{InMemoryMatchingStore, MatchingStore};
    use crate::models::candidate::{Candidate, CandidateType};
    use crate::models::event::Actor;
    use crate::models::order::{Order, OrderStatus};
    use crate::notify::{DispatchTier, Notifier, NotifyError};
    use crate::observability::metrics::Metrics;
    use crate::order::schedule::NewScheduledOrder;
    use crate::order::service::{NewOrder, OrderService};
    use crate::order::store::InMemoryOrderStore;
    use crate::pricing::ZeroPricing;

    const PICKUP: (f64, f64) = (25.033, 121.565);

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, Uuid, DispatchTier)>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(String, Uuid, DispatchTier)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_driver(
            &self,
            driver_id: &str,
            order_id: Uuid,
            tier: DispatchTier,
        ) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((driver_id.to_string(), order_id, tier));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify_driver(
            &self,
            driver_id: &str,
            _order_id: Uuid,
            _tier: DispatchTier,
        ) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery {
                driver_id: driver_id.to_string(),
                reason: "push gateway down".to_string(),
            })
        }
    }

    struct Harness {
        orders: Arc<OrderService>,
        store: Arc<InMemoryMatchingStore>,
        notifier: Arc<RecordingNotifier>,
        matching: MatchingService,
    }

    fn harness_with(notifier: Arc<dyn Notifier>, recording: Arc<RecordingNotifier>) -> Harness {
        let metrics = Arc::new(Metrics::new());
        let orders = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(ZeroPricing),
            OrderConfig::default(),
            metrics.clone(),
        ));
        let store = Arc::new(InMemoryMatchingStore::new());
        let matching = MatchingService::new(
            store.clone(),
            orders.clone(),
            notifier,
            MatchingConfig::default(),
            metrics,
        );
        Harness {
            orders,
            store,
            notifier: recording,
            matching,
        }
    }

    fn harness() -> Harness {
        let notifier = Arc::new(RecordingNotifier::default());
        harness_with(notifier.clone(), notifier)
    }

    fn driver(id: &str, lat_offset: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            kind: CandidateType::Driver,
            ride_types: vec!["economy".to_string()],
            position: GeoPoint::new(PICKUP.0 + lat_offset, PICKUP.1),
            joined_at: Utc::now(),
            order_id: None,
        }
    }

    fn passenger(id: &str, order_id: Uuid) -> Candidate {
        Candidate {
            id: id.to_string(),
            kind: CandidateType::Passenger,
            ride_types: vec!["economy".to_string()],
            position: GeoPoint::new(PICKUP.0, PICKUP.1),
            joined_at: Utc::now(),
            order_id: Some(order_id),
        }
    }

    /// `near` drivers within ~1.3 km and `far` drivers ~4.4 km out.
    async fn seed_drivers(h: &Harness, near: usize, far: usize) {
        for i in 0..near {
            h.matching
                .add_candidate(driver(&format!("near{i}"), 0.001 * i as f64))
                .await
                .unwrap();
        }
        for i in 0..far {
            h.matching
                .add_candidate(driver(&format!("far{i}"), 0.04 + 0.0001 * i as f64))
                .await
                .unwrap();
        }
    }

    async fn scheduled_order(h: &Harness, passenger: &str, lead: Duration) -> Order {
        h.orders
            .create_scheduled(NewScheduledOrder {
                passenger_id: passenger.to_string(),
                pickup: GeoPoint::new(PICKUP.0, PICKUP.1),
                dropoff: GeoPoint::new(25.0478, 121.5318),
                ride_type: "economy".to_string(),
                scheduled_at: Utc::now() + lead,
                schedule_window_mins: 30,
            })
            .await
            .unwrap()
    }

    async fn instant_order(h: &Harness, passenger: &str) -> Order {
        h.orders
            .create(NewOrder {
                passenger_id: passenger.to_string(),
                pickup: GeoPoint::new(PICKUP.0, PICKUP.1),
                dropoff: GeoPoint::new(25.0478, 121.5318),
                ride_type: "economy".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_tick_notifies_nearby_drivers() {
        let h = harness();
        seed_drivers(&h, 12, 3).await;
        let order = scheduled_order(&h, "p1", Duration::hours(48)).await;

        let report = h.matching.tick(Utc::now()).await.unwrap();
        assert_eq!(report.initial, 1);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), INITIAL_NOTIFY_COUNT);
        let unique: HashSet<_> = sent.iter().map(|(d, _, _)| d.clone()).collect();
        assert_eq!(unique.len(), INITIAL_NOTIFY_COUNT);
        assert!(sent.iter().all(|(d, id, tier)| {
            d.starts_with("near") && *id == order.id && *tier == DispatchTier::Initial
        }));
        assert!(h.store.get_dispatched_at(order.id).await.unwrap().is_some());
        assert_eq!(h.store.notified_drivers(order.id).await.unwrap(), unique);
    }

    #[tokio::test]
    async fn distant_pickup_goes_public_after_thirty_seconds() {
        let h = harness();
        seed_drivers(&h, 3, 0).await;
        let order = scheduled_order(&h, "p1", Duration::hours(48)).await;
        let start = Utc::now();

        assert_eq!(h.matching.tick(start).await.unwrap().initial, 1);
        let early = h.matching.tick(start + Duration::seconds(10)).await.unwrap();
        assert_eq!((early.initial, early.public, early.wide), (0, 0, 0));

        let later = h.matching.tick(start + Duration::seconds(31)).await.unwrap();
        assert_eq!(later.public, 1);
        assert!(h.store.is_order_broadcast(order.id).await.unwrap());

        // Public listing sends nothing itself and never repeats.
        assert_eq!(h.notifier.sent().len(), 3);
        let after = h.matching.tick(start + Duration::seconds(60)).await.unwrap();
        assert_eq!((after.initial, after.public, after.wide), (0, 0, 0));
    }

    #[tokio::test]
    async fn order_within_a_day_gets_a_wider_broadcast_once() {
        let h = harness();
        seed_drivers(&h, 12, 5).await;
        let order = scheduled_order(&h, "p1", Duration::hours(2)).await;
        let start = Utc::now();

        // Dispatch always comes first for an unseen order.
        let first = h.matching.dispatch_scheduled(&order, start).await.unwrap();
        let DispatchAction::Initial { notified: initial } = first.clone() else {
            panic!("expected initial dispatch, got {first:?}");
        };
        assert_eq!(initial.len(), INITIAL_NOTIFY_COUNT);

        let second = h
            .matching
            .dispatch_scheduled(&order, start + Duration::seconds(3))
            .await
            .unwrap();
        let DispatchAction::WideBroadcast { notified: wide } = second.clone() else {
            panic!("expected wide broadcast, got {second:?}");
        };
        assert_eq!(wide.len(), WIDE_NOTIFY_COUNT);
        assert!(wide.iter().all(|d| !initial.contains(d)));

        let third = h
            .matching
            .dispatch_scheduled(&order, start + Duration::seconds(6))
            .await
            .unwrap();
        assert_eq!(third, DispatchAction::Idle);

        let tiers: Vec<_> = h.notifier.sent().into_iter().map(|(_, _, t)| t).collect();
        assert_eq!(
            tiers.iter().filter(|t| **t == DispatchTier::WideBroadcast).count(),
            WIDE_NOTIFY_COUNT
        );
    }

    #[tokio::test]
    async fn repeated_ticks_do_not_redispatch() {
        let h = harness();
        seed_drivers(&h, 8, 0).await;
        scheduled_order(&h, "p1", Duration::hours(48)).await;
        let start = Utc::now();

        h.matching.tick(start).await.unwrap();
        for secs in 1..10 {
            let report = h.matching.tick(start + Duration::seconds(secs)).await.unwrap();
            assert_eq!(report.initial, 0);
        }
        assert_eq!(h.notifier.sent().len(), INITIAL_NOTIFY_COUNT);
    }

    #[tokio::test]
    async fn claimed_order_is_left_alone() {
        let h = harness();
        seed_drivers(&h, 8, 0).await;
        let order = scheduled_order(&h, "p1", Duration::hours(2)).await;
        h.orders.claim_scheduled(order.id, "near0").await.unwrap();

        let report = h.matching.tick(Utc::now()).await.unwrap();
        assert_eq!((report.initial, report.public, report.wide), (0, 0, 0));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatch_without_drivers_still_escalates() {
        let h = harness();
        let order = scheduled_order(&h, "p1", Duration::hours(48)).await;
        let start = Utc::now();

        assert_eq!(h.matching.tick(start).await.unwrap().initial, 1);
        assert!(h.store.get_dispatched_at(order.id).await.unwrap().is_some());
        assert_eq!(
            h.matching
                .tick(start + Duration::seconds(30))
                .await
                .unwrap()
                .public,
            1
        );
    }

    #[tokio::test]
    async fn notifier_failures_do_not_fail_the_tick() {
        let recording = Arc::new(RecordingNotifier::default());
        let h = harness_with(Arc::new(FailingNotifier), recording);
        seed_drivers(&h, 6, 0).await;
        let order = scheduled_order(&h, "p1", Duration::hours(48)).await;

        let report = h.matching.tick(Utc::now()).await.unwrap();
        assert_eq!(report.initial, 1);
        assert_eq!(
            h.store.notified_drivers(order.id).await.unwrap().len(),
            INITIAL_NOTIFY_COUNT
        );
    }

    #[tokio::test]
    async fn immediate_match_pairs_with_a_driver_in_range() {
        let h = harness();
        seed_drivers(&h, 1, 0).await;
        let order = instant_order(&h, "p1").await;
        let candidate = passenger("p1", order.id);
        h.matching.add_candidate(candidate.clone()).await.unwrap();

        let matched = h.matching.try_immediate_match(&candidate).await.unwrap();
        assert_eq!(matched.as_deref(), Some("near0"));

        let stored = h.orders.get(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Approaching);
        assert_eq!(stored.driver_id.as_deref(), Some("near0"));
        assert_eq!(h.matching.pool_sizes().await.unwrap().drivers, 0);
        assert_eq!(h.matching.pool_sizes().await.unwrap().passengers, 0);
    }

    #[tokio::test]
    async fn immediate_match_without_drivers_is_a_no_op() {
        let h = harness();
        seed_drivers(&h, 0, 2).await;
        let order = instant_order(&h, "p1").await;

        let matched = h
            .matching
            .try_immediate_match(&passenger("p1", order.id))
            .await
            .unwrap();
        assert_eq!(matched, None);
        assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Waiting);
    }

    #[tokio::test]
    async fn immediate_match_leaves_claimed_scheduled_orders_alone() {
        let h = harness();
        seed_drivers(&h, 1, 0).await;
        let order = scheduled_order(&h, "p1", Duration::hours(2)).await;
        h.orders.claim_scheduled(order.id, "d1").await.unwrap();

        assert!(matches!(
            h.matching.try_immediate_match(&passenger("p1", order.id)).await,
            Err(AppError::InvalidState(_))
        ));

        let stored = h.orders.get(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Assigned);
        assert_eq!(stored.driver_id.as_deref(), Some("d1"));
        assert_eq!(h.matching.pool_sizes().await.unwrap().drivers, 1);
    }

    #[tokio::test]
    async fn immediate_match_rejects_driver_candidates() {
        let h = harness();
        assert!(matches!(
            h.matching.try_immediate_match(&driver("d1", 0.0)).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn tick_sweeps_waiting_passengers() {
        let h = harness();
        let order = instant_order(&h, "p1").await;
        h.matching
            .add_candidate(passenger("p1", order.id))
            .await
            .unwrap();

        assert_eq!(h.matching.tick(Utc::now()).await.unwrap().matched, 0);

        seed_drivers(&h, 1, 0).await;
        assert_eq!(h.matching.tick(Utc::now()).await.unwrap().matched, 1);
        assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Approaching);
    }

    #[tokio::test]
    async fn tick_drops_passengers_whose_order_moved_on() {
        let h = harness();
        let order = instant_order(&h, "p1").await;
        h.matching
            .add_candidate(passenger("p1", order.id))
            .await
            .unwrap();
        h.orders
            .cancel(order.id, Actor::Passenger("p1".to_string()), None)
            .await
            .unwrap();

        let report = h.matching.tick(Utc::now()).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(h.matching.pool_sizes().await.unwrap().passengers, 0);
    }

    #[tokio::test]
    async fn passengers_need_an_order_to_join() {
        let h = harness();
        let mut candidate = passenger("p1", Uuid::new_v4());
        candidate.order_id = None;

        assert!(matches!(
            h.matching.add_candidate(candidate).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
