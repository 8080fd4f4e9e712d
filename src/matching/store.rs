//! Candidate pool and dispatch bookkeeping.
//!
//! Dispatch records and broadcast latches carry a TTL so the bookkeeping for
//! long-finished orders does not grow without bound. Expired entries read as
//! absent and are dropped by [`MatchingStore::evict_expired`].

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::geo::{GeoPoint, haversine_km};
use crate::models::candidate::{Candidate, CandidateType};

pub const DISPATCH_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSizes {
    pub drivers: usize,
    pub passengers: usize,
}

#[async_trait]
pub trait MatchingStore: Send + Sync {
    /// Inserts or replaces the candidate with the same id and type.
    async fn add_candidate(&self, candidate: Candidate) -> Result<(), StoreError>;

    /// Returns whether a candidate was removed.
    async fn remove_candidate(&self, id: &str, kind: CandidateType) -> Result<bool, StoreError>;

    /// Driver ids within `radius_km` of `point`, nearest first.
    async fn nearby_drivers(&self, point: &GeoPoint, radius_km: f64)
    -> Result<Vec<String>, StoreError>;

    /// Passenger candidates, longest waiting first.
    async fn waiting_passengers(&self) -> Result<Vec<Candidate>, StoreError>;

    async fn pool_sizes(&self) -> Result<PoolSizes, StoreError>;

    /// Stamps the first dispatch time of an order and adds `driver_ids` to its
    /// notified set. Later calls never move the timestamp.
    async fn record_dispatch(
        &self,
        order_id: Uuid,
        driver_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_dispatched_at(&self, order_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn notified_drivers(&self, order_id: Uuid) -> Result<HashSet<String>, StoreError>;

    /// Sets the broadcast latch. Returns `true` only for the call that set it.
    async fn mark_order_broadcast(&self, order_id: Uuid, at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    async fn is_order_broadcast(&self, order_id: Uuid) -> Result<bool, StoreError>;

    /// Drops dispatch records and latches past their TTL. Returns how many went.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct DispatchRecord {
    dispatched_at: DateTime<Utc>,
    notified: HashSet<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryMatchingStore {
    drivers: DashMap<String, Candidate>,
    passengers: DashMap<String, Candidate>,
    dispatches: DashMap<Uuid, DispatchRecord>,
    broadcasts: DashMap<Uuid, DateTime<Utc>>,
}

impl InMemoryMatchingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, kind: CandidateType) -> &DashMap<String, Candidate> {
        match kind {
            CandidateType::Driver => &self.drivers,
            CandidateType::Passenger => &self.passengers,
        }
    }

    fn live_dispatch(&self, order_id: Uuid) -> Option<DispatchRecord> {
        self.dispatches
            .get(&order_id)
            .filter(|record| record.expires_at > Utc::now())
            .map(|record| record.value().clone())
    }
}

fn ttl() -> Duration {
    Duration::days(DISPATCH_TTL_DAYS)
}

#[async_trait]
impl MatchingStore for InMemoryMatchingStore {
    async fn add_candidate(&self, candidate: Candidate) -> Result<(), StoreError> {
        self.pool(candidate.kind)
            .insert(candidate.id.clone(), candidate);
        Ok(())
    }

    async fn remove_candidate(&self, id: &str, kind: CandidateType) -> Result<bool, StoreError> {
        Ok(self.pool(kind).remove(id).is_some())
    }

    async fn nearby_drivers(
        &self,
        point: &GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut nearby: Vec<(f64, String)> = self
            .drivers
            .iter()
            .map(|entry| (haversine_km(point, &entry.position), entry.key().clone()))
            .filter(|(distance, _)| *distance <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        Ok(nearby.into_iter().map(|(_, id)| id).collect())
    }

    async fn waiting_passengers(&self) -> Result<Vec<Candidate>, StoreError> {
        let mut passengers: Vec<Candidate> = self
            .passengers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        passengers.sort_by_key(|candidate| candidate.joined_at);
        Ok(passengers)
    }

    async fn pool_sizes(&self) -> Result<PoolSizes, StoreError> {
        Ok(PoolSizes {
            drivers: self.drivers.len(),
            passengers: self.passengers.len(),
        })
    }

    async fn record_dispatch(
        &self,
        order_id: Uuid,
        driver_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut record = self
            .dispatches
            .entry(order_id)
            .or_insert_with(|| DispatchRecord {
                dispatched_at: at,
                notified: HashSet::new(),
                expires_at: at + ttl(),
            });
        record.notified.extend(driver_ids.iter().cloned());
        Ok(())
    }

    async fn get_dispatched_at(&self, order_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.live_dispatch(order_id).map(|record| record.dispatched_at))
    }

    async fn notified_drivers(&self, order_id: Uuid) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .live_dispatch(order_id)
            .map(|record| record.notified)
            .unwrap_or_default())
    }

    async fn mark_order_broadcast(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut newly_set = false;
        self.broadcasts.entry(order_id).or_insert_with(|| {
            newly_set = true;
            at + ttl()
        });
        Ok(newly_set)
    }

    async fn is_order_broadcast(&self, order_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .broadcasts
            .get(&order_id)
            .is_some_and(|expires_at| *expires_at > Utc::now()))
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.dispatches.len() + self.broadcasts.len();
        self.dispatches.retain(|_, record| record.expires_at > now);
        self.broadcasts.retain(|_, expires_at| *expires_at > now);
        Ok(before - (self.dispatches.len() + self.broadcasts.len()))
    }
}
