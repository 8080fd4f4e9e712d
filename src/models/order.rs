use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

pub const DEFAULT_CURRENCY: &str = "TWD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Virtual status an order has before it is persisted. Only ever seen as
    /// the `from_status` of the creation event.
    None,
    Scheduled,
    Waiting,
    Assigned,
    Approaching,
    Arrived,
    Driving,
    Payment,
    Complete,
    Cancelled,
    Denied,
    Expired,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        OrderStatus::None,
        OrderStatus::Scheduled,
        OrderStatus::Waiting,
        OrderStatus::Assigned,
        OrderStatus::Approaching,
        OrderStatus::Arrived,
        OrderStatus::Driving,
        OrderStatus::Payment,
        OrderStatus::Complete,
        OrderStatus::Cancelled,
        OrderStatus::Denied,
        OrderStatus::Expired,
    ];

    /// Statuses that block the passenger from opening another order.
    pub const ACTIVE: [OrderStatus; 8] = [
        OrderStatus::Scheduled,
        OrderStatus::Waiting,
        OrderStatus::Assigned,
        OrderStatus::Approaching,
        OrderStatus::Arrived,
        OrderStatus::Driving,
        OrderStatus::Payment,
        OrderStatus::Denied,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::None => "none",
            OrderStatus::Scheduled => "scheduled",
            OrderStatus::Waiting => "waiting",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Approaching => "approaching",
            OrderStatus::Arrived => "arrived",
            OrderStatus::Driving => "driving",
            OrderStatus::Payment => "payment",
            OrderStatus::Complete => "complete",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Denied => "denied",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Whether an order in this status has a driver attached.
    pub fn holds_driver(&self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::Approaching
                | OrderStatus::Arrived
                | OrderStatus::Driving
                | OrderStatus::Payment
                | OrderStatus::Complete
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| format!("unknown order status: {raw}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Instant,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn zero() -> Self {
        Self::new(0, DEFAULT_CURRENCY)
    }
}

/// Fields only scheduled orders carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDetails {
    pub scheduled_at: DateTime<Utc>,
    pub window_mins: i64,
    pub cancel_deadline_at: DateTime<Utc>,
    pub incentive_bonus: i64,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl ScheduleDetails {
    /// `None` when the window pushes either edge outside the representable range.
    pub fn new(scheduled_at: DateTime<Utc>, window_mins: i64) -> Option<Self> {
        let window = TimeDelta::try_minutes(window_mins)?;
        scheduled_at.checked_add_signed(window)?;
        Some(Self {
            scheduled_at,
            window_mins,
            cancel_deadline_at: scheduled_at.checked_sub_signed(window)?,
            incentive_bonus: 0,
            assigned_at: None,
        })
    }

    /// Pickup time plus the window: past this point an unclaimed order expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
            .checked_add_signed(TimeDelta::try_minutes(self.window_mins)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub passenger_id: String,
    pub driver_id: Option<String>,
    pub status: OrderStatus,
    pub status_version: i64,
    pub order_type: OrderType,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub ride_type: String,
    pub estimated_fee: Money,
    pub actual_fee: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub schedule: Option<ScheduleDetails>,
}

impl Order {
    pub fn instant(
        passenger_id: String,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        ride_type: String,
        estimated_fee: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            passenger_id,
            driver_id: None,
            status: OrderStatus::Waiting,
            status_version: 0,
            order_type: OrderType::Instant,
            pickup,
            dropoff,
            ride_type,
            estimated_fee,
            actual_fee: None,
            created_at: now,
            updated_at: now,
            matched_at: None,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            schedule: None,
        }
    }

    pub fn scheduled(
        passenger_id: String,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        ride_type: String,
        estimated_fee: Money,
        schedule: ScheduleDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: OrderStatus::Scheduled,
            order_type: OrderType::Scheduled,
            schedule: Some(schedule),
            ..Self::instant(passenger_id, pickup, dropoff, ride_type, estimated_fee, now)
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.order_type == OrderType::Scheduled
    }

    pub fn incentive_bonus(&self) -> i64 {
        self.schedule
            .as_ref()
            .map(|schedule| schedule.incentive_bonus)
            .unwrap_or(0)
    }

    pub fn is_driven_by(&self, driver_id: &str) -> bool {
        self.driver_id.as_deref() == Some(driver_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::{OrderStatus, ScheduleDetails};

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("matched".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn driver_statuses_are_exactly_the_assigned_span() {
        let holding: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(|status| status.holds_driver())
            .collect();
        assert_eq!(
            holding,
            vec![
                OrderStatus::Assigned,
                OrderStatus::Approaching,
                OrderStatus::Arrived,
                OrderStatus::Driving,
                OrderStatus::Payment,
                OrderStatus::Complete,
            ]
        );
    }

    #[test]
    fn terminal_statuses_are_never_active() {
        for status in OrderStatus::ALL {
            if status.is_terminal() {
                assert!(!status.is_active(), "{status} is terminal and active");
            }
        }
        assert!(!OrderStatus::None.is_active());
    }

    #[test]
    fn cancel_deadline_is_window_before_pickup() {
        let pickup = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let schedule = ScheduleDetails::new(pickup, 45).unwrap();

        assert_eq!(schedule.cancel_deadline_at, pickup - TimeDelta::minutes(45));
        assert_eq!(schedule.expires_at(), Some(pickup + TimeDelta::minutes(45)));
        assert_eq!(schedule.incentive_bonus, 0);
    }

    #[test]
    fn window_past_the_calendar_edge_is_unrepresentable() {
        let pickup = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert!(ScheduleDetails::new(pickup, 1_000_000_000_000).is_none());
        assert!(ScheduleDetails::new(pickup, 137_270_000_000).is_none());

        let stored = ScheduleDetails {
            scheduled_at: pickup,
            window_mins: i64::MAX,
            cancel_deadline_at: pickup,
            incentive_bonus: 0,
            assigned_at: None,
        };
        assert_eq!(stored.expires_at(), None);
    }
}
