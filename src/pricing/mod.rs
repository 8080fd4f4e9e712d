//! Fare estimation capability.
//!
//! The order service only depends on [`Pricing`]. [`FareModel`] is the
//! metered fare used by the binary; [`ZeroPricing`] stands in when no pricing
//! is wired up.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::order::{DEFAULT_CURRENCY, Money};

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("invalid fare request: {0}")]
    InvalidRequest(String),

    #[error("pricing unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FareRequest {
    pub distance_km: f64,
    pub duration_min: f64,
    pub ride_type: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base_fare: i64,
    pub distance_charge: i64,
    pub time_charge: i64,
    pub night_surcharge: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    pub total: Money,
    pub breakdown: FareBreakdown,
}

#[async_trait]
pub trait Pricing: Send + Sync {
    async fn estimate(&self, request: &FareRequest) -> Result<FareQuote, PricingError>;
}

/// Prices everything at zero.
#[derive(Debug, Clone, Default)]
pub struct ZeroPricing;

#[async_trait]
impl Pricing for ZeroPricing {
    async fn estimate(&self, _request: &FareRequest) -> Result<FareQuote, PricingError> {
        Ok(FareQuote {
            total: Money::zero(),
            breakdown: FareBreakdown {
                base_fare: 0,
                distance_charge: 0,
                time_charge: 0,
                night_surcharge: 0,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct FareModel {
    pub base_fare: i64,
    /// Distance covered by the base fare, in metres.
    pub base_distance_m: i64,
    /// Each started step of this many metres past the base distance costs `step_fare`.
    pub step_m: i64,
    pub step_fare: i64,
    pub off_peak_per_min: i64,
    pub peak_per_min: i64,
    pub night_surcharge: i64,
    pub currency: String,
    /// Local offset from UTC, in seconds, used to decide peak and night hours.
    pub utc_offset_secs: i64,
}

impl Default for FareModel {
    fn default() -> Self {
        Self {
            base_fare: 85,
            base_distance_m: 1_250,
            step_m: 200,
            step_fare: 5,
            off_peak_per_min: 3,
            peak_per_min: 5,
            night_surcharge: 25,
            currency: DEFAULT_CURRENCY.to_string(),
            utc_offset_secs: 8 * 3600,
        }
    }
}

impl FareModel {
    pub fn quote(&self, request: &FareRequest) -> Result<FareQuote, PricingError> {
        if !request.distance_km.is_finite() || request.distance_km < 0.0 {
            return Err(PricingError::InvalidRequest(format!(
                "distance_km must be a non-negative number, got {}",
                request.distance_km
            )));
        }
        if !request.duration_min.is_finite() || request.duration_min < 0.0 {
            return Err(PricingError::InvalidRequest(format!(
                "duration_min must be a non-negative number, got {}",
                request.duration_min
            )));
        }

        let distance_m = (request.distance_km * 1000.0).round() as i64;
        let excess_m = (distance_m - self.base_distance_m).max(0);
        let steps = (excess_m + self.step_m - 1) / self.step_m;
        let distance_charge = steps * self.step_fare;

        let local = request.requested_at + Duration::seconds(self.utc_offset_secs);
        let minute_of_day = local.hour() * 60 + local.minute();

        let per_min = if is_peak(minute_of_day) {
            self.peak_per_min
        } else {
            self.off_peak_per_min
        };
        let time_charge = (request.duration_min * per_min as f64).ceil() as i64;

        let night_surcharge = if is_night(minute_of_day) {
            self.night_surcharge
        } else {
            0
        };

        let breakdown = FareBreakdown {
            base_fare: self.base_fare,
            distance_charge,
            time_charge,
            night_surcharge,
        };
        let total = breakdown.base_fare
            + breakdown.distance_charge
            + breakdown.time_charge
            + breakdown.night_surcharge;

        Ok(FareQuote {
            total: Money::new(total, self.currency.clone()),
            breakdown,
        })
    }
}

#[async_trait]
impl Pricing for FareModel {
    async fn estimate(&self, request: &FareRequest) -> Result<FareQuote, PricingError> {
        self.quote(request)
    }
}

// 07:00-09:00 and 16:30-19:00.
fn is_peak(minute_of_day: u32) -> bool {
    (7 * 60..9 * 60).contains(&minute_of_day) || (16 * 60 + 30..19 * 60).contains(&minute_of_day)
}

// 23:00-06:00.
fn is_night(minute_of_day: u32) -> bool {
    minute_of_day >= 23 * 60 || minute_of_day < 6 * 60
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{FareModel, FareRequest, Pricing, ZeroPricing};

    fn request(distance_km: f64, duration_min: f64, utc_hour: u32) -> FareRequest {
        FareRequest {
            distance_km,
            duration_min,
            ride_type: "economy".to_string(),
            // 2026-03-04 is a Wednesday; the model runs at +08:00.
            requested_at: Utc.with_ymd_and_hms(2026, 3, 4, utc_hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn short_off_peak_trip_pays_base_fare_only() {
        let quote = FareModel::default().quote(&request(1.0, 0.0, 4)).unwrap();
        assert_eq!(quote.total.amount, 85);
        assert_eq!(quote.breakdown.distance_charge, 0);
        assert_eq!(quote.total.currency, "TWD");
    }

    #[test]
    fn distance_past_base_is_charged_per_started_step() {
        let quote = FareModel::default().quote(&request(1.65, 0.0, 4)).unwrap();
        assert_eq!(quote.breakdown.distance_charge, 10);
        assert_eq!(quote.total.amount, 95);

        let quote = FareModel::default().quote(&request(1.66, 0.0, 4)).unwrap();
        assert_eq!(quote.breakdown.distance_charge, 15);
    }

    #[test]
    fn peak_hours_raise_the_time_rate() {
        let model = FareModel::default();
        // 00:00 UTC is 08:00 local.
        let peak = model.quote(&request(1.0, 10.0, 0)).unwrap();
        let noon = model.quote(&request(1.0, 10.0, 4)).unwrap();

        assert_eq!(peak.breakdown.time_charge, 50);
        assert_eq!(noon.breakdown.time_charge, 30);
    }

    #[test]
    fn night_rides_carry_a_surcharge() {
        // 16:00 UTC is midnight local.
        let quote = FareModel::default().quote(&request(1.0, 0.0, 16)).unwrap();
        assert_eq!(quote.breakdown.night_surcharge, 25);
        assert_eq!(quote.total.amount, 110);
    }

    #[test]
    fn negative_distance_is_rejected() {
        assert!(FareModel::default().quote(&request(-1.0, 0.0, 4)).is_err());
    }

    #[tokio::test]
    async fn zero_pricing_always_quotes_zero() {
        let quote = ZeroPricing.estimate(&request(42.0, 60.0, 4)).await.unwrap();
        assert_eq!(quote.total.amount, 0);
    }
}
