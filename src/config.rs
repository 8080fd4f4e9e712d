use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub orders: OrderConfig,
    pub matching: MatchingConfig,
}

/// Timings for the order schedulers.
#[derive(Debug, Clone)]
pub struct OrderConfig {
    pub timeout_check_interval: Duration,
    /// How long an instant order may sit in `waiting` before it expires.
    pub waiting_timeout: Duration,
    /// How long an order may sit in `payment` before it is reported overdue.
    pub payment_timeout: Duration,
    pub incentive_interval: Duration,
    pub expire_interval: Duration,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            timeout_check_interval: Duration::from_secs(30),
            waiting_timeout: Duration::from_secs(600),
            payment_timeout: Duration::from_secs(1800),
            incentive_interval: Duration::from_secs(300),
            expire_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub tick: Duration,
    pub radius_km: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(3),
            radius_km: 3.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            orders: OrderConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let radius_km: f64 = parse_or_default("MATCH_RADIUS_KM", 3.0)?;
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(AppError::Internal(format!(
                "invalid MATCH_RADIUS_KM: {radius_km} must be positive"
            )));
        }

        let event_buffer_size: usize = parse_or_default("EVENT_BUFFER_SIZE", 1024)?;
        if event_buffer_size == 0 {
            return Err(AppError::Internal(
                "invalid EVENT_BUFFER_SIZE: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size,
            orders: OrderConfig {
                timeout_check_interval: seconds_or_default("ORDER_TIMEOUT_CHECK_SECONDS", 30)?,
                waiting_timeout: seconds_or_default("ORDER_WAITING_TIMEOUT_SECONDS", 600)?,
                payment_timeout: seconds_or_default("ORDER_PAYMENT_TIMEOUT_SECONDS", 1800)?,
                incentive_interval: seconds_or_default("SCHEDULE_INCENTIVE_INTERVAL_SECONDS", 300)?,
                expire_interval: seconds_or_default("SCHEDULE_EXPIRE_INTERVAL_SECONDS", 60)?,
            },
            matching: MatchingConfig {
                tick: seconds_or_default("MATCH_TICK_SECONDS", 3)?,
                radius_km,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn seconds_or_default(key: &str, default: u64) -> Result<Duration, AppError> {
    let secs: u64 = parse_or_default(key, default)?;
    if secs == 0 {
        return Err(AppError::Internal(format!("invalid {key}: must be > 0")));
    }
    Ok(Duration::from_secs(secs))
}
