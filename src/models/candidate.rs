use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Passenger,
    Driver,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateType::Passenger => f.write_str("passenger"),
            CandidateType::Driver => f.write_str("driver"),
        }
    }
}

/// An entry in the matching pool. Lives only in the matching store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CandidateType,
    #[serde(default)]
    pub ride_types: Vec<String>,
    pub position: GeoPoint,
    pub joined_at: DateTime<Utc>,
    /// The waiting order a passenger candidate wants matched.
    #[serde(default)]
    pub order_id: Option<Uuid>,
}
