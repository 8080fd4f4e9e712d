use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Passenger,
    Driver,
    System,
}

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Actor {
    Passenger(String),
    Driver(String),
    System,
}

impl Actor {
    pub fn actor_type(&self) -> ActorType {
        match self {
            Actor::Passenger(_) => ActorType::Passenger,
            Actor::Driver(_) => ActorType::Driver,
            Actor::System => ActorType::System,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Actor::Passenger(id) | Actor::Driver(id) => Some(id),
            Actor::System => None,
        }
    }
}

/// Append-only audit record, one per applied transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(
        order_id: Uuid,
        from_status: OrderStatus,
        to_status: OrderStatus,
        actor: &Actor,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            from_status,
            to_status,
            actor_type: actor.actor_type(),
            actor_id: actor.id().map(str::to_string),
            created_at,
        }
    }
}
