//! The order state machine as data.
//!
//! The adjacency map is built once on first use and never mutated. Actor
//! rules (who may cancel, who may deny) live in the service; this table
//! only answers whether an edge exists.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::models::order::OrderStatus;

const EDGES: &[(OrderStatus, &[OrderStatus])] = &[
    (
        OrderStatus::Scheduled,
        &[
            OrderStatus::Assigned,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ],
    ),
    (
        OrderStatus::Waiting,
        &[
            OrderStatus::Waiting,
            OrderStatus::Approaching,
            OrderStatus::Cancelled,
            OrderStatus::Denied,
            OrderStatus::Expired,
        ],
    ),
    (
        OrderStatus::Assigned,
        &[
            OrderStatus::Approaching,
            OrderStatus::Cancelled,
            OrderStatus::Scheduled,
        ],
    ),
    (
        OrderStatus::Approaching,
        &[
            OrderStatus::Arrived,
            OrderStatus::Cancelled,
            OrderStatus::Waiting,
        ],
    ),
    (
        OrderStatus::Arrived,
        &[OrderStatus::Driving, OrderStatus::Cancelled],
    ),
    (
        OrderStatus::Driving,
        &[OrderStatus::Payment, OrderStatus::Cancelled],
    ),
    (OrderStatus::Payment, &[OrderStatus::Complete]),
    (OrderStatus::Denied, &[OrderStatus::Waiting]),
];

static ALLOWED: LazyLock<HashMap<OrderStatus, HashSet<OrderStatus>>> = LazyLock::new(|| {
    EDGES
        .iter()
        .map(|(from, tos)| (*from, tos.iter().copied().collect()))
        .collect()
});

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    ALLOWED.get(&from).is_some_and(|next| next.contains(&to))
}

pub fn next_statuses(from: OrderStatus) -> Vec<OrderStatus> {
    OrderStatus::ALL
        .into_iter()
        .filter(|to| can_transition(from, *to))
        .collect()
}
