use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::matching::service::MatchingService;
use crate::matching::store::InMemoryMatchingStore;
use crate::notify::{ChannelNotifier, DriverNotification};
use crate::observability::metrics::Metrics;
use crate::order::service::OrderService;
use crate::order::store::InMemoryOrderStore;
use crate::pricing::FareModel;

pub struct AppState {
    pub orders: Arc<OrderService>,
    pub matching: Arc<MatchingService>,
    pub notifications_tx: broadcast::Sender<DriverNotification>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wires both services over the in-memory stores, metered fares and the
    /// websocket notification channel.
    pub fn new(config: &Config) -> Self {
        let metrics = Arc::new(Metrics::new());
        let (notifications_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        let orders = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(FareModel::default()),
            config.orders.clone(),
            metrics.clone(),
        ));
        let matching = Arc::new(MatchingService::new(
            Arc::new(InMemoryMatchingStore::new()),
            orders.clone(),
            Arc::new(ChannelNotifier::new(notifications_tx.clone())),
            config.matching.clone(),
            metrics.clone(),
        ));

        Self {
            orders,
            matching,
            notifications_tx,
            metrics,
        }
    }
}
