use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification to driver {driver_id} failed: {reason}")]
    Delivery { driver_id: String, reason: String },
}

/// Which escalation step produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTier {
    Initial,
    WideBroadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverNotification {
    pub driver_id: String,
    pub order_id: Uuid,
    pub tier: DispatchTier,
    pub sent_at: DateTime<Utc>,
}

/// Best-effort push to a driver. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_driver(
        &self,
        driver_id: &str,
        order_id: Uuid,
        tier: DispatchTier,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_driver(
        &self,
        driver_id: &str,
        order_id: Uuid,
        _tier: DispatchTier,
    ) -> Result<(), NotifyError> {
        tracing::debug!(driver_id, order_id = %order_id, "notification skipped");
        Ok(())
    }
}

/// Publishes notifications on a broadcast channel; websocket clients subscribe to it.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<DriverNotification>,
}

impl ChannelNotifier {
    pub fn new(tx: broadcast::Sender<DriverNotification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_driver(
        &self,
        driver_id: &str,
        order_id: Uuid,
        tier: DispatchTier,
    ) -> Result<(), NotifyError> {
        let notification = DriverNotification {
            driver_id: driver_id.to_string(),
            order_id,
            tier,
            sent_at: Utc::now(),
        };
        // No subscribers just means nobody is listening right now.
        if self.tx.send(notification).is_err() {
            tracing::debug!(driver_id, order_id = %order_id, "no notification subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::{ChannelNotifier, DispatchTier, NoopNotifier, Notifier};

    #[tokio::test]
    async fn channel_notifier_publishes_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(8);
        let notifier = ChannelNotifier::new(tx);
        let order_id = Uuid::new_v4();

        notifier
            .notify_driver("d1", order_id, DispatchTier::Initial)
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.driver_id, "d1");
        assert_eq!(received.order_id, order_id);
        assert_eq!(received.tier, DispatchTier::Initial);
    }

    #[tokio::test]
    async fn channel_notifier_without_subscribers_is_not_an_error() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let notifier = ChannelNotifier::new(tx);

        assert!(
            notifier
                .notify_driver("d1", Uuid::new_v4(), DispatchTier::WideBroadcast)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn noop_notifier_accepts_everything() {
        assert!(
            NoopNotifier
                .notify_driver("d1", Uuid::new_v4(), DispatchTier::Initial)
                .await
                .is_ok()
        );
    }
}
