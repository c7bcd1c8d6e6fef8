//! Notification manager for event fan-out

use std::sync::Arc;

use super::channels::{Channel, DeliveryStatus};
use super::{JobEvent, LogChannel, NotificationConfig, WebhookChannel};

/// Dispatches events to every registered channel
#[derive(Default, Clone)]
pub struct NotificationManager {
    /// Registered notification channels
    channels: Vec<Arc<dyn Channel>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build channels from configuration
    pub fn from_config(config: &NotificationConfig) -> Result<Self, String> {
        let mut manager = Self::new();

        if config.log_events {
            manager.add_channel(Arc::new(LogChannel::new()));
        }

        for webhook in &config.webhooks {
            let channel = WebhookChannel::new(webhook.clone()).map_err(|e| e.to_string())?;
            manager.add_channel(Arc::new(channel));
        }

        Ok(manager)
    }

    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Fire-and-forget: deliver on a spawned task and return immediately
    pub fn notify(&self, event: JobEvent) {
        if self.channels.is_empty() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event = %event.kind, "No async runtime, notification dropped");
            return;
        };

        let manager = self.clone();
        handle.spawn(async move {
            manager.deliver(&event).await;
        });
    }

    /// Deliver to every channel and wait for the results
    pub async fn deliver(&self, event: &JobEvent) -> Vec<DeliveryStatus> {
        let sends = self.channels.iter().map(|channel| async move {
            match channel.send(event).await {
                Ok(status) => {
                    if !status.delivered {
                        tracing::warn!(
                            channel = channel.name(),
                            event = %event.kind,
                            status = %status,
                            "Notification not delivered"
                        );
                    }
                    status
                }
                Err(e) => {
                    tracing::error!(
                        channel = channel.name(),
                        event = %event.kind,
                        error = %e,
                        "Failed to send notification to channel"
                    );
                    DeliveryStatus::failure(channel.name(), e.to_string())
                }
            }
        });

        futures::future::join_all(sends).await
    }
}
