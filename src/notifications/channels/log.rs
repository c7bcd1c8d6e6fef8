//! Channel that writes events to the tracing log

use async_trait::async_trait;

use super::{Channel, ChannelResult, DeliveryStatus};
use crate::notifications::{JobEvent, JobEventKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

impl LogChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &JobEvent) -> ChannelResult<DeliveryStatus> {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.kind {
            JobEventKind::JobFailed => tracing::error!(
                event = %event.kind,
                job_id = %event.job_id,
                metadata = %metadata,
                "{}",
                event.message
            ),
            _ => tracing::info!(
                event = %event.kind,
                job_id = %event.job_id,
                metadata = %metadata,
                "{}",
                event.message
            ),
        }

        Ok(DeliveryStatus::success("log"))
    }
}
