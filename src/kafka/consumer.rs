use anyhow::{Context, Result};
use pulse_config::KafkaConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::time::Duration;
use tracing::{error, info, warn};

use super::create_client_config;
use crate::model::BusEvent;

/// Kafka consumer for the notification event topic.
///
/// Configured for:
/// - Manual offset commits (after the batch is durably stored)
/// - Consumer group coordination (replicas share partitions)
/// - Auto-rebalancing on replica addition/removal
pub struct EventConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl EventConsumer {
    /// Create a new Kafka consumer and subscribe to the event topic.
    ///
    /// `enable.auto.commit=false` is the load-bearing setting: the offset
    /// only advances through `commit()` after the store accepted the batch,
    /// so a crash replays uncommitted events instead of losing them.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            consumer_group = %config.consumer_group,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = create_client_config(config)?
            .set("group.id", &config.consumer_group)
            // Offset management
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            // Performance
            .set("fetch.min.bytes", "1")
            .set("fetch.wait.max.ms", "500")
            .set("max.partition.fetch.bytes", "1048576") // 1MB
            // Session management
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.topic])
            .context("Failed to subscribe to Kafka topic")?;

        info!("Kafka consumer initialized successfully");

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    /// Poll for the next event.
    ///
    /// Returns `None` when `max_wait` expires without a message (keeps the
    /// caller responsive to cancellation) and when a message arrives but is
    /// malformed; malformed payloads are logged and dropped per-row.
    pub async fn poll(&self, max_wait: Duration) -> Result<Option<BusEvent>> {
        let message = match tokio::time::timeout(max_wait, self.consumer.recv()).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                error!(error = %e, topic = %self.topic, "Kafka consumer error");
                return Err(anyhow::anyhow!("Consumer error: {}", e));
            }
            Err(_) => return Ok(None),
        };

        let payload = match message.payload() {
            Some(payload) => payload,
            None => {
                warn!(topic = %self.topic, "message with empty payload, skipping");
                return Ok(None);
            }
        };

        match serde_json::from_slice::<BusEvent>(payload) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                error!(
                    error = %e,
                    raw = %String::from_utf8_lossy(payload),
                    "failed to deserialize bus event, skipping"
                );
                Ok(None)
            }
        }
    }

    /// Commit the current consumer state (after a successful store flush).
    ///
    /// If the process crashes before committing, events since the last
    /// commit are redelivered; duplicates are tolerated downstream.
    pub fn commit(&self) -> Result<()> {
        self.consumer
            .commit_consumer_state(rdkafka::consumer::CommitMode::Sync)
            .context("Failed to commit offsets")?;
        Ok(())
    }
}
