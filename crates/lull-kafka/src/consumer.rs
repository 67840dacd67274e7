//! rdkafka-backed change source

use crate::config::consumer_client_config;
use async_trait::async_trait;
use chrono::Utc;
use lull_core::{ChangeSource, LullError, RawMessage, Result};
use lull_shared::KafkaConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::time::Duration;
use tracing::{info, instrument};

/// How long startup waits for the brokers to answer a metadata request
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscribed consumer over the mapped CDC topics.
///
/// Starts at the latest offsets: events produced before the subscription
/// are not replayed.
pub struct KafkaChangeSource {
    consumer: StreamConsumer,
    topics: Vec<String>,
}

impl KafkaChangeSource {
    /// Create the consumer, check the brokers answer, and subscribe.
    ///
    /// Blocks the calling thread for up to `connect_timeout`; see
    /// [`KafkaChangeSource::connect_async`].
    #[instrument(skip(config, topics), fields(brokers = %config.bootstrap_servers, group_id = %config.group_id))]
    pub fn connect(config: &KafkaConfig, topics: &[String], connect_timeout: Duration) -> Result<Self> {
        if topics.is_empty() {
            return Err(LullError::Kafka("no topics to subscribe to".into()));
        }

        let consumer: StreamConsumer = consumer_client_config(config)
            .create()
            .map_err(|e| LullError::Kafka(format!("Failed to create consumer: {}", e)))?;

        consumer
            .fetch_metadata(None, connect_timeout)
            .map_err(|e| LullError::Kafka(format!("Brokers unreachable: {}", e)))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| LullError::Kafka(format!("Failed to subscribe: {}", e)))?;

        info!(topics = ?topics, "Created Kafka consumer");

        Ok(Self {
            consumer,
            topics: topics.to_vec(),
        })
    }

    /// [`KafkaChangeSource::connect`] on the blocking thread pool
    pub async fn connect_async(
        config: KafkaConfig,
        topics: Vec<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::connect(&config, &topics, connect_timeout))
            .await
            .map_err(|e| LullError::Internal(format!("connect task failed: {}", e)))?
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

fn to_raw(message: &BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(<[u8]>::to_vec),
        received_at: Utc::now(),
    }
}

#[async_trait]
impl ChangeSource for KafkaChangeSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_raw(&message))),
            Ok(Err(e)) => Err(LullError::Kafka(format!("Receive failed: {}", e))),
        }
    }
}

impl Drop for KafkaChangeSource {
    fn drop(&mut self) {
        self.consumer.unsubscribe();
        info!("Kafka consumer closed");
    }
}
