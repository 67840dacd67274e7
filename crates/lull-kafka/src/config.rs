//! Kafka consumer configuration

use lull_shared::KafkaConfig;
use rdkafka::config::ClientConfig;

/// Translate the loaded [`KafkaConfig`] into librdkafka consumer settings
pub fn consumer_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.group_id)
        .set("client.id", &config.client_id)
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("enable.auto.commit", config.enable_auto_commit.to_string())
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("enable.partition.eof", "false");

    client_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use lull_shared::LullConfig;

    #[test]
    fn test_consumer_client_config() {
        let mut kafka = LullConfig::default().kafka;
        kafka.bootstrap_servers = "broker-1:9092,broker-2:9092".to_string();

        let client_config = consumer_client_config(&kafka);
        assert_eq!(client_config.get("bootstrap.servers"), Some("broker-1:9092,broker-2:9092"));
        assert_eq!(client_config.get("group.id"), Some("dynamic-cdc-orchestrator"));
        assert_eq!(client_config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client_config.get("enable.auto.commit"), Some("true"));
        assert_eq!(client_config.get("enable.partition.eof"), Some("false"));
    }
}
