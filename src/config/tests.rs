use super::*;
use std::io::Write;

use serial_test::serial;

use crate::bus::MessagingType;
use crate::cache::CacheType;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.channel.name, "alerts");
    assert_eq!(config.channel.partitions, 1);
    assert_eq!(config.channel.consumer_group, "alert-fanout");
    assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
    assert_eq!(config.cache.cache_type, CacheType::Memory);
    assert_eq!(config.startup.connect_attempts, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_for_test_does_not_retry() {
    let config = Config::for_test();
    assert_eq!(config.startup.connect_attempts, 1);
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_zero_capacity() {
    let mut config = Config::default();
    config.cache.capacity = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_validate_rejects_blank_channel() {
    let mut config = Config::default();
    config.channel.name = " ".to_string();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_load_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
channel:
  name: mrt-alerts
  partitions: 3
messaging:
  type: kafka
  kafka:
    bootstrap_servers: "broker:9092"
cache:
  type: redis
  capacity: 25
  redis:
    url: "redis://cache:6379"
"#
    )
    .unwrap();

    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.channel.name, "mrt-alerts");
    assert_eq!(config.channel.partitions, 3);
    assert_eq!(config.channel.replication, 1);
    assert_eq!(config.messaging.messaging_type, MessagingType::Kafka);
    assert_eq!(config.messaging.kafka.bootstrap_servers, "broker:9092");
    assert_eq!(config.messaging.kafka.topic_prefix, "alerts");
    assert_eq!(config.cache.cache_type, CacheType::Redis);
    assert_eq!(config.cache.capacity, 25);
    assert_eq!(config.cache.redis.url, "redis://cache:6379");
}

#[test]
#[serial]
fn test_env_overrides_file() {
    std::env::set_var("ALERT_FANOUT__CACHE__CAPACITY", "4");
    std::env::set_var("ALERT_FANOUT__CHANNEL__CONSUMER_GROUP", "ops-console");
    let config = Config::load(None);
    std::env::remove_var("ALERT_FANOUT__CACHE__CAPACITY");
    std::env::remove_var("ALERT_FANOUT__CHANNEL__CONSUMER_GROUP");

    let config = config.unwrap();
    assert_eq!(config.cache.capacity, 4);
    assert_eq!(config.channel.consumer_group, "ops-console");
}

#[test]
#[serial]
fn test_load_rejects_invalid_values() {
    std::env::set_var("ALERT_FANOUT__CACHE__CAPACITY", "0");
    let result = Config::load(None);
    std::env::remove_var("ALERT_FANOUT__CACHE__CAPACITY");

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
