//! Tests for [`ServiceConfig`] loading, validation and conversion.

use super::*;
use serial_test::serial;
use std::io::Write;

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// ============================================================================
// Defaults
// ============================================================================

mod defaults {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_broker_is_in_memory() {
        let config = ServiceConfig::default();

        assert_eq!(config.broker.endpoint, "memory://local");
        assert!(matches!(
            config.provider_config().unwrap(),
            ProviderConfig::InMemory(_)
        ));
    }

    #[test]
    fn test_ingress_destination_defaults_to_source_queue() {
        let config = ServiceConfig::default();

        assert_eq!(
            config.destination_queue().unwrap(),
            config.source_queue().unwrap()
        );
        assert_eq!(config.source_queue().unwrap().as_str(), "relay-inbound");
    }

    #[test]
    fn test_default_validation_threshold_is_ten() {
        let config = ServiceConfig::default();

        assert_eq!(config.validation.min_length, 10);
        assert_eq!(config.validation.text_field.as_deref(), Some("name"));
    }
}

// ============================================================================
// Loading
// ============================================================================

mod loading {
    use super::*;

    #[test]
    #[serial]
    fn test_explicit_file_overrides_defaults() {
        let file = yaml_file(
            r#"
server:
  port: 9191
broker:
  queue: orders
  forward_to: orders-processed
emitter:
  capacity: 3
validation:
  min_length: 4
  text_field: null
"#,
        );

        let config = ServiceConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.server.port, 9191);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.broker.queue, "orders");
        assert_eq!(config.broker.forward_to.as_deref(), Some("orders-processed"));
        assert_eq!(config.emitter.capacity, 3);
        assert_eq!(config.validation.min_length, 4);
        assert!(config.validation.text_field.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = yaml_file("broker:\n  queue: from-file\n");
        std::env::set_var("RELAY__BROKER__QUEUE", "from-env");

        let result = ServiceConfig::load(Some(file.path()));
        std::env::remove_var("RELAY__BROKER__QUEUE");

        assert_eq!(result.unwrap().broker.queue, "from-env");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let result = ServiceConfig::load(Some(Path::new("/nonexistent/relay/service.yaml")));

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    #[serial]
    fn test_credential_is_read_but_never_printed() {
        let file = yaml_file("broker:\n  credential: s3cr3t-value\n");

        let config = ServiceConfig::load(Some(file.path())).unwrap();
        let credential = config.broker.credential.as_ref().unwrap();

        assert_eq!(credential.expose_secret(), "s3cr3t-value");
        let debug_str = format!("{:?}", config);
        assert!(
            !debug_str.contains("s3cr3t-value"),
            "debug output must not leak the credential: {debug_str}"
        );
        assert!(debug_str.contains("<REDACTED>"));

        let json = serde_json::to_string(&config.broker).unwrap();
        assert!(!json.contains("s3cr3t-value"));
    }
}

// ============================================================================
// Validation
// ============================================================================

mod validation {
    use super::*;

    fn assert_invalid(config: ServiceConfig) {
        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Invalid { .. })),
            "expected Invalid, got: {:?}",
            result
        );
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut config = ServiceConfig::default();
        config.emitter.capacity = 0;
        assert_invalid(config);
    }

    #[test]
    fn test_zero_receive_timeout_is_rejected() {
        let mut config = ServiceConfig::default();
        config.relay.receive_timeout_ms = 0;
        assert_invalid(config);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = ServiceConfig::default();
        config.relay.max_concurrent_dispositions = 0;
        assert_invalid(config);
    }

    #[test]
    fn test_invalid_queue_name_is_rejected() {
        let mut config = ServiceConfig::default();
        config.broker.queue = "not a queue!".to_string();
        assert_invalid(config);
    }

    #[test]
    fn test_forwarding_to_source_queue_is_rejected() {
        let mut config = ServiceConfig::default();
        config.broker.forward_to = Some(config.broker.queue.clone());
        assert_invalid(config);
    }

    #[test]
    fn test_empty_credential_is_rejected() {
        let mut config = ServiceConfig::default();
        config.broker.credential = Some(BrokerCredential::new(""));
        assert_invalid(config);
    }

    #[test]
    fn test_unsupported_scheme_is_a_provider_error() {
        let mut config = ServiceConfig::default();
        config.broker.endpoint = "amqps://broker.example.com".to_string();

        assert!(matches!(config.validate(), Err(ConfigError::Provider(_))));
    }

    #[test]
    fn test_unparseable_endpoint_is_a_provider_error() {
        let mut config = ServiceConfig::default();
        config.broker.endpoint = "not a url".to_string();

        assert!(matches!(config.validate(), Err(ConfigError::Provider(_))));
    }
}

// ============================================================================
// Conversion to component settings
// ============================================================================

mod conversion {
    use super::*;

    #[test]
    fn test_relay_config_carries_loop_settings() {
        let mut config = ServiceConfig::default();
        config.relay.receive_timeout_ms = 250;
        config.relay.max_concurrent_dispositions = 4;
        config.broker.forward_to = Some("relay-outbound".to_string());

        let relay = config.relay_config().unwrap();

        assert_eq!(relay.queue.as_str(), "relay-inbound");
        assert_eq!(relay.receive_timeout, Duration::from_millis(250));
        assert_eq!(relay.max_concurrent_dispositions, 4);
        assert_eq!(
            relay.forward_to.as_ref().map(|q| q.as_str()),
            Some("relay-outbound")
        );
    }

    #[test]
    fn test_emitter_config_carries_capacity_and_retry() {
        let mut config = ServiceConfig::default();
        config.emitter.capacity = 7;
        config.emitter.max_send_attempts = 2;

        let emitter = config.emitter_config();

        assert_eq!(emitter.capacity, 7);
        assert_eq!(emitter.retry_policy.max_attempts, 2);
    }

    #[test]
    fn test_in_memory_tuning_is_applied() {
        let mut config = ServiceConfig::default();
        config.broker.lock_duration_seconds = 5;
        config.broker.max_delivery_count = 3;

        let ProviderConfig::InMemory(memory) = config.provider_config().unwrap();

        assert_eq!(memory.lock_duration, Duration::from_secs(5));
        assert_eq!(memory.max_delivery_count, 3);
    }
}
