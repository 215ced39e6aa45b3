use std::time::Duration;

use serial_test::serial;
use temp_env::with_vars;

use super::*;
use crate::Error;

fn cleanup_all_discovery_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("DISCOVERY__") || key == "DISCOVERY_CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_config_should_initialize_with_hardcoded_values() {
    let config = DiscoveryConfig::default();

    assert_eq!(config.view_state.min_event_delay_secs, 3);
    assert_eq!(config.view_state.dispatcher_fault_backoff_ms, 5000);
    assert_eq!(config.view_state.async_events_poll_interval_ms, 50);
    assert_eq!(config.view_state.min_event_delay(), Some(Duration::from_secs(3)));
}

#[test]
#[serial]
fn new_should_merge_environment_overrides() {
    cleanup_all_discovery_env_vars();
    with_vars(
        vec![("DISCOVERY__VIEW_STATE__MIN_EVENT_DELAY_SECS", Some("7"))],
        || {
            let config = DiscoveryConfig::new().unwrap();

            assert_eq!(config.view_state.min_event_delay_secs, 7);
            assert_eq!(config.view_state.dispatcher_fault_backoff_ms, 5000);
        },
    );
}

#[test]
#[serial]
fn new_should_load_file_named_by_config_path() {
    cleanup_all_discovery_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("discovery.toml");
    std::fs::write(
        &config_path,
        r#"
        [view_state]
        dispatcher_fault_backoff_ms = 250
        "#,
    )
    .unwrap();

    with_vars(
        vec![("DISCOVERY_CONFIG_PATH", Some(config_path.to_str().unwrap()))],
        || {
            let config = DiscoveryConfig::new().unwrap();

            assert_eq!(config.view_state.dispatcher_fault_backoff_ms, 250);
            assert_eq!(config.view_state.min_event_delay_secs, 3);
        },
    );
}

#[test]
#[serial]
fn with_override_config_should_merge_file_settings() {
    cleanup_all_discovery_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("override.toml");
    std::fs::write(
        &config_path,
        r#"
        [view_state]
        min_event_delay_secs = 0 # disable delaying
        async_events_poll_interval_ms = 10
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let base_config = DiscoveryConfig::new().expect("success");
        let config = base_config
            .with_override_config(config_path.to_str().unwrap())
            .expect("success")
            .validate()
            .expect("valid");

        assert_eq!(config.view_state.min_event_delay(), None);
        assert_eq!(
            config.view_state.async_events_poll_interval(),
            Duration::from_millis(10)
        );
    });
}

#[test]
fn validation_should_fail_with_zero_backoff() {
    let mut config = DiscoveryConfig::default();
    config.view_state.dispatcher_fault_backoff_ms = 0;

    let result = config.validate();
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn validation_should_fail_with_zero_poll_interval() {
    let mut config = DiscoveryConfig::default();
    config.view_state.async_events_poll_interval_ms = 0;

    assert!(config.validate().is_err());
}
