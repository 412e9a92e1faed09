//! Layered configuration loading

use std::fs;
use std::time::Duration;

use dagchain_core::consensus::Network;
use node::config::{NodeConfig, NodeConfigError};
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

#[test]
fn test_file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.toml");
    fs::write(
        &path,
        r#"
[chain]
network = "mainnet"

[validation]
max_orphans = 7
orphan_expiry = 120

[[chain.checkpoints]]
height = 11
hash = "0000000000000000000000000000000000000000000000000000000000000011"
"#,
    )
    .unwrap();

    let config = NodeConfig::load_from(Some(&path), env(&[])).unwrap();
    assert_eq!(config.chain.network, Network::Mainnet);
    assert_eq!(config.validation.max_orphans, 7);
    assert_eq!(config.validation.orphan_expiry, Duration::from_secs(120));
    assert_eq!(config.validation.sig_cache_size, 50_000);

    let params = config.network_params().unwrap();
    assert_eq!(params.checkpoints.len(), 1);
    assert_eq!(params.checkpoints[0].height, 11);
    assert_eq!(params.checkpoints[0].hash[31], 0x11);
}

#[test]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.toml");
    fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

    let config = NodeConfig::load_from(
        Some(&path),
        env(&[
            ("DAGCHAIN_LOGGING__LEVEL", "debug"),
            ("DAGCHAIN_STORAGE__IN_MEMORY", "true"),
            ("DAGCHAIN_VALIDATION__OUTCOME_CACHE_SIZE", "64"),
        ]),
    )
    .unwrap();
    assert_eq!(config.logging.level, "debug");
    assert!(config.storage.in_memory);
    assert_eq!(config.validation.outcome_cache_size, 64);
}

#[test]
fn test_invalid_values_fail_validation() {
    let result = NodeConfig::load_from(None, env(&[("DAGCHAIN_VALIDATION__OUTCOME_CACHE_SIZE", "0")]));
    assert!(matches!(result, Err(NodeConfigError::InvalidValue(_))));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = NodeConfig::load_from(Some(&dir.path().join("absent.toml")), env(&[]));
    assert!(matches!(result, Err(NodeConfigError::Load(_))));
}
