//! Tests for configuration loading, defaults and validation.

use conductor_config::{Config, ConfigError};

fn genesis_section(n: usize) -> String {
    let validators: String = (0..n)
        .map(|i| {
            format!(
                "[[genesis.validators]]\npublic_key = \"{}\"\nproof_of_possession = \"{}\"\n",
                hex::encode([i as u8; 48]),
                hex::encode([i as u8; 96]),
            )
        })
        .collect();
    format!(
        "[genesis]\ngenesis_seed = \"{}\"\n{validators}",
        hex::encode(b"chorus_test_genesis")
    )
}

#[test]
fn minimal_config_uses_documented_defaults() {
    let config = Config::from_toml_str(&genesis_section(4)).unwrap();

    assert_eq!(config.consensus.min_validators, 4);
    assert_eq!(config.consensus.epoch_timeout_ms, 120_000);
    assert_eq!(config.consensus.seen_cache_ttl_ms, 86_400_000);
    assert_eq!(config.consensus.threshold_ratio.numerator, 2);
    assert_eq!(config.consensus.threshold_ratio.denominator, 3);
    assert_eq!(config.vdf.difficulty_initial, 86_400_000);
    assert_eq!(config.vdf.progress_interval, 1_000_000);
    assert_eq!(config.vdf.adjustment_interval_days, 10);
    assert_eq!(config.peering.circuit_breaker_threshold, 5);
    assert_eq!(config.peering.circuit_breaker_open_ms, 60_000);
    assert_eq!(config.metrics.port, 9090);
}

#[test]
fn overrides_are_honored() {
    let toml = format!(
        "{}\n[consensus]\nmin_validators = 7\nthreshold_ratio = {{ numerator = 3, denominator = 4 }}\nepoch_timeout_ms = 30000\nseen_cache_ttl_ms = 1000\n\n[vdf]\ndifficulty_initial = 1000\nprogress_interval = 10\nadjustment_interval_days = 2\n",
        genesis_section(7)
    );
    let config = Config::from_toml_str(&toml).unwrap();

    assert_eq!(config.consensus.min_validators, 7);
    assert_eq!(config.consensus.epoch_timeout_ms, 30_000);
    assert_eq!(config.vdf.difficulty_initial, 1_000);
    assert_eq!(config.vdf.adjustment_interval_days, 2);
}

#[test]
fn too_small_federation_rejected() {
    let toml = format!("{}\n[consensus]\nmin_validators = 3\nthreshold_ratio = {{ numerator = 2, denominator = 3 }}\nepoch_timeout_ms = 120000\nseen_cache_ttl_ms = 86400000\n", genesis_section(3));
    assert!(matches!(
        Config::from_toml_str(&toml),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn threshold_below_two_thirds_rejected() {
    let toml = format!(
        "{}\n[consensus]\nmin_validators = 4\nthreshold_ratio = {{ numerator = 1, denominator = 2 }}\nepoch_timeout_ms = 120000\nseen_cache_ttl_ms = 86400000\n",
        genesis_section(4)
    );
    assert!(Config::from_toml_str(&toml).is_err());
}

#[test]
fn missing_genesis_rejected() {
    assert!(Config::from_toml_str("").is_err());
}

#[test]
fn zero_difficulty_rejected() {
    let toml = format!(
        "{}\n[vdf]\ndifficulty_initial = 0\nprogress_interval = 1000000\nadjustment_interval_days = 10\n",
        genesis_section(4)
    );
    assert!(Config::from_toml_str(&toml).is_err());
}

#[test]
fn config_round_trips_through_save_and_load() {
    let config = Config::from_toml_str(&genesis_section(4)).unwrap();

    let dir = std::env::temp_dir().join("conductor-config-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("conductor.toml");

    config.save(&path).unwrap();
    let reloaded = Config::load(&path).unwrap();

    assert_eq!(
        config.consensus.epoch_timeout_ms,
        reloaded.consensus.epoch_timeout_ms
    );
    assert_eq!(config.genesis.genesis_seed, reloaded.genesis.genesis_seed);
    assert_eq!(
        config.genesis.validators.len(),
        reloaded.genesis.validators.len()
    );

    std::fs::remove_file(&path).ok();
}

#[test]
fn genesis_seed_decodes() {
    let config = Config::from_toml_str(&genesis_section(4)).unwrap();
    assert_eq!(
        config.genesis.seed_bytes().unwrap(),
        b"chorus_test_genesis".to_vec()
    );
}
