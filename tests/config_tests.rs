//! Unit tests for configuration validation.

use roost::{ConfigError, RoostConfig};
use rstest::*;

#[fixture]
fn valid_config() -> RoostConfig {
    RoostConfig {
        access_key: String::from("AKIAEXAMPLEEXAMPLE"),
        secret_key: String::from("secretsecretsecretsecret"),
        region: String::from("ap-northeast-2"),
        key_pair_name: None,
        default_instance_type: String::from("t2.micro"),
        default_security_group: String::from("roost-default-sg"),
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: RoostConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config should validate: {err}"));
}

#[rstest]
#[case::access_key(
    |cfg: &mut RoostConfig| cfg.access_key.clear(),
    "ROOST_ACCESS_KEY",
    "access_key"
)]
#[case::secret_key(
    |cfg: &mut RoostConfig| cfg.secret_key.clear(),
    "ROOST_SECRET_KEY",
    "secret_key"
)]
#[case::region(|cfg: &mut RoostConfig| cfg.region.clear(), "ROOST_REGION", "region")]
#[case::instance_type(
    |cfg: &mut RoostConfig| cfg.default_instance_type.clear(),
    "ROOST_DEFAULT_INSTANCE_TYPE",
    "default_instance_type"
)]
#[case::security_group(
    |cfg: &mut RoostConfig| cfg.default_security_group.clear(),
    "ROOST_DEFAULT_SECURITY_GROUP",
    "default_security_group"
)]
fn missing_fields_produce_actionable_errors(
    mut valid_config: RoostConfig,
    #[case] mutate: fn(&mut RoostConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);
    let error = valid_config
        .validate()
        .expect_err("validation should fail");
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("roost.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn as_settings_maps_configured_defaults(valid_config: RoostConfig) {
    let settings = valid_config
        .as_settings()
        .unwrap_or_else(|err| panic!("settings: {err}"));
    assert_eq!(settings.instance_type, valid_config.default_instance_type);
    assert_eq!(settings.security_group, valid_config.default_security_group);
    assert_eq!(settings.key_pair_name, None);
}

#[rstest]
fn as_settings_trims_and_drops_blank_key_pair_name(mut valid_config: RoostConfig) {
    valid_config.key_pair_name = Some(String::from("  "));
    let settings = valid_config
        .as_settings()
        .unwrap_or_else(|err| panic!("settings: {err}"));
    assert_eq!(settings.key_pair_name, None);

    valid_config.key_pair_name = Some(String::from("  my-pair  "));
    let settings = valid_config
        .as_settings()
        .unwrap_or_else(|err| panic!("settings: {err}"));
    assert_eq!(settings.key_pair_name.as_deref(), Some("my-pair"));
}

#[rstest]
fn as_settings_rejects_invalid_config(mut valid_config: RoostConfig) {
    valid_config.secret_key.clear();
    let err = valid_config
        .as_settings()
        .expect_err("invalid config should not produce settings");
    assert!(matches!(err, ConfigError::MissingField(_)));
}
