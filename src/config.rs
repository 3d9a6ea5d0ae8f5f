//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provision::ProvisionSettings;

/// Provider credentials and provisioning defaults, derived from
/// environment variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "ROOST")]
pub struct RoostConfig {
    /// Access key id for the provider account. This value is required.
    pub access_key: String,
    /// Secret access key used for authentication. This value is required.
    pub secret_key: String,
    /// Region every managed resource lives in. This value is required.
    pub region: String,
    /// Key-pair name to reuse for SSH access. When absent a new pair is
    /// minted on first provision and its private key stored locally.
    pub key_pair_name: Option<String>,
    /// Commercial type for new instances. Defaults to `t2.micro` to
    /// minimise cost for throwaway workloads.
    #[ortho_config(default = "t2.micro".to_owned())]
    pub default_instance_type: String,
    /// Name of the shared security group, created on first use.
    #[ortho_config(default = "roost-default-sg".to_owned())]
    pub default_security_group: String,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl RoostConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to roost.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("roost")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds [`ProvisionSettings`] from the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_settings(&self) -> Result<ProvisionSettings, ConfigError> {
        self.validate()?;
        Ok(ProvisionSettings {
            security_group: self.default_security_group.trim().to_owned(),
            instance_type: self.default_instance_type.trim().to_owned(),
            key_pair_name: self
                .key_pair_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned),
        })
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is
    /// empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.access_key,
            &FieldMetadata::new("provider access key", "ROOST_ACCESS_KEY", "access_key"),
        )?;
        Self::require_field(
            &self.secret_key,
            &FieldMetadata::new("provider secret key", "ROOST_SECRET_KEY", "secret_key"),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("provider region", "ROOST_REGION", "region"),
        )?;
        Self::require_field(
            &self.default_instance_type,
            &FieldMetadata::new(
                "instance type",
                "ROOST_DEFAULT_INSTANCE_TYPE",
                "default_instance_type",
            ),
        )?;
        Self::require_field(
            &self.default_security_group,
            &FieldMetadata::new(
                "security group name",
                "ROOST_DEFAULT_SECURITY_GROUP",
                "default_security_group",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
