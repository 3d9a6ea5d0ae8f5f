//! AWS binding for the lifecycle core.
//!
//! EC2 backs the [`crate::provider::CloudProvider`] surface and DynamoDB
//! backs the [`crate::lock::LockStore`] surface. Both clients share one
//! credential/region context built from [`RoostConfig`].

mod ec2;
pub mod lock;

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use thiserror::Error;

use crate::config::{ConfigError, RoostConfig};

pub use lock::DynamoLockStore;

const CREDENTIALS_PROVIDER_NAME: &str = "roost-config";

/// Service clients sharing one credential and region context.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// EC2 client used by the cloud provider binding.
    pub ec2: aws_sdk_ec2::Client,
    /// DynamoDB client used by the lock store binding.
    pub dynamodb: aws_sdk_dynamodb::Client,
}

impl AwsClients {
    /// Builds clients from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub async fn connect(config: &RoostConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER_NAME,
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        Ok(Self {
            ec2: aws_sdk_ec2::Client::new(&shared),
            dynamodb: aws_sdk_dynamodb::Client::new(&shared),
        })
    }
}

/// Errors raised by the AWS bindings.
#[derive(Debug, Error)]
pub enum AwsError {
    /// Wrapper for API call failures, tagged with the operation.
    #[error("{operation} failed: {message}")]
    Api {
        /// Operation that failed.
        operation: &'static str,
        /// Flattened error chain from the SDK.
        message: String,
    },
    /// Raised when the account has no default VPC for the security group.
    #[error("no default VPC found")]
    NoDefaultVpc,
    /// Raised when no usable base image matches the lookup pattern.
    #[error("no base image found")]
    NoBaseImage,
    /// Raised when a response lacks a field the caller depends on.
    #[error("{resource} response missing {field}")]
    MissingField {
        /// Resource the response described.
        resource: &'static str,
        /// Field that was absent.
        field: &'static str,
    },
    /// Raised when a request cannot be constructed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Human-readable description of the invalid input.
        message: String,
    },
}

impl AwsError {
    pub(crate) fn api(operation: &'static str, err: &dyn std::error::Error) -> Self {
        Self::Api {
            operation,
            message: error_chain(err),
        }
    }
}

/// Flattens an error and its sources into one readable line; the SDK's
/// top-level display alone often says no more than "service error".
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// EC2-backed implementation of the cloud provider surface.
#[derive(Clone, Debug)]
pub struct AwsProvider {
    client: aws_sdk_ec2::Client,
}

impl AwsProvider {
    /// Creates a provider over an EC2 client.
    #[must_use]
    pub const fn new(client: aws_sdk_ec2::Client) -> Self {
        Self { client }
    }
}
