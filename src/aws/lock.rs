//! DynamoDB implementation of the lock store.
//!
//! One table, hash-keyed by `LockID`, with a numeric `Expires` attribute
//! in epoch seconds. The conditional expression
//! `attribute_not_exists(LockID) OR Expires < :now` is what makes leases
//! crash-tolerant: an expired row loses to the next acquirer's write.

use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};

use crate::lock::{LockStore, PutOutcome, StoreFuture};

use super::AwsError;

/// Default name of the lease lock table.
pub const DEFAULT_LOCK_TABLE: &str = "roost-lock-table";

const LOCK_ID_ATTRIBUTE: &str = "LockID";
const EXPIRES_ATTRIBUTE: &str = "Expires";

/// DynamoDB-backed lock store.
#[derive(Clone, Debug)]
pub struct DynamoLockStore {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoLockStore {
    /// Creates a store over the default lock table.
    #[must_use]
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self::with_table_name(client, DEFAULT_LOCK_TABLE)
    }

    /// Creates a store over a custom table name.
    #[must_use]
    pub fn with_table_name(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

impl LockStore for DynamoLockStore {
    type Error = AwsError;

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn table_exists(&self) -> StoreFuture<'_, bool, Self::Error> {
        Box::pin(async move {
            match self
                .client
                .describe_table()
                .table_name(self.table_name.as_str())
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_resource_not_found_exception() {
                        Ok(false)
                    } else {
                        Err(AwsError::api("describe table", &service_err))
                    }
                }
            }
        })
    }

    fn create_table(&self) -> StoreFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let key_attribute = AttributeDefinition::builder()
                .attribute_name(LOCK_ID_ATTRIBUTE)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(|err| AwsError::InvalidRequest {
                    message: err.to_string(),
                })?;
            let key_schema = KeySchemaElement::builder()
                .attribute_name(LOCK_ID_ATTRIBUTE)
                .key_type(KeyType::Hash)
                .build()
                .map_err(|err| AwsError::InvalidRequest {
                    message: err.to_string(),
                })?;

            self.client
                .create_table()
                .table_name(self.table_name.as_str())
                .attribute_definitions(key_attribute)
                .key_schema(key_schema)
                .billing_mode(BillingMode::PayPerRequest)
                .send()
                .await
                .map_err(|err| AwsError::api("create table", &err))?;
            Ok(())
        })
    }

    fn table_status(&self) -> StoreFuture<'_, String, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_table()
                .table_name(self.table_name.as_str())
                .send()
                .await
                .map_err(|err| AwsError::api("describe table", &err))?;
            output
                .table
                .and_then(|table| table.table_status)
                .map(|status| status.as_str().to_owned())
                .ok_or(AwsError::MissingField {
                    resource: "lock table",
                    field: "status",
                })
        })
    }

    fn put_if_absent_or_expired<'a>(
        &'a self,
        lock_id: &'a str,
        expires_at: i64,
        now: i64,
    ) -> StoreFuture<'a, PutOutcome, Self::Error> {
        Box::pin(async move {
            let result = self
                .client
                .put_item()
                .table_name(self.table_name.as_str())
                .item(LOCK_ID_ATTRIBUTE, AttributeValue::S(lock_id.to_owned()))
                .item(EXPIRES_ATTRIBUTE, AttributeValue::N(expires_at.to_string()))
                .condition_expression(format!(
                    "attribute_not_exists({LOCK_ID_ATTRIBUTE}) OR {EXPIRES_ATTRIBUTE} < :now"
                ))
                .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
                .send()
                .await;

            match result {
                Ok(_) => Ok(PutOutcome::Acquired),
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_conditional_check_failed_exception() {
                        Ok(PutOutcome::Held)
                    } else {
                        Err(AwsError::api("conditional put", &service_err))
                    }
                }
            }
        })
    }

    fn delete<'a>(&'a self, lock_id: &'a str) -> StoreFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .delete_item()
                .table_name(self.table_name.as_str())
                .key(LOCK_ID_ATTRIBUTE, AttributeValue::S(lock_id.to_owned()))
                .send()
                .await
                .map_err(|err| AwsError::api("delete item", &err))?;
            Ok(())
        })
    }

    fn expires_at<'a>(&'a self, lock_id: &'a str) -> StoreFuture<'a, Option<i64>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .get_item()
                .table_name(self.table_name.as_str())
                .key(LOCK_ID_ATTRIBUTE, AttributeValue::S(lock_id.to_owned()))
                .send()
                .await
                .map_err(|err| AwsError::api("get item", &err))?;

            let Some(item) = output.item else {
                return Ok(None);
            };
            let expires = item
                .get(EXPIRES_ATTRIBUTE)
                .and_then(|value| value.as_n().ok())
                .and_then(|raw| raw.parse::<i64>().ok())
                .ok_or(AwsError::MissingField {
                    resource: "lock entry",
                    field: EXPIRES_ATTRIBUTE,
                })?;
            Ok(Some(expires))
        })
    }
}
