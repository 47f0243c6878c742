//! DynamoDB table store.
//!
//! Items are keyed by partition key `id` (the lock namespace) and sort key
//! `name`; the holder token lives in the `payload` attribute. Conditional
//! writes use condition expressions and a failed condition surfaces as
//! `ConditionalCheckFailedException`, which maps to [`CasOutcome::Rejected`].
//!
//! The SDK is async; the store owns a current-thread runtime and blocks on
//! each request, bounded by the configured timeout.

use super::{CasOutcome, LockKey, PutCondition, TableStore};
use crate::config::DynamoConfig;
use crate::error::{MutexError, Result};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Runtime;

pub const ATTR_ID: &str = "id";
pub const ATTR_NAME: &str = "name";
pub const ATTR_PAYLOAD: &str = "payload";

/// DynamoDB-backed table store.
pub struct DynamoTable {
    client: Client,
    table_name: String,
    runtime: Runtime,
    timeout: Duration,
}

impl std::fmt::Debug for DynamoTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoTable")
            .field("table_name", &self.table_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DynamoTable {
    /// Build a client from the ambient AWS configuration plus overrides.
    pub fn connect(config: &DynamoConfig, timeout: Duration) -> Result<Self> {
        let runtime = new_runtime()?;

        let sdk_config = runtime.block_on(aws_config::load_defaults(BehaviorVersion::latest()));
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);

        if let Some(region) = &config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region.clone()));
        }

        // e.g. DynamoDB Local or LocalStack
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            table_name: config.table.clone(),
            runtime,
            timeout,
        })
    }

    fn block_on<F: Future>(&self, operation: &str, future: F) -> Result<F::Output> {
        self.runtime
            .block_on(async { tokio::time::timeout(self.timeout, future).await })
            .map_err(|_| MutexError::DeadlineExceeded {
                attempts: 1,
                last_failure: format!("DynamoDB {} timed out after {:?}", operation, self.timeout),
            })
    }

    fn key_attributes(key: &LockKey) -> [(&'static str, AttributeValue); 2] {
        [
            (ATTR_ID, AttributeValue::S(key.namespace.clone())),
            (ATTR_NAME, AttributeValue::S(key.name.clone())),
        ]
    }
}

fn new_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| MutexError::BackendError(format!("failed to start runtime: {}", e)))
}

fn is_put_conditional_check_failed(err: &SdkError<PutItemError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => matches!(
            service_err.err(),
            PutItemError::ConditionalCheckFailedException(_)
        ),
        _ => false,
    }
}

fn is_delete_conditional_check_failed(err: &SdkError<DeleteItemError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => matches!(
            service_err.err(),
            DeleteItemError::ConditionalCheckFailedException(_)
        ),
        _ => false,
    }
}

impl TableStore for DynamoTable {
    fn conditional_put(
        &self,
        key: &LockKey,
        value: &str,
        condition: &PutCondition,
    ) -> Result<CasOutcome> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(ATTR_PAYLOAD, AttributeValue::S(value.to_string()));
        for (attr, val) in Self::key_attributes(key) {
            request = request.item(attr, val);
        }

        let request = match condition {
            PutCondition::IfAbsent => request
                .condition_expression("attribute_not_exists(#id)")
                .expression_attribute_names("#id", ATTR_ID),
            PutCondition::IfMatches(previous) => request
                .condition_expression("#payload = :prev")
                .expression_attribute_names("#payload", ATTR_PAYLOAD)
                .expression_attribute_values(":prev", AttributeValue::S(previous.clone())),
        };

        match self.block_on("PutItem", request.send())? {
            Ok(_) => Ok(CasOutcome::Applied),
            Err(e) if is_put_conditional_check_failed(&e) => Ok(CasOutcome::Rejected),
            Err(e) => Err(MutexError::BackendError(format!(
                "DynamoDB PutItem failed: {}",
                e
            ))),
        }
    }

    fn conditional_delete(&self, key: &LockKey, expected: &str) -> Result<CasOutcome> {
        let mut request = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .condition_expression("#payload = :expected")
            .expression_attribute_names("#payload", ATTR_PAYLOAD)
            .expression_attribute_values(":expected", AttributeValue::S(expected.to_string()));
        for (attr, val) in Self::key_attributes(key) {
            request = request.key(attr, val);
        }

        match self.block_on("DeleteItem", request.send())? {
            Ok(_) => Ok(CasOutcome::Applied),
            Err(e) if is_delete_conditional_check_failed(&e) => Ok(CasOutcome::Rejected),
            Err(e) => Err(MutexError::BackendError(format!(
                "DynamoDB DeleteItem failed: {}",
                e
            ))),
        }
    }

    fn get(&self, key: &LockKey) -> Result<Option<String>> {
        let mut request = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .consistent_read(true);
        for (attr, val) in Self::key_attributes(key) {
            request = request.key(attr, val);
        }

        let response = self
            .block_on("GetItem", request.send())?
            .map_err(|e| MutexError::BackendError(format!("DynamoDB GetItem failed: {}", e)))?;

        Ok(response.item().map(|item| {
            item.get(ATTR_PAYLOAD)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .unwrap_or_default()
        }))
    }

    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }
}
