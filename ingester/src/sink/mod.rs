pub mod s3;

use crate::model::Payload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_core::backoff::retry_with_backoff;
use ingest_core::config::SinkConfig;
use ingest_core::telemetry::PERSIST_TOTAL;
use ingest_core::{record_metric, Error, Result};
use std::sync::Arc;
use tracing::{error, info, instrument};

pub use s3::S3Store;

/// Timestamp layout of object keys.
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Human-readable target, e.g. `s3://bucket`.
    fn location(&self) -> String;
}

/// `{endpoint}/{YYYY-MM-DD_HH-MM-SS}.json` for the given instant.
pub fn object_key(endpoint_name: &str, at: DateTime<Utc>) -> String {
    format!("{}/{}.json", endpoint_name, at.format(KEY_TIMESTAMP_FORMAT))
}

/// Serializes payloads as JSON and writes them under timestamped keys.
pub struct Sink {
    store: Arc<dyn ObjectStore>,
    config: SinkConfig,
}

impl Sink {
    pub fn new(store: Arc<dyn ObjectStore>, config: SinkConfig) -> Self {
        Self { store, config }
    }

    /// Stores `payload` for `endpoint_name` and returns the object key.
    /// Failures are logged here and handed back to the caller.
    #[instrument(skip(self, payload))]
    pub async fn persist(&self, endpoint_name: &str, payload: &Payload) -> Result<String> {
        let key = object_key(endpoint_name, Utc::now());

        let body = payload.to_json_bytes()?;
        let size = body.len();

        let result = retry_with_backoff(
            || self.store.put(&key, body.clone()),
            self.config.max_retries,
            self.config.retry_base_delay_ms,
            "put_object",
        )
        .await;

        match result {
            Ok(()) => {
                info!(
                    key = %key,
                    bytes = size,
                    records = payload.record_count(),
                    "Successfully uploaded {} to {}",
                    key,
                    self.store.location()
                );
                record_metric!(counter, PERSIST_TOTAL, 1, "endpoint" = endpoint_name.to_string(), "outcome" = "ok");
                Ok(key)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Error uploading to object storage");
                record_metric!(counter, PERSIST_TOTAL, 1, "endpoint" = endpoint_name.to_string(), "outcome" = "error");
                Err(match e {
                    e @ Error::Storage { .. } => e,
                    other => Error::Storage {
                        key,
                        details: other.to_string(),
                    },
                })
            }
        }
    }
}
