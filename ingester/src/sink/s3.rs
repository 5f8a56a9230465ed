use super::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use ingest_core::{Error, Result, StorageConfig};
use tracing::debug;

pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    pub async fn new(storage: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            storage.access_key.clone(),
            storage.secret_key.clone(),
            None,
            None,
            "environment",
        );

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint_url) = &storage.endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint_url);
        }

        let sdk_config = config_loader.load().await;

        // S3-compatible stores behind a custom endpoint rarely support virtual-hosted buckets
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.endpoint_url.is_some())
            .build();

        Self {
            client: S3Client::from_conf(s3_config),
            bucket: storage.bucket_name.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        debug!(
            bucket = %self.bucket,
            key = %key,
            bytes = body.len(),
            "Putting S3 object"
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let details = match e {
                    aws_sdk_s3::error::SdkError::ServiceError(ref err) => {
                        format!("S3 service error: {:?}", err.err())
                    }
                    _ => format!("S3 request failed: {}", e),
                };
                Error::Storage {
                    key: key.to_string(),
                    details,
                }
            })?;

        Ok(())
    }

    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
