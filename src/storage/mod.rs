//! S3-compatible object storage (AWS or MinIO).
//!
//! Uploads create the bucket on first use. Downloads come back base64-encoded, matching how
//! callers usually relay file contents inside JSON envelopes.

use crate::config::StorageSettings;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
pub const DEFAULT_ENCODING: &str = "base64";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage is not configured: {0}")]
    Config(&'static str),
    #[error("{operation} failed: {message}")]
    Request { operation: &'static str, message: String },
    #[error("read object body: {0}")]
    Body(String),
}

fn failed(operation: &'static str, e: impl std::error::Error) -> StorageError {
    StorageError::Request {
        operation,
        message: DisplayErrorContext(e).to_string(),
    }
}

/// Endpoint with a scheme; a bare `host:port` gets `http` or `https` per `use_ssl`.
pub fn endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        let scheme = if use_ssl { "https" } else { "http" };
        format!("{scheme}://{endpoint}")
    }
}

/// `(content type, content encoding)` with empty or missing values defaulted.
pub fn content_headers(mime_type: Option<&str>, encoding: Option<&str>) -> (String, String) {
    let pick = |value: Option<&str>, default: &str| match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    };
    (pick(mime_type, DEFAULT_MIME_TYPE), pick(encoding, DEFAULT_ENCODING))
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    client: Client,
}

impl ObjectStore {
    /// Static credentials against an explicit endpoint, path-style addressing.
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(StorageError::Config("S3_ENDPOINT"))?;
        let region = if settings.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            settings.region.clone()
        };
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "bedrock-static",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .endpoint_url(endpoint_url(endpoint, settings.use_ssl))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Ok(ObjectStore {
            client: Client::from_conf(config),
        })
    }

    /// Region and credentials from the standard AWS environment and profile chain.
    pub async fn from_env() -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        ObjectStore {
            client: Client::new(&shared),
        }
    }

    pub fn from_client(client: Client) -> Self {
        ObjectStore { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Create `bucket`; when creation fails, succeed only if the bucket is already reachable.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let created = self.client.create_bucket().bucket(bucket).send().await;
        let Err(create_err) = created else {
            tracing::info!(bucket, "bucket created");
            return Ok(());
        };
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(bucket, error = %DisplayErrorContext(&e), "bucket lookup failed");
                Err(failed("create bucket", create_err))
            }
        }
    }

    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        mime_type: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<(), StorageError> {
        self.ensure_bucket(bucket).await?;
        let (content_type, content_encoding) = content_headers(mime_type, encoding);
        let size = content.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(content))
            .content_type(content_type)
            .content_encoding(content_encoding)
            .send()
            .await
            .map_err(|e| failed("put object", e))?;
        tracing::debug!(bucket, key, size, "object uploaded");
        Ok(())
    }

    pub async fn download_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| failed("get object", e))?;
        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Body(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    /// Object contents as standard base64.
    pub async fn download(&self, bucket: &str, key: &str) -> Result<String, StorageError> {
        Ok(STANDARD.encode(self.download_bytes(bucket, key).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_blank_headers() {
        assert_eq!(
            content_headers(None, Some("")),
            ("application/octet-stream".to_string(), "base64".to_string())
        );
        assert_eq!(
            content_headers(Some("text/csv"), Some("gzip")),
            ("text/csv".to_string(), "gzip".to_string())
        );
    }

    #[test]
    fn endpoint_gets_a_scheme() {
        assert_eq!(endpoint_url("minio:9000", false), "http://minio:9000");
        assert_eq!(endpoint_url("minio:9000", true), "https://minio:9000");
        assert_eq!(endpoint_url("http://localhost:9000", true), "http://localhost:9000");
    }

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let settings = StorageSettings::default();
        assert!(matches!(
            ObjectStore::new(&settings),
            Err(StorageError::Config("S3_ENDPOINT"))
        ));

        let settings = StorageSettings {
            endpoint: Some("localhost:9000".into()),
            ..StorageSettings::default()
        };
        assert!(ObjectStore::new(&settings).is_ok());
    }
}
