use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client as S3Client;
use dashmap::DashMap;
use uuid::Uuid;

/// Prefix for feed images.
pub const IMAGES_PREFIX: &str = "images";
/// Prefix for profile pictures.
pub const PROFILE_IMAGES_PREFIX: &str = "profileImages";

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("delete failed: {0}")]
    Delete(String),
}

/// Builds `<prefix>/<generated name>.<ext>`.
pub fn generate_key(prefix: &str, extension: &str) -> String {
    format!("{prefix}/{}.{extension}", Uuid::now_v7().simple())
}

/// Maps an image content type to the file extension used in blob keys.
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Stores the bytes and returns the public download URL.
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

#[derive(Clone)]
pub struct MinioClient {
    client: S3Client,
    bucket: String,
    public_url: String,
}

impl MinioClient {
    pub async fn new(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_url: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "minio");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = S3Client::from_conf(config);

        // Bucket may already exist.
        if let Err(e) = client.create_bucket().bucket(bucket).send().await {
            tracing::debug!(bucket = %bucket, error = %e, "create_bucket skipped");
        }

        tracing::info!(endpoint = %endpoint, bucket = %bucket, "MinIO client initialized");

        Self {
            client,
            bucket: bucket.to_string(),
            public_url: public_url.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for MinioClient {
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobError::Upload(e.to_string()))?;

        Ok(format!("{}/{}/{}", self.public_url, self.bucket, key))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Delete(e.to_string()))?;

        Ok(())
    }
}

/// Blob store held in memory; URLs use the `memory://` scheme.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, (Vec<u8>, String)>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        if body.is_empty() {
            return Err(BlobError::Upload("empty body".into()));
        }
        self.objects.insert(key.to_string(), (body, content_type.to_string()));
        Ok(format!("memory://{key}"))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::Delete(format!("no object at {key}")))
    }
}
