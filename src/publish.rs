//! Optional upload of the finished table to S3.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tracing::info;

use crate::output::is_gzip;

/// Object key for an uploaded table: its file name.
pub fn object_key(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("No file name in {}", path.display()))
}

fn content_type(path: &Path) -> &'static str {
    if is_gzip(path) {
        "application/gzip"
    } else {
        "text/csv"
    }
}

/// Uploads the file at `path` to `bucket`, keyed by its file name.
#[tracing::instrument(skip(client, path), fields(file = %path.display()))]
pub async fn upload_file(client: &aws_sdk_s3::Client, bucket: &str, path: &Path) -> Result<String> {
    let key = object_key(path)?;
    let body = ByteStream::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    client
        .put_object()
        .bucket(bucket)
        .key(&key)
        .body(body)
        .content_type(content_type(path))
        .send()
        .await?;

    info!(bucket, key = %key, "Table uploaded to S3");
    Ok(key)
}

/// Loads AWS configuration from the environment and uploads the table.
pub async fn publish(bucket: &str, path: &Path) -> Result<String> {
    let config = aws_config::load_from_env().await;
    let client = aws_sdk_s3::Client::new(&config);
    upload_file(&client, bucket, path).await
}
