//! R2 upload operations (simple, multipart) through the AWS SDK

use super::{ObjectStore, ProgressCallback, StoreError};
use crate::intake::FileContent;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

// Multipart upload threshold: 100MB
const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
// Part size: 20MB per chunk
const PART_SIZE: u64 = 20 * 1024 * 1024;
// Concurrent uploads: 6 parts in parallel
const CONCURRENCY: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct R2Config {
    pub account_id: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Overrides the `https://{account_id}.r2.cloudflarestorage.com` endpoint
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl R2Config {
    pub fn endpoint(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.r2.cloudflarestorage.com", self.account_id),
        }
    }
}

/// Create an S3 client configured for Cloudflare R2
pub fn create_r2_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "r2-provider",
    );

    let s3_config = S3ConfigBuilder::new()
        .credentials_provider(credentials)
        .region(Region::new("auto"))
        .endpoint_url(config.endpoint())
        .force_path_style(true)
        .build();

    Client::from_conf(s3_config)
}

/// Part numbers (1-based) and byte ranges for a multipart upload
fn part_ranges(total: u64, part_size: u64) -> Vec<(i32, Range<u64>)> {
    let total_parts = total.div_ceil(part_size);
    (1..=total_parts)
        .map(|part_number| {
            let start = (part_number - 1) * part_size;
            let end = std::cmp::min(start + part_size, total);
            (part_number as i32, start..end)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct R2Store {
    client: Client,
    bucket: String,
    multipart_threshold: u64,
    part_size: u64,
    concurrency: usize,
}

impl R2Store {
    pub fn new(config: &R2Config) -> Self {
        Self {
            client: create_r2_client(config),
            bucket: config.bucket.clone(),
            multipart_threshold: MULTIPART_THRESHOLD,
            part_size: PART_SIZE,
            concurrency: CONCURRENCY,
        }
    }

    /// Tune when and how large bodies are split into parts
    pub fn with_multipart(mut self, threshold: u64, part_size: u64, concurrency: usize) -> Self {
        self.multipart_threshold = threshold;
        self.part_size = part_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload a body with a single PUT
    async fn upload_simple(
        &self,
        key: &str,
        body: FileContent,
        content_type: &str,
        progress: &ProgressCallback,
    ) -> Result<(), StoreError> {
        let total = body.len();
        let bytes = body
            .read_all()
            .await
            .map_err(|e| StoreError::Body(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                StoreError::Request(format!("Upload request failed: {}", DisplayErrorContext(&e)))
            })?;

        progress(total, total);
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                StoreError::Request(format!(
                    "Failed to initiate multipart upload: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Multipart("No upload ID returned".to_string()))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>, // (part_number, etag)
    ) -> Result<(), StoreError> {
        let completed_parts: Vec<CompletedPart> = parts
            .into_iter()
            .map(|(part_number, etag)| {
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| {
                StoreError::Request(format!(
                    "Failed to complete multipart upload: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(
                "multipart_abort: {} upload_id={} error={}",
                key,
                upload_id,
                DisplayErrorContext(&e)
            );
        }
    }

    /// Upload a large body in parts, at most `concurrency` parts in flight
    async fn upload_multipart(
        &self,
        key: &str,
        body: FileContent,
        content_type: &str,
        progress: &ProgressCallback,
    ) -> Result<(), StoreError> {
        let total = body.len();
        let upload_id = self.initiate_multipart_upload(key, content_type).await?;
        let ranges = part_ranges(total, self.part_size);
        info!(
            "multipart_start: {} upload_id={} parts={}",
            key,
            upload_id,
            ranges.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let uploaded_bytes = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for (part_number, range) in ranges {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Multipart(format!("Part scheduler closed: {}", e)))?;
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = key.to_string();
            let upload_id = upload_id.clone();
            let body = body.clone();
            let uploaded_bytes = uploaded_bytes.clone();
            let progress = progress.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let part_len = range.end - range.start;

                // Disk-backed bodies are read one part at a time
                let chunk = body
                    .read_range(range)
                    .await
                    .map_err(|e| StoreError::Body(format!("part {}: {}", part_number, e)))?;

                let response = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(chunk))
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::Request(format!(
                            "Failed to upload part {}: {}",
                            part_number,
                            DisplayErrorContext(&e)
                        ))
                    })?;

                let etag = response
                    .e_tag()
                    .ok_or_else(|| {
                        StoreError::Multipart(format!("No ETag returned for part {}", part_number))
                    })?
                    .to_string();

                let new_total = uploaded_bytes.fetch_add(part_len, Ordering::SeqCst) + part_len;
                progress(new_total, total);

                Ok::<(i32, String), StoreError>((part_number, etag))
            });

            handles.push(handle);
        }

        // Wait for all parts and collect results
        let mut parts = Vec::new();
        let mut first_error: Option<StoreError> = None;

        for handle in handles {
            match handle.await {
                Ok(Ok(part)) => parts.push(part),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(StoreError::Multipart(format!("Task failed: {}", e)));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            self.abort_multipart_upload(key, &upload_id).await;
            return Err(err);
        }

        // Sort parts by part number (required by S3/R2)
        parts.sort_by_key(|(n, _)| *n);
        self.complete_multipart_upload(key, &upload_id, parts).await
    }
}

impl ObjectStore for R2Store {
    async fn put_resumable(
        &self,
        key: &str,
        body: FileContent,
        content_type: &str,
        progress: ProgressCallback,
    ) -> Result<(), StoreError> {
        if body.len() < self.multipart_threshold {
            self.upload_simple(key, body, content_type, &progress).await
        } else {
            self.upload_multipart(key, body, content_type, &progress)
                .await
        }
    }
}
