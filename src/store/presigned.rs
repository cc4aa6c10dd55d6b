//! Presigned PUT uploads streamed through reqwest

use super::{ObjectStore, ProgressCallback, R2Config, StoreError};
use crate::intake::FileContent;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::Either;
use futures_util::stream::{self, Stream, StreamExt};
use hmac::{Hmac, Mac};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const REGION: &str = "auto";
const SERVICE: &str = "s3";

/// Presigned URLs stay valid for one hour
const PRESIGN_EXPIRES_SECS: u64 = 3600;
// Body chunk size: one progress tick per 256KB handed to the connection
const CHUNK_SIZE: usize = 256 * 1024;

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// `/{bucket}/{key}` with every segment percent-encoded and `/` kept
fn object_path(bucket: &str, key: &str) -> String {
    std::iter::once(bucket)
        .chain(key.split('/'))
        .fold(String::new(), |mut path, segment| {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
            path
        })
}

/// Sign a PUT of `key` with SigV4 query parameters. Only `host` is signed
/// and the payload is left unsigned, so the body can be streamed.
pub fn presign_put_url(
    config: &R2Config,
    key: &str,
    expires_in: u64,
    now: DateTime<Utc>,
) -> String {
    let date = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date, REGION, SERVICE);

    let endpoint = config.endpoint();
    let host = endpoint
        .split_once("://")
        .map_or(endpoint.as_str(), |(_, host)| host);
    let path = object_path(&config.bucket, key);

    // Parameters are written in canonical (sorted) order
    let query = format!(
        "X-Amz-Algorithm={}&X-Amz-Credential={}&X-Amz-Date={}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
        ALGORITHM,
        urlencoding::encode(&format!("{}/{}", config.access_key_id, scope)),
        amz_date,
        expires_in
    );

    let canonical_request = format!(
        "PUT\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        path, query, host
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = [date.as_str(), REGION, SERVICE, "aws4_request"].iter().fold(
        format!("AWS4{}", config.secret_access_key).into_bytes(),
        |key, part| hmac(&key, part),
    );
    let signature = hex::encode(hmac(&signing_key, &string_to_sign));

    format!("{}{}?{}&X-Amz-Signature={}", endpoint, path, query, signature)
}

/// Split a body into chunks without copying
fn split_chunks(body: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..body.len())
        .step_by(chunk_size)
        .map(|start| body.slice(start..std::cmp::min(start + chunk_size, body.len())))
        .collect()
}

/// Chunks of the body; disk content is read as the connection pulls it
async fn body_chunks(
    body: &FileContent,
    chunk_size: usize,
) -> std::io::Result<impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static> {
    Ok(match body {
        FileContent::Memory(bytes) => Either::Left(stream::iter(
            split_chunks(bytes, chunk_size)
                .into_iter()
                .map(Ok::<Bytes, std::io::Error>),
        )),
        FileContent::Disk { path, .. } => {
            let file = tokio::fs::File::open(path).await?;
            Either::Right(ReaderStream::with_capacity(file, chunk_size))
        }
    })
}

/// Uploads through presigned URLs so the body can be streamed with
/// per-chunk progress
#[derive(Debug, Clone)]
pub struct PresignedStore {
    client: Client,
    config: R2Config,
    chunk_size: usize,
}

impl PresignedStore {
    pub fn new(config: R2Config) -> Result<Self, StoreError> {
        let client = Client::builder()
            .build()
            .map_err(|e| StoreError::Client(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            chunk_size: CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl ObjectStore for PresignedStore {
    async fn put_resumable(
        &self,
        key: &str,
        body: FileContent,
        content_type: &str,
        progress: ProgressCallback,
    ) -> Result<(), StoreError> {
        let presigned_url = presign_put_url(&self.config, key, PRESIGN_EXPIRES_SECS, Utc::now());

        let total = body.len();
        let sent_bytes = Arc::new(AtomicU64::new(0));

        // Progress advances as the connection pulls each chunk
        let stream = body_chunks(&body, self.chunk_size)
            .await
            .map_err(|e| StoreError::Body(e.to_string()))?
            .map(move |chunk| {
                if let Ok(bytes) = &chunk {
                    let len = bytes.len() as u64;
                    let sent = sent_bytes.fetch_add(len, Ordering::SeqCst) + len;
                    progress(sent, total);
                }
                chunk
            });

        let response = self
            .client
            .put(&presigned_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("Upload request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body: text });
        }

        Ok(())
    }
}
