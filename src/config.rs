//! Uploader configuration, read from the environment (and `.env`)

use crate::store::R2Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Delay between an entry reaching Done and leaving the queue
const DEFAULT_DISPLAY_DELAY_MS: u64 = 400;
/// How long the "Uploaded N files." notice stays visible
const DEFAULT_NOTICE_DURATION_MS: u64 = 2500;
const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(String),
    #[error("{var} has an invalid value: {value}")]
    Invalid { var: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub completion_display_delay_ms: u64,
    pub notice_duration_ms: u64,
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            completion_display_delay_ms: DEFAULT_DISPLAY_DELAY_MS,
            notice_duration_ms: DEFAULT_NOTICE_DURATION_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn completion_display_delay(&self) -> Duration {
        Duration::from_millis(self.completion_display_delay_ms)
    }
}

/// Which object store client carries the uploads
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Transport {
    /// AWS SDK client, multipart for large files
    #[default]
    #[serde(rename = "sdk")]
    Sdk,
    /// Presigned PUT streamed with per-chunk progress
    #[serde(rename = "presigned")]
    Presigned,
}

impl std::str::FromStr for Transport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(Transport::Sdk),
            "presigned" => Ok(Transport::Presigned),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploaderConfig {
    pub r2: R2Config,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub transport: Transport,
}

/// Load configuration from the process environment, after reading `.env`
pub fn load() -> Result<UploaderConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_from(|var| std::env::var(var).ok())
}

/// Load configuration through `lookup`, which returns the value of a variable
pub fn load_from<F>(lookup: F) -> Result<UploaderConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |var: &str| {
        lookup(var)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing(var.to_string()))
    };
    let optional = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
    let millis = |var: &str, default: u64| match optional(var) {
        Some(value) => value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
        None => Ok(default),
    };

    let r2 = R2Config {
        account_id: required("R2_ACCOUNT_ID")?,
        bucket: required("R2_BUCKET")?,
        access_key_id: required("R2_ACCESS_KEY_ID")?,
        secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
        endpoint_url: optional("R2_ENDPOINT_URL"),
    };

    let queue = QueueConfig {
        completion_display_delay_ms: millis("UPLOAD_DISPLAY_DELAY_MS", DEFAULT_DISPLAY_DELAY_MS)?,
        notice_duration_ms: millis("UPLOAD_NOTICE_DURATION_MS", DEFAULT_NOTICE_DURATION_MS)?,
        ..QueueConfig::default()
    };

    let transport = match optional("UPLOAD_TRANSPORT") {
        Some(value) => value.parse::<Transport>().map_err(|_| ConfigError::Invalid {
            var: "UPLOAD_TRANSPORT".to_string(),
            value,
        })?,
        None => Transport::default(),
    };

    Ok(UploaderConfig {
        r2,
        queue,
        transport,
    })
}
