//! Delivery of captured frames.
//!
//! Frames either land as individual JPEG files in a local directory or are
//! POSTed to an HTTP endpoint. The strategy is picked once at startup from
//! the [`DeliveryTarget`]; neither strategy retries, the next tick is the
//! retry.

use crate::config::DeliveryTarget;
use crate::frame_capturer::FramePayload;
use async_trait::async_trait;
use chrono::Local;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Content type sent with every POSTed frame.
pub const FRAME_CONTENT_TYPE: &str = "image/jpeg";

/// Extension of frames written to disk.
pub const FRAME_EXTENSION: &str = "jpg";

/// Upper bound on same-name retries within one millisecond.
const MAX_NAME_SUFFIX: u32 = 1000;

/// Errors that can occur while delivering a frame.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to create output directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write frame to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status: {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// What a deliverer does with a frame, for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    Save,
    Post,
}

impl DeliveryAction {
    /// Present tense, e.g. "save failed".
    pub fn verb(self) -> &'static str {
        match self {
            DeliveryAction::Save => "save",
            DeliveryAction::Post => "post",
        }
    }

    /// Past tense, e.g. "saved frame".
    pub fn past_tense(self) -> &'static str {
        match self {
            DeliveryAction::Save => "saved",
            DeliveryAction::Post => "posted",
        }
    }
}

/// Anything that can dispose of one frame.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameDeliverer: Send + Sync {
    /// Deliver `payload`, giving up on remote calls after `deadline`.
    async fn deliver(&self, payload: &FramePayload, deadline: Duration)
        -> Result<(), DeliveryError>;

    fn action(&self) -> DeliveryAction;
}

/// Build the deliverer for the configured target.
pub fn for_target(target: &DeliveryTarget) -> Result<Box<dyn FrameDeliverer>, DeliveryError> {
    match target {
        DeliveryTarget::Local { output_dir } => Ok(Box::new(LocalDeliverer::new(output_dir))),
        DeliveryTarget::Remote { endpoint } => Ok(Box::new(HttpDeliverer::new(endpoint)?)),
    }
}

/// Writes every frame to its own timestamped file.
#[derive(Debug, Clone)]
pub struct LocalDeliverer {
    output_dir: PathBuf,
}

impl LocalDeliverer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create a new file for `stem`, appending `_1`, `_2`, ... while the name
    /// is taken.
    async fn create_unique(&self, stem: &str) -> Result<(PathBuf, tokio::fs::File), DeliveryError> {
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{stem}.{FRAME_EXTENSION}")
            } else {
                format!("{stem}_{suffix}.{FRAME_EXTENSION}")
            };
            let path = self.output_dir.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    if suffix > 0 {
                        warn!(
                            path = %path.display(),
                            "Frame name already taken within the same millisecond, added suffix"
                        );
                    }
                    return Ok((path, file));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_NAME_SUFFIX => {
                    suffix += 1;
                }
                Err(source) => return Err(DeliveryError::Write { path, source }),
            }
        }
    }
}

/// Local timestamp with millisecond precision, e.g. `20240115_103045.123`.
pub fn frame_file_stem() -> String {
    Local::now().format("%Y%m%d_%H%M%S%.3f").to_string()
}

#[async_trait]
impl FrameDeliverer for LocalDeliverer {
    async fn deliver(
        &self,
        payload: &FramePayload,
        _deadline: Duration,
    ) -> Result<(), DeliveryError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| DeliveryError::CreateDir {
                path: self.output_dir.clone(),
                source,
            })?;

        let (path, mut file) = self.create_unique(&frame_file_stem()).await?;

        let write = async {
            file.write_all(payload.data()).await?;
            file.flush().await
        };
        write
            .await
            .map_err(|source| DeliveryError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), size_bytes = payload.len(), "Frame written");
        Ok(())
    }

    fn action(&self) -> DeliveryAction {
        DeliveryAction::Save
    }
}

/// POSTs every frame to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpDeliverer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDeliverer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(DeliveryError::Client)?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FrameDeliverer for HttpDeliverer {
    async fn deliver(&self, payload: &FramePayload, deadline: Duration) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, FRAME_CONTENT_TYPE)
            .timeout(deadline)
            .body(payload.data().clone())
            .send()
            .await
            .map_err(|source| DeliveryError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }

        debug!(status = %status, size_bytes = payload.len(), "Frame posted");
        Ok(())
    }

    fn action(&self) -> DeliveryAction {
        DeliveryAction::Post
    }
}
