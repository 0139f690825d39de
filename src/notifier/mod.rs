//! Completion callbacks to the originating application.
//!
//! One POST per outcome, authenticated by the shared secret carried in the
//! body. There is no retry here: the worker decides what a failed callback
//! means for the job (nothing, per the pipeline's swallow-and-log policy).

use crate::job_queue::CallbackTarget;
use crate::transcoding::TechnicalMetadata;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised when a callback cannot be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("callback request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("callback rejected with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Outcome value carried in the callback body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Ready,
    Failed,
}

/// JSON body of a completion callback.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackBody<'a> {
    pub sound_id: &'a str,
    pub status: CallbackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp3_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a TechnicalMetadata>,
    pub secret: &'a str,
}

/// Posts job outcomes back to the originating application.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Report a successfully transcoded sound with its metadata.
    async fn notify_ready(
        &self,
        target: &CallbackTarget,
        sound_id: &str,
        mp3_url: &str,
        metadata: &TechnicalMetadata,
    ) -> Result<(), NotifyError>;

    /// Report a failed job. Carries no metadata.
    async fn notify_failed(&self, target: &CallbackTarget, sound_id: &str)
        -> Result<(), NotifyError>;
}

/// Notifier delivering callbacks over HTTP.
pub struct HttpCallbackNotifier {
    client: reqwest::Client,
}

impl HttpCallbackNotifier {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    async fn post(&self, url: &str, body: &CallbackBody<'_>) -> Result<(), NotifyError> {
        let response = self.client.post(url).json(body).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status()));
        }

        debug!(url, status = ?body.status, "callback delivered");
        Ok(())
    }
}

#[async_trait]
impl CompletionNotifier for HttpCallbackNotifier {
    async fn notify_ready(
        &self,
        target: &CallbackTarget,
        sound_id: &str,
        mp3_url: &str,
        metadata: &TechnicalMetadata,
    ) -> Result<(), NotifyError> {
        let body = CallbackBody {
            sound_id,
            status: CallbackStatus::Ready,
            mp3_url: Some(mp3_url),
            metadata: Some(metadata),
            secret: &target.secret,
        };
        self.post(&target.url, &body).await
    }

    async fn notify_failed(
        &self,
        target: &CallbackTarget,
        sound_id: &str,
    ) -> Result<(), NotifyError> {
        let body = CallbackBody {
            sound_id,
            status: CallbackStatus::Failed,
            mp3_url: None,
            metadata: None,
            secret: &target.secret,
        };
        self.post(&target.url, &body).await
    }
}
