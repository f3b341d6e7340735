use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use super::types::ReportRecord;

/// Structured error body some report-endpoint rejections carry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportErrorDetail {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Classified report-submission failures. The aggregator never retries
/// these; they are logged and the record is gone.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report rejected with status {status}")]
    Client {
        status: u16,
        detail: Option<ReportErrorDetail>,
    },
    #[error("report endpoint failed with status {status}")]
    Server { status: u16 },
    #[error("report transport failure: {0}")]
    Transport(String),
}

/// External endpoint accepting one telemetry record per authenticated
/// request. Ownership of the record transfers to the sink.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit(&self, record: ReportRecord) -> Result<(), ReportError>;
}

/// HTTP report sink posting records as JSON with bearer authentication.
pub struct HttpReportSink {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl HttpReportSink {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn submit(&self, record: ReportRecord) -> Result<(), ReportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&record)
            .send()
            .await
            .map_err(|err| ReportError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("report accepted ({})", status.as_u16());
            return Ok(());
        }
        if status.is_client_error() {
            let detail = response.json::<ReportErrorDetail>().await.ok();
            return Err(ReportError::Client {
                status: status.as_u16(),
                detail,
            });
        }
        Err(ReportError::Server {
            status: status.as_u16(),
        })
    }
}
