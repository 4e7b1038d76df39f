use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::io::ReaderStream;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{DatasetMetadata, ProcessRequest, ResultData};
use crate::services::file_check::SelectedFile;
use crate::session::SessionId;

/// Thin client for the analysis backend. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    analyze_url: String,
    process_url: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            analyze_url: config.endpoint("analyze-dataset"),
            process_url: config.endpoint("process-dataset"),
        })
    }

    pub async fn analyze_dataset(
        &self,
        file: &SelectedFile,
        session_id: &SessionId,
        is_sample_data: bool,
    ) -> Result<DatasetMetadata, AppError> {
        let start = std::time::Instant::now();
        tracing::info!(
            "Uploading {} ({}KB) for analysis, sample only: {}",
            file.name,
            file.size / 1024,
            is_sample_data
        );

        let handle = tokio::fs::File::open(&file.path).await?;
        let body = Body::wrap_stream(ReaderStream::new(handle));
        let part = Part::stream_with_length(body, file.size)
            .file_name(file.name.clone())
            .mime_str(file.content_type())
            .map_err(|e| AppError::InvalidInput(format!("Invalid content type: {}", e)))?;

        let form = Form::new()
            .part("file", part)
            .text("session_id", session_id.as_string())
            .text("is_sample_data", is_sample_data.to_string());

        let response = self
            .client
            .post(&self.analyze_url)
            .multipart(form)
            .send()
            .await?;
        let metadata: DatasetMetadata = read_json(response).await?;

        tracing::info!(
            "Analysis finished in {:?}: {} columns, filter: {}, aggregate: {}",
            start.elapsed(),
            metadata.columns.len(),
            metadata.can_filter,
            metadata.can_aggregate
        );
        Ok(metadata)
    }

    pub async fn process_dataset(&self, request: &ProcessRequest) -> Result<ResultData, AppError> {
        let start = std::time::Instant::now();
        tracing::info!("Requesting {}", request.processing_type);

        let response = self
            .client
            .post(&self.process_url)
            .json(request)
            .send()
            .await?;
        let data: ResultData = read_json(response).await?;

        tracing::info!(
            "Processing finished in {:?}: {} rows, {} charts",
            start.elapsed(),
            data.result.as_ref().map_or(0, Vec::len),
            data.graphs.len()
        );
        Ok(data)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = extract_detail(&body);
        tracing::error!("Backend responded {}: {:?}", status, detail);
        return Err(AppError::Server {
            status: status.as_u16(),
            detail,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Transport(format!("Failed to read response bytes: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::ParseError(format!("Unexpected response body: {}", e)))
}

/// Pulls a FastAPI-style `detail` out of an error body.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}
