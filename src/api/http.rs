use super::{MetricsApi, ReportApi};
use crate::config::CoreConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AutoRefreshBudget, AutoRefreshToggle, CreateReportPayload, MetricsPayload, MetricsQuery, Report, ReportPatch,
    ReportRecord, SyncStatusSnapshot,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// JSON-over-HTTP implementation of both collaborator traits.
#[derive(Clone)]
pub struct HttpReportApi {
    inner: reqwest::Client,
    config: Arc<CoreConfig>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpReportApi {
    pub fn new(config: CoreConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build reqwest client")?;
        let base_url = normalize_base_url(&config.api_base_url);

        Ok(Self {
            inner: client,
            config: Arc::new(config),
            base_url,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .inner
            .request(method, self.join_path(path))
            .header("X-Request-Id", Uuid::new_v4().to_string());
        if let Some(token) = self.config.bearer_token() {
            builder = builder.header(header::AUTHORIZATION, token);
        }
        builder
    }

    fn join_path(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> AppResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(error_for_status(status, &bytes));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| AppError::Api(format!("malformed response body ({status}): {err}")))
    }

    async fn send_without_body(&self, builder: reqwest::RequestBuilder) -> AppResult<()> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = response.bytes().await?;
        Err(error_for_status(status, &bytes))
    }
}

#[async_trait]
impl ReportApi for HttpReportApi {
    async fn list_reports(&self, project_id: &str) -> AppResult<Vec<Report>> {
        let builder = self.request(Method::GET, &format!("projects/{project_id}/reports"));
        self.send(builder).await
    }

    async fn create_report(&self, payload: &CreateReportPayload) -> AppResult<Report> {
        let builder = self.request(Method::POST, "reports").json(payload);
        self.send(builder).await
    }

    async fn update_report(&self, report_id: &str, patch: &ReportPatch) -> AppResult<ReportRecord> {
        let builder = self
            .request(Method::PATCH, &format!("reports/{report_id}"))
            .json(patch);
        self.send(builder).await
    }

    async fn delete_report(&self, report_id: &str) -> AppResult<()> {
        let builder = self.request(Method::DELETE, &format!("reports/{report_id}"));
        self.send_without_body(builder).await
    }

    async fn restore_report(&self, report_id: &str) -> AppResult<Report> {
        let builder = self.request(Method::POST, &format!("reports/{report_id}/restore"));
        self.send(builder).await
    }

    async fn get_sync_status(&self, report_id: &str) -> AppResult<SyncStatusSnapshot> {
        let builder = self.request(Method::GET, &format!("reports/{report_id}/sync-status"));
        self.send(builder).await
    }

    async fn extend_range(&self, report_id: &str, target_days: u32) -> AppResult<SyncStatusSnapshot> {
        let builder = self
            .request(Method::POST, &format!("reports/{report_id}/extend"))
            .json(&json!({ "targetDays": target_days }));
        self.send(builder).await
    }

    async fn cancel_sync(&self, report_id: &str, reason: &str) -> AppResult<()> {
        let builder = self
            .request(Method::POST, &format!("reports/{report_id}/cancel-sync"))
            .json(&json!({ "reason": reason }));
        self.send_without_body(builder).await
    }

    async fn touch_report(&self, report_id: &str) -> AppResult<()> {
        let builder = self.request(Method::POST, &format!("reports/{report_id}/touch"));
        self.send_without_body(builder).await
    }

    async fn toggle_auto_refresh(&self, report_id: &str, enable: bool) -> AppResult<AutoRefreshToggle> {
        let builder = self
            .request(Method::PATCH, &format!("reports/{report_id}/auto-refresh"))
            .json(&json!({ "enabled": enable }));
        self.send(builder).await
    }

    async fn auto_refresh_budget(&self, project_id: &str) -> AppResult<AutoRefreshBudget> {
        let builder = self.request(Method::GET, &format!("projects/{project_id}/auto-refresh-budget"));
        self.send(builder).await
    }
}

#[async_trait]
impl MetricsApi for HttpReportApi {
    async fn fetch_metrics(&self, query: &MetricsQuery) -> AppResult<MetricsPayload> {
        let builder = self.request(Method::POST, "metrics/query").json(query);
        self.send(builder).await
    }
}

fn normalize_base_url(input: &str) -> String {
    input.trim_end_matches('/').to_string()
}

fn error_for_status(status: StatusCode, body: &[u8]) -> AppError {
    let message = serde_json::from_slice::<ApiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message.or(parsed.error))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    match status {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            AppError::Validation(message)
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => AppError::NotFound(message),
        _ => AppError::Api(format!("{status}: {message}")),
    }
}
