//! Collaborator contracts for the report resource and metrics data services.

mod http;

pub use http::HttpReportApi;

use crate::errors::AppResult;
use crate::models::{
    AutoRefreshBudget, AutoRefreshToggle, CreateReportPayload, MetricsPayload, MetricsQuery, Report, ReportPatch,
    ReportRecord, SyncStatusSnapshot,
};
use async_trait::async_trait;

#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn list_reports(&self, project_id: &str) -> AppResult<Vec<Report>>;

    async fn create_report(&self, payload: &CreateReportPayload) -> AppResult<Report>;

    /// Field-merge update. The echoed record may omit fields.
    async fn update_report(&self, report_id: &str, patch: &ReportPatch) -> AppResult<ReportRecord>;

    async fn delete_report(&self, report_id: &str) -> AppResult<()>;

    async fn restore_report(&self, report_id: &str) -> AppResult<Report>;

    async fn get_sync_status(&self, report_id: &str) -> AppResult<SyncStatusSnapshot>;

    async fn extend_range(&self, report_id: &str, target_days: u32) -> AppResult<SyncStatusSnapshot>;

    async fn cancel_sync(&self, report_id: &str, reason: &str) -> AppResult<()>;

    async fn touch_report(&self, report_id: &str) -> AppResult<()>;

    async fn toggle_auto_refresh(&self, report_id: &str, enable: bool) -> AppResult<AutoRefreshToggle>;

    async fn auto_refresh_budget(&self, project_id: &str) -> AppResult<AutoRefreshBudget>;
}

#[async_trait]
pub trait MetricsApi: Send + Sync {
    async fn fetch_metrics(&self, query: &MetricsQuery) -> AppResult<MetricsPayload>;
}
