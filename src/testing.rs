//! In-process collaborators for unit tests.

use crate::api::{MetricsApi, ReportApi};
use crate::errors::{AppError, AppResult};
use crate::models::{
    AutoRefreshBudget, AutoRefreshToggle, CreateReportPayload, DataRange, EntityMeta, EntityTab, MetricRecord,
    MetricsPayload, MetricsQuery, Report, ReportPatch, ReportRecord, ReportStatus, SyncStatusSnapshot,
};
use async_trait::async_trait;
use chrono::{Duration as DateDuration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiCall {
    ListReports(String),
    CreateReport(String),
    UpdateReport(String, ReportPatch),
    DeleteReport(String),
    RestoreReport(String),
    GetSyncStatus(String),
    ExtendRange(String, u32),
    CancelSync(String, String),
    TouchReport(String),
    ToggleAutoRefresh(String, bool),
    AutoRefreshBudget(String),
}

pub(crate) struct MockReportApi {
    reports: Mutex<HashMap<String, Report>>,
    calls: Mutex<Vec<ApiCall>>,
    failures: Mutex<HashSet<String>>,
    update_latency: Mutex<Duration>,
    extend_latency: Mutex<Duration>,
    extend_snapshot: Mutex<Option<SyncStatusSnapshot>>,
    sync_statuses: Mutex<HashMap<String, VecDeque<SyncStatusSnapshot>>>,
    budget: Mutex<AutoRefreshBudget>,
    echo_omits_tags: AtomicBool,
    active_updates: AtomicUsize,
    max_active_updates: AtomicUsize,
}

impl MockReportApi {
    pub(crate) fn new() -> Self {
        Self {
            reports: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            update_latency: Mutex::new(Duration::ZERO),
            extend_latency: Mutex::new(Duration::ZERO),
            extend_snapshot: Mutex::new(None),
            sync_statuses: Mutex::new(HashMap::new()),
            budget: Mutex::new(AutoRefreshBudget {
                limit: 5,
                current: 0,
                remaining: 5,
            }),
            echo_omits_tags: AtomicBool::new(false),
            active_updates: AtomicUsize::new(0),
            max_active_updates: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_reports(reports: Vec<Report>) -> Self {
        let api = Self::new();
        {
            let mut stored = api.reports.lock().expect("reports lock");
            for report in reports {
                stored.insert(report.id.clone(), report);
            }
        }
        api
    }

    pub(crate) fn fail(&self, operation: &str) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(operation.to_string());
    }

    pub(crate) fn recover(&self, operation: &str) {
        self.failures.lock().expect("failures lock").remove(operation);
    }

    pub(crate) fn set_update_latency(&self, latency: Duration) {
        *self.update_latency.lock().expect("latency lock") = latency;
    }

    pub(crate) fn set_extend_latency(&self, latency: Duration) {
        *self.extend_latency.lock().expect("latency lock") = latency;
    }

    /// Replaces the default `ready` answer to range extensions.
    pub(crate) fn respond_to_extend_with(&self, snapshot: SyncStatusSnapshot) {
        *self.extend_snapshot.lock().expect("extend lock") = Some(snapshot);
    }

    pub(crate) fn set_budget(&self, limit: u32, current: u32) {
        *self.budget.lock().expect("budget lock") = budget(limit, current);
    }

    pub(crate) fn omit_tags_in_echo(&self) {
        self.echo_omits_tags.store(true, Ordering::SeqCst);
    }

    /// Queues snapshots returned by successive status polls. The last one
    /// keeps being returned once the queue is down to it.
    pub(crate) fn push_sync_status(&self, report_id: &str, snapshot: SyncStatusSnapshot) {
        self.sync_statuses
            .lock()
            .expect("status lock")
            .entry(report_id.to_string())
            .or_default()
            .push_back(snapshot);
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn update_calls(&self) -> Vec<(String, ReportPatch)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::UpdateReport(id, patch) => Some((id, patch)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, matches: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub(crate) fn max_concurrent_updates(&self) -> usize {
        self.max_active_updates.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn check(&self, operation: &str) -> AppResult<()> {
        if self.failures.lock().expect("failures lock").contains(operation) {
            return Err(AppError::Api(format!("{operation} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl ReportApi for MockReportApi {
    async fn list_reports(&self, project_id: &str) -> AppResult<Vec<Report>> {
        self.record(ApiCall::ListReports(project_id.to_string()));
        self.check("list_reports")?;
        let mut reports = self
            .reports
            .lock()
            .expect("reports lock")
            .values()
            .filter(|report| report.project_id == project_id)
            .cloned()
            .collect::<Vec<_>>();
        reports.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(reports)
    }

    async fn create_report(&self, payload: &CreateReportPayload) -> AppResult<Report> {
        self.record(ApiCall::CreateReport(payload.name.clone()));
        self.check("create_report")?;
        let mut report = crate::models::sample_report(&format!("created-{}", self.calls().len()));
        report.project_id = payload.project_id.clone();
        report.name = payload.name.clone();
        report.selections = payload.selections.clone();
        report.active_tab = payload.active_tab;
        report.selected_metrics = payload.selected_metrics.clone();
        report.date_from = payload.date_from;
        report.date_to = payload.date_to;
        report.status = ReportStatus::Pending;
        report.sync_progress = 0.0;
        report.data_range = DataRange {
            requested_days: payload.requested_days,
            ..DataRange::default()
        };
        self.reports
            .lock()
            .expect("reports lock")
            .insert(report.id.clone(), report.clone());
        Ok(report)
    }

    async fn update_report(&self, report_id: &str, patch: &ReportPatch) -> AppResult<ReportRecord> {
        self.record(ApiCall::UpdateReport(report_id.to_string(), patch.clone()));
        let active = self.active_updates.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_updates.fetch_max(active, Ordering::SeqCst);
        let latency = *self.update_latency.lock().expect("latency lock");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.active_updates.fetch_sub(1, Ordering::SeqCst);
        self.check("update_report")?;

        let omit_tags = self.echo_omits_tags.load(Ordering::SeqCst);
        Ok(ReportRecord {
            id: report_id.to_string(),
            name: patch.name.clone(),
            selections: patch.selections.clone(),
            active_tab: patch.active_tab,
            selected_metrics: patch.selected_metrics.clone(),
            date_from: patch.date_from,
            date_to: patch.date_to,
            pinned: patch.pinned,
            tags: if omit_tags { None } else { patch.tags.clone() },
            data_range: None,
            auto_refresh: None,
            updated_at: Some(Utc::now()),
        })
    }

    async fn delete_report(&self, report_id: &str) -> AppResult<()> {
        self.record(ApiCall::DeleteReport(report_id.to_string()));
        self.check("delete_report")
    }

    async fn restore_report(&self, report_id: &str) -> AppResult<Report> {
        self.record(ApiCall::RestoreReport(report_id.to_string()));
        self.check("restore_report")?;
        let mut report = self
            .reports
            .lock()
            .expect("reports lock")
            .get(report_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))?;
        report.status = ReportStatus::Ready;
        report.deleted_at = None;
        Ok(report)
    }

    async fn get_sync_status(&self, report_id: &str) -> AppResult<SyncStatusSnapshot> {
        self.record(ApiCall::GetSyncStatus(report_id.to_string()));
        self.check("get_sync_status")?;
        let mut statuses = self.sync_statuses.lock().expect("status lock");
        let queue = statuses
            .get_mut(report_id)
            .ok_or_else(|| AppError::NotFound(format!("sync status for {report_id}")))?;
        let snapshot = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        snapshot.ok_or_else(|| AppError::NotFound(format!("sync status for {report_id}")))
    }

    async fn extend_range(&self, report_id: &str, target_days: u32) -> AppResult<SyncStatusSnapshot> {
        self.record(ApiCall::ExtendRange(report_id.to_string(), target_days));
        let latency = *self.extend_latency.lock().expect("latency lock");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check("extend_range")?;
        if let Some(snapshot) = self.extend_snapshot.lock().expect("extend lock").clone() {
            return Ok(snapshot);
        }

        let end = self
            .reports
            .lock()
            .expect("reports lock")
            .get(report_id)
            .and_then(|report| report.data_range.end_date)
            .unwrap_or_else(|| Utc::now().date_naive());
        let start = end - DateDuration::days(i64::from(target_days.saturating_sub(1)));
        Ok(SyncStatusSnapshot {
            status: ReportStatus::Ready,
            progress: Some(100.0),
            data_range: Some(DataRange {
                loaded_days: target_days,
                requested_days: target_days,
                start_date: Some(start),
                end_date: Some(end),
            }),
            error: None,
        })
    }

    async fn cancel_sync(&self, report_id: &str, reason: &str) -> AppResult<()> {
        self.record(ApiCall::CancelSync(report_id.to_string(), reason.to_string()));
        self.check("cancel_sync")
    }

    async fn touch_report(&self, report_id: &str) -> AppResult<()> {
        self.record(ApiCall::TouchReport(report_id.to_string()));
        self.check("touch_report")
    }

    async fn toggle_auto_refresh(&self, report_id: &str, enable: bool) -> AppResult<AutoRefreshToggle> {
        self.record(ApiCall::ToggleAutoRefresh(report_id.to_string(), enable));
        self.check("toggle_auto_refresh")?;
        let mut current = self.budget.lock().expect("budget lock");
        let count = if enable {
            current.current.saturating_add(1)
        } else {
            current.current.saturating_sub(1)
        };
        *current = budget(current.limit, count);
        Ok(AutoRefreshToggle {
            report_id: report_id.to_string(),
            auto_refresh: enable,
            budget: *current,
        })
    }

    async fn auto_refresh_budget(&self, project_id: &str) -> AppResult<AutoRefreshBudget> {
        self.record(ApiCall::AutoRefreshBudget(project_id.to_string()));
        self.check("auto_refresh_budget")?;
        Ok(*self.budget.lock().expect("budget lock"))
    }
}

pub(crate) fn budget(limit: u32, current: u32) -> AutoRefreshBudget {
    AutoRefreshBudget {
        limit,
        current,
        remaining: i64::from(limit) - i64::from(current),
    }
}

pub(crate) struct MockMetricsApi {
    payload: Mutex<MetricsPayload>,
    queries: Mutex<Vec<MetricsQuery>>,
    latency: Mutex<Duration>,
    failing: AtomicBool,
}

impl MockMetricsApi {
    pub(crate) fn new(payload: MetricsPayload) -> Self {
        Self {
            payload: Mutex::new(payload),
            queries: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("latency lock") = latency;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn queries(&self) -> Vec<MetricsQuery> {
        self.queries.lock().expect("queries lock").clone()
    }
}

#[async_trait]
impl MetricsApi for MockMetricsApi {
    async fn fetch_metrics(&self, query: &MetricsQuery) -> AppResult<MetricsPayload> {
        self.queries.lock().expect("queries lock").push(query.clone());
        let latency = *self.latency.lock().expect("latency lock");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Api("metrics backend unavailable".to_string()));
        }
        let payload = self.payload.lock().expect("payload lock").clone();
        let records = payload
            .records
            .into_iter()
            .filter(|record| record.date >= query.date_from && record.date <= query.date_to)
            .collect();
        Ok(MetricsPayload {
            records,
            entities: payload.entities,
        })
    }
}

pub(crate) fn day(day_of_month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 9, day_of_month).expect("valid september date")
}

fn entity(id: &str, tab: EntityTab, name: &str, parent: Option<&str>) -> EntityMeta {
    EntityMeta {
        id: id.to_string(),
        tab,
        name: name.to_string(),
        status: Some("ACTIVE".to_string()),
        created_on: Some(day(1)),
        parent_id: parent.map(str::to_string),
    }
}

/// Two campaigns under one account, one ad under each campaign, with daily
/// rows across September 2026. Campaign `c1` spends 10 a day with 1000
/// impressions and 20 clicks; `c2` spends 5 a day with 100 impressions and
/// 10 clicks, and records lead conversions instead of purchases.
pub(crate) fn sample_metrics_payload() -> MetricsPayload {
    let entities = vec![
        entity("act-1", EntityTab::Accounts, "Main account", None),
        entity("c1", EntityTab::Campaigns, "Prospecting", Some("act-1")),
        entity("c2", EntityTab::Campaigns, "Retargeting", Some("act-1")),
        entity("ad-1", EntityTab::Ads, "Video A", Some("c1")),
        entity("ad-2", EntityTab::Ads, "Carousel B", Some("c2")),
    ];

    let mut records = Vec::new();
    for day_of_month in 1..=30 {
        let date = day(day_of_month);
        for (entity_id, spend, impressions, clicks, conversion) in [
            ("c1", 10.0, 1_000.0, 20.0, ("conversions_purchase", 2.0)),
            ("c2", 5.0, 100.0, 10.0, ("conversions_lead", 1.0)),
            ("ad-1", 10.0, 1_000.0, 20.0, ("conversions_purchase", 2.0)),
            ("ad-2", 5.0, 100.0, 10.0, ("conversions_lead", 1.0)),
        ] {
            records.push(MetricRecord {
                date,
                entity_id: entity_id.to_string(),
                metrics: BTreeMap::from([
                    ("spend".to_string(), spend),
                    ("impressions".to_string(), impressions),
                    ("clicks".to_string(), clicks),
                    (conversion.0.to_string(), conversion.1),
                    ("ctr".to_string(), clicks / impressions * 100.0),
                ]),
            });
        }
    }
    MetricsPayload { records, entities }
}
