use crate::api::{HttpReportApi, MetricsApi, ReportApi};
use crate::auto_refresh::AutoRefreshLimiter;
use crate::cache::{comparison_window, CacheKey, MaterializedReport, ReportCache};
use crate::config::CoreConfig;
use crate::errors::{AppError, AppResult};
use crate::metrics::{resolved_columns, MetricCatalog, ResolvedColumn};
use crate::mirror::{LocalMirror, MirrorSelection};
use crate::models::{
    normalize_sync_progress, AutoRefreshBudget, CoreEvent, CreateReportPayload, EntityTab, MetricId, Report,
    ReportPatch, ReportStatus,
};
use crate::mutation_queue::MutationQueue;
use crate::store::ReportStateStore;
use crate::sync_tracker::SyncStatusTracker;
use crate::view::{compute_view, Pagination, Trend, ViewRequest, ViewRow};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// One rendered page of the active tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedView {
    pub report_id: String,
    pub tab: EntityTab,
    pub columns: Vec<ResolvedColumn>,
    pub rows: Vec<ViewRow>,
    pub total_rows: usize,
    pub page: usize,
    pub page_count: usize,
    pub summary: BTreeMap<MetricId, f64>,
    pub trends: BTreeMap<MetricId, Trend>,
    pub row_trends: BTreeMap<String, BTreeMap<MetricId, Trend>>,
}

/// Session-scoped entry point wiring the store, queue, tracker, limiter and
/// cache together for one user session.
pub struct DashboardCore {
    config: CoreConfig,
    catalog: Arc<MetricCatalog>,
    api: Arc<dyn ReportApi>,
    store: ReportStateStore,
    queue: MutationQueue,
    tracker: SyncStatusTracker,
    limiter: AutoRefreshLimiter,
    cache: ReportCache,
    mirror: Option<Arc<LocalMirror>>,
    events: broadcast::Sender<CoreEvent>,
}

impl DashboardCore {
    pub fn new(
        config: CoreConfig,
        report_api: Arc<dyn ReportApi>,
        metrics_api: Arc<dyn MetricsApi>,
        catalog: MetricCatalog,
    ) -> AppResult<Arc<Self>> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let catalog = Arc::new(catalog);
        let store = ReportStateStore::new();
        let mirror = config.mirror_path.as_deref().and_then(|path| match LocalMirror::new(path) {
            Ok(mirror) => Some(Arc::new(mirror)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "local mirror unavailable");
                None
            }
        });

        let this = Arc::new(Self {
            queue: MutationQueue::new(
                report_api.clone(),
                store.clone(),
                events.clone(),
                config.mutation_debounce(),
            ),
            tracker: SyncStatusTracker::new(
                report_api.clone(),
                store.clone(),
                events.clone(),
                config.sync_poll_interval(),
            ),
            limiter: AutoRefreshLimiter::new(report_api.clone(), store.clone(), events.clone()),
            cache: ReportCache::new(metrics_api, catalog.clone(), events.clone()),
            api: report_api,
            config,
            catalog,
            store,
            mirror,
            events,
        });

        let weak = Arc::downgrade(&this);
        this.tracker.set_ready_observer(Arc::new(move |report_id: &str| {
            if let Some(strong) = weak.upgrade() {
                strong.cache.on_sync_completed(report_id);
            }
        }));

        Ok(this)
    }

    /// Wires the HTTP collaborators from `config` with the standard catalog.
    pub fn from_config(config: CoreConfig) -> AppResult<Arc<Self>> {
        let api = Arc::new(HttpReportApi::new(config.clone())?);
        Self::new(config, api.clone(), api, MetricCatalog::standard())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ReportStateStore {
        &self.store
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    pub fn tracker(&self) -> &SyncStatusTracker {
        &self.tracker
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn report(&self, report_id: &str) -> AppResult<Report> {
        self.store
            .get(report_id)
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))
    }

    pub fn list_reports(&self, include_deleted: bool) -> Vec<Report> {
        match self.store.current_project() {
            Some(project_id) => self.store.list(&project_id, include_deleted),
            None => Vec::new(),
        }
    }

    /// Renders the mirrored list first when there is one, then replaces it
    /// wholesale with the server list. Switching projects tears down every
    /// timer of the previous one.
    pub async fn load_project(&self, project_id: &str) -> AppResult<Vec<Report>> {
        if let Some(previous) = self.store.current_project() {
            if previous != project_id {
                self.close_project().await;
            }
        }

        if let Some(mirrored) = self.mirror_reports(project_id) {
            let queue = self.queue.clone();
            self.store.replace_project(project_id, mirrored, |id| {
                queue.has_pending(id) || queue.is_in_flight(id)
            });
        }

        let mut reports = self.api.list_reports(project_id).await?;
        for report in &mut reports {
            report.sync_progress = normalize_sync_progress(report.sync_progress);
        }
        let queue = self.queue.clone();
        self.store.replace_project(project_id, reports, |id| {
            queue.has_pending(id) || queue.is_in_flight(id)
        });
        self.write_mirror(project_id);

        for report in self.store.list(project_id, false) {
            if report.status.is_active() {
                self.tracker.ensure_polling(&report.id);
            }
        }
        if let Err(err) = self.limiter.refresh_budget(project_id).await {
            tracing::warn!(project_id, error = %err, "failed to load auto-refresh budget");
        }

        let reports = self.store.list(project_id, false);
        tracing::info!(project_id, reports = reports.len(), "project loaded");
        Ok(reports)
    }

    /// Creating a report submits its initial sync job, so a `pending`
    /// answer moves straight to `syncing` and starts polling.
    pub async fn create_report(&self, payload: CreateReportPayload) -> AppResult<Report> {
        let mut report = self.api.create_report(&payload).await?;
        report.sync_progress = normalize_sync_progress(report.sync_progress);
        let report_id = report.id.clone();
        let project_id = report.project_id.clone();
        let report = self.store.upsert_confirmed(report);
        let report = if report.status == ReportStatus::Pending {
            self.tracker.mark_sync_accepted(&report_id)?
        } else {
            self.tracker.ensure_polling(&report_id);
            report
        };
        self.write_mirror(&project_id);
        tracing::info!(report_id = %report_id, "report created");
        Ok(report)
    }

    /// Optimistic edit; persisted after the debounce window. Cached rows
    /// were fetched for the old entity selection, so a selection edit drops
    /// them.
    pub fn update_report(&self, report_id: &str, patch: ReportPatch) -> AppResult<Report> {
        let selections_changed = patch.selections.is_some();
        let report = self.queue.queue_update(report_id, patch)?;
        if selections_changed {
            let removed = self.cache.refresh_cache(report_id);
            tracing::debug!(report_id, removed, "report cache invalidated after selection edit");
        }
        Ok(report)
    }

    pub async fn flush(&self, report_id: &str) -> AppResult<()> {
        self.queue.flush_now(report_id).await
    }

    /// Soft delete. Queued edits are delivered first so they are not lost
    /// if the report is restored.
    pub async fn delete_report(&self, report_id: &str) -> AppResult<Report> {
        if let Err(err) = self.queue.flush_now(report_id).await {
            tracing::warn!(report_id, error = %err, "pending edits failed before delete");
        }
        let report = self.tracker.delete_report(report_id).await?;
        self.cache.refresh_cache(report_id);
        if self.store.current_report().as_deref() == Some(report_id) {
            self.store.set_current_report(None)?;
            self.write_selection();
        }
        self.write_mirror(&report.project_id);
        Ok(report)
    }

    pub async fn restore_report(&self, report_id: &str) -> AppResult<Report> {
        let report = self.tracker.restore_report(report_id).await?;
        self.write_mirror(&report.project_id);
        Ok(report)
    }

    /// Makes the report current, stamps it as opened and makes sure its
    /// status is being watched. The touch call is fire-and-forget.
    pub fn open_report(&self, report_id: &str) -> AppResult<Report> {
        let report = self.report(report_id)?;
        if report.status == ReportStatus::Deleted {
            return Err(AppError::InvalidTransition(format!("report {report_id} is deleted")));
        }
        if let Some(previous) = self.store.current_report() {
            if previous != report_id {
                self.close_report(&previous);
            }
        }

        self.store.set_current_report(Some(report_id))?;
        let report = self
            .store
            .update_confirmed(report_id, |report| report.last_opened_at = Some(Utc::now()))
            .unwrap_or(report);

        let api = self.api.clone();
        let id = report_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = api.touch_report(&id).await {
                tracing::debug!(report_id = %id, error = %err, "touch failed");
            }
        });

        self.tracker.ensure_polling(report_id);
        self.write_selection();
        Ok(report)
    }

    /// Leaves the report view: its debounce timer is cleared and pending
    /// edits are delivered in the background.
    pub fn close_report(&self, report_id: &str) {
        self.queue.teardown(report_id);
        if self.store.current_report().as_deref() == Some(report_id) {
            // The pointer only fails for unknown ids; clearing cannot.
            let _ = self.store.set_current_report(None);
            self.write_selection();
        }
    }

    /// Switches the drilled-in tab. The tab is view state: it is kept in
    /// the store and the local mirror and never sent to the backend. Returns
    /// the cached rows for the tab when they are already materialized.
    pub fn switch_tab(&self, report_id: &str, tab: EntityTab) -> AppResult<Option<Arc<MaterializedReport>>> {
        let report = self.store.set_view_tab(report_id, tab)?;
        self.write_mirror(&report.project_id);
        Ok(self.cache.get(&CacheKey::for_report(&report, tab)))
    }

    /// Loads the active tab's rows, fetching only on a cache miss.
    pub async fn load_view_data(&self, report_id: &str) -> AppResult<Arc<MaterializedReport>> {
        let report = self.report(report_id)?;
        self.cache.load(&report, report.active_tab).await
    }

    /// Changes the display window. Cached rows stay valid: the window is a
    /// filter over the anchor range.
    pub fn set_display_window(&self, report_id: &str, date_from: NaiveDate, date_to: NaiveDate) -> AppResult<Report> {
        if date_from > date_to {
            return Err(AppError::Validation(format!(
                "display window starts ({date_from}) after it ends ({date_to})"
            )));
        }
        let report = self.queue.queue_update(
            report_id,
            ReportPatch {
                date_from: Some(date_from),
                date_to: Some(date_to),
                ..ReportPatch::default()
            },
        )?;
        if report.data_range.anchor().is_some() && !report.data_range.covers(date_from, date_to) {
            tracing::debug!(report_id, %date_from, %date_to, "display window exceeds loaded range");
        }
        Ok(report)
    }

    pub async fn extend_range(&self, report_id: &str, target_days: u32) -> AppResult<Report> {
        let report = self.tracker.extend_range(report_id, target_days).await?;
        self.cache.invalidate_stale_anchors(&report);
        Ok(report)
    }

    pub async fn cancel_sync(&self, report_id: &str, reason: &str) -> AppResult<Report> {
        self.tracker.cancel_sync(report_id, reason).await
    }

    pub async fn toggle_auto_refresh(&self, report_id: &str, enable: bool) -> AppResult<Report> {
        self.limiter.toggle_auto_refresh(report_id, enable).await
    }

    pub fn auto_refresh_budget(&self) -> Option<AutoRefreshBudget> {
        self.limiter.budget()
    }

    /// Synchronous render of the active tab from cached rows. `None` when
    /// the tab is not materialized yet; call `load_view_data` first.
    pub fn render_view(
        &self,
        report_id: &str,
        request: &ViewRequest,
        pagination: &mut Pagination,
    ) -> AppResult<Option<RenderedView>> {
        let report = self.report(report_id)?;
        let Some(materialized) = self.cache.get(&CacheKey::for_report(&report, report.active_tab)) else {
            return Ok(None);
        };

        let columns = resolved_columns(
            &self.catalog,
            &report.selected_metrics,
            materialized.observed_metrics(),
            materialized.occurrence_counts(),
        );
        let mut request = request.clone();
        request.metrics = columns.iter().map(|column| column.concrete.clone()).collect();

        let rows = materialized.window_rows(&self.catalog, report.date_from, report.date_to);
        let (previous_from, previous_to) = comparison_window(report.date_from, report.date_to);
        let comparison = materialized
            .covers(previous_from, previous_to)
            .then(|| materialized.window_rows(&self.catalog, previous_from, previous_to));
        let result = compute_view(&self.catalog, &rows, &request, comparison.as_deref());

        let total_rows = result.filtered_rows.len();
        pagination.clamp(total_rows);
        Ok(Some(RenderedView {
            report_id: report.id,
            tab: report.active_tab,
            columns,
            rows: pagination.slice(&result.filtered_rows).to_vec(),
            total_rows,
            page: pagination.page(),
            page_count: pagination.page_count(total_rows),
            summary: result.summary,
            trends: result.trends,
            row_trends: result.row_trends,
        }))
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.config.default_page_size)
    }

    /// Stops every poll loop, delivers queued edits and forgets the project.
    pub async fn close_project(&self) {
        self.tracker.teardown_all();
        if let Err(err) = self.queue.flush_all().await {
            tracing::warn!(error = %err, "pending edits failed while closing project");
        }
        self.store.clear();
        self.cache.clear();
        self.limiter.set_budget(None);
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.tracker.teardown_all();
        self.queue.shutdown().await
    }

    fn mirror_reports(&self, project_id: &str) -> Option<Vec<Report>> {
        let mirror = self.mirror.as_ref()?;
        match mirror.load_reports(project_id) {
            Ok(reports) => reports,
            Err(err) => {
                tracing::warn!(project_id, error = %err, "failed to read local mirror");
                None
            }
        }
    }

    fn write_mirror(&self, project_id: &str) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let reports = self.store.list(project_id, true);
        if let Err(err) = mirror.save_reports(project_id, &reports) {
            tracing::warn!(project_id, error = %err, "failed to write local mirror");
        }
    }

    fn write_selection(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let selection = MirrorSelection {
            project_id: self.store.current_project(),
            report_id: self.store.current_report(),
        };
        if let Err(err) = mirror.save_selection(&selection) {
            tracing::warn!(error = %err, "failed to write selection to local mirror");
        }
    }

    /// Last selection pointers persisted by the mirror, if any.
    pub fn last_selection(&self) -> Option<MirrorSelection> {
        let mirror = self.mirror.as_ref()?;
        mirror.load_selection().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to read selection from local mirror");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DashboardCore;
    use crate::config::CoreConfig;
    use crate::metrics::MetricCatalog;
    use crate::models::{
        sample_report, CreateReportPayload, EntityTab, ReportPatch, ReportStatus, Selections, SyncStatusSnapshot,
    };
    use crate::testing::{budget, day, sample_metrics_payload, ApiCall, MockMetricsApi, MockReportApi};
    use crate::view::{FilterMode, ViewRequest};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn core(report_api: Arc<MockReportApi>, metrics_api: Arc<MockMetricsApi>) -> Arc<DashboardCore> {
        DashboardCore::new(CoreConfig::default(), report_api, metrics_api, MetricCatalog::standard()).expect("core")
    }

    fn report_with_metrics(id: &str, metrics: &[&str]) -> crate::models::Report {
        let mut report = sample_report(id);
        report.selected_metrics = metrics.iter().map(|metric| metric.to_string()).collect();
        report.date_from = day(16);
        report.date_to = day(30);
        report
    }

    #[tokio::test(start_paused = true)]
    async fn switching_between_cached_tabs_makes_no_network_calls() {
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1")]));
        let metrics = Arc::new(MockMetricsApi::new(sample_metrics_payload()));
        let core = core(reports.clone(), metrics.clone());
        core.load_project("project-1").await.expect("load");

        core.load_view_data("r1").await.expect("campaigns");
        core.switch_tab("r1", EntityTab::Ads).expect("switch");
        core.load_view_data("r1").await.expect("ads");
        assert_eq!(metrics.queries().len(), 2);
        let calls_before = reports.calls().len();

        let cached = core.switch_tab("r1", EntityTab::Campaigns).expect("switch back");
        assert!(cached.is_some());
        let mut pagination = core.pagination();
        let view = core
            .render_view("r1", &ViewRequest::default(), &mut pagination)
            .expect("render")
            .expect("cached view");
        assert_eq!(view.tab, EntityTab::Campaigns);

        tokio::time::sleep(core.config().mutation_debounce() * 3).await;
        assert_eq!(metrics.queries().len(), 2);
        assert_eq!(reports.count(|call| matches!(call, ApiCall::UpdateReport(..))), 0);
        assert_eq!(reports.calls().len(), calls_before);
        assert_eq!(core.report("r1").expect("report").active_tab, EntityTab::Campaigns);
        assert!(core.store().pending_intent("r1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn created_report_syncs_until_ready_then_stops_polling() {
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1")]));
        let core = core(reports.clone(), Arc::new(MockMetricsApi::new(sample_metrics_payload())));
        core.load_project("project-1").await.expect("load");

        let created = core
            .create_report(CreateReportPayload {
                project_id: "project-1".to_string(),
                name: "Launch week".to_string(),
                selections: Selections::new(),
                active_tab: EntityTab::Campaigns,
                selected_metrics: vec!["spend".to_string()],
                date_from: day(1),
                date_to: day(30),
                requested_days: 30,
            })
            .await
            .expect("create");
        let id = created.id.clone();
        assert_eq!(created.status, ReportStatus::Syncing);
        assert!(core.tracker().is_polling(&id));
        assert_eq!(core.list_reports(false).len(), 2);

        reports.push_sync_status(
            &id,
            SyncStatusSnapshot {
                status: ReportStatus::Syncing,
                progress: Some(40.0),
                data_range: None,
                error: None,
            },
        );
        reports.push_sync_status(
            &id,
            SyncStatusSnapshot {
                status: ReportStatus::Ready,
                progress: None,
                data_range: None,
                error: None,
            },
        );
        let poll = core.config().sync_poll_interval();
        let polls = |reports: &MockReportApi| {
            reports.count(|call| matches!(call, ApiCall::GetSyncStatus(report_id) if *report_id == id))
        };

        tokio::time::sleep(poll + Duration::from_millis(10)).await;
        let report = core.report(&id).expect("report");
        assert_eq!(report.status, ReportStatus::Syncing);
        assert_eq!(report.sync_progress, 40.0);

        tokio::time::sleep(poll).await;
        assert_eq!(core.report(&id).expect("report").status, ReportStatus::Ready);
        assert!(!core.tracker().is_polling(&id));
        assert_eq!(polls(&reports), 2);

        tokio::time::sleep(poll * 4).await;
        assert_eq!(polls(&reports), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn selection_edit_drops_rows_fetched_for_old_selection() {
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1")]));
        let metrics = Arc::new(MockMetricsApi::new(sample_metrics_payload()));
        let core = core(reports, metrics.clone());
        core.load_project("project-1").await.expect("load");
        core.load_view_data("r1").await.expect("load data");
        assert_eq!(core.cache().len(), 1);

        core.update_report(
            "r1",
            ReportPatch {
                name: Some("renamed".to_string()),
                ..ReportPatch::default()
            },
        )
        .expect("rename");
        assert_eq!(core.cache().len(), 1);

        core.update_report(
            "r1",
            ReportPatch {
                selections: Some(Selections::from([(
                    EntityTab::Campaigns,
                    BTreeSet::from(["c2".to_string()]),
                )])),
                ..ReportPatch::default()
            },
        )
        .expect("select");
        assert!(core.cache().is_empty());

        core.load_view_data("r1").await.expect("reload");
        let queries = metrics.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].entity_ids, vec!["c2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn render_resolves_generic_metrics_and_compares_periods() {
        let reports = Arc::new(MockReportApi::with_reports(vec![report_with_metrics(
            "r1",
            &["spend", "conversions", "ctr", "revenue"],
        )]));
        let metrics = Arc::new(MockMetricsApi::new(sample_metrics_payload()));
        let core = core(reports, metrics);
        core.load_project("project-1").await.expect("load");
        core.load_view_data("r1").await.expect("load data");

        let request = ViewRequest {
            selected_group_keys: BTreeSet::from(["c1".to_string(), "c2".to_string()]),
            ..ViewRequest::default()
        };
        let mut pagination = core.pagination();
        let view = core
            .render_view("r1", &request, &mut pagination)
            .expect("render")
            .expect("view");

        let concrete = view
            .columns
            .iter()
            .map(|column| column.concrete.as_str())
            .collect::<Vec<_>>();
        assert_eq!(concrete, vec!["spend", "conversions_purchase", "ctr"]);
        assert_eq!(view.total_rows, 2);
        assert_eq!(view.summary["spend"], 15.0 * 15.0);
        let expected_ctr = (30.0 * 15.0) / (1_100.0 * 15.0) * 100.0;
        assert!((view.summary["ctr"] - expected_ctr).abs() < 1e-9);
        assert_eq!(view.trends["spend"].percent_change, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn display_window_change_keeps_cache_and_clamps_pages() {
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1")]));
        let metrics = Arc::new(MockMetricsApi::new(sample_metrics_payload()));
        let core = core(reports, metrics.clone());
        core.load_project("project-1").await.expect("load");
        core.load_view_data("r1").await.expect("load data");

        core.set_display_window("r1", day(10), day(12)).expect("window");
        let err = core
            .set_display_window("r1", day(12), day(10))
            .expect_err("inverted window");
        assert_eq!(err.code(), "VALIDATION_REJECTED");

        let mut pagination = crate::view::Pagination::new(1);
        pagination.set_page(9);
        let request = ViewRequest {
            filter_mode: FilterMode::SelectionOnly,
            selected_group_keys: BTreeSet::from(["c2".to_string()]),
            ..ViewRequest::default()
        };
        let view = core
            .render_view("r1", &request, &mut pagination)
            .expect("render")
            .expect("view");
        assert_eq!(view.total_rows, 1);
        assert_eq!(view.page, 1);
        assert_eq!(metrics.queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn opening_report_touches_and_polls_active_reports() {
        let mut syncing = sample_report("r2");
        syncing.status = ReportStatus::Syncing;
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1"), syncing]));
        reports.fail("touch_report");
        let core = core(reports.clone(), Arc::new(MockMetricsApi::new(sample_metrics_payload())));
        core.load_project("project-1").await.expect("load");
        assert!(core.tracker().is_polling("r2"));
        assert!(!core.tracker().is_polling("r1"));

        let opened = core.open_report("r1").expect("open");
        assert!(opened.last_opened_at.is_some());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reports.count(|call| matches!(call, ApiCall::TouchReport(id) if id == "r1")), 1);
        assert_eq!(core.store().current_report().as_deref(), Some("r1"));

        core.close_project().await;
        assert!(!core.tracker().is_polling("r2"));
        assert!(core.list_reports(false).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_limit_is_checked_before_network() {
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1")]));
        reports.set_budget(2, 2);
        let core = core(reports.clone(), Arc::new(MockMetricsApi::new(sample_metrics_payload())));
        core.load_project("project-1").await.expect("load");
        assert_eq!(core.auto_refresh_budget(), Some(budget(2, 2)));

        let err = core.toggle_auto_refresh("r1", true).await.expect_err("limit");
        assert_eq!(err.code(), "LIMIT_REACHED");
        assert_eq!(reports.count(|call| matches!(call, ApiCall::ToggleAutoRefresh(..))), 0);
        assert_eq!(core.auto_refresh_budget(), Some(budget(2, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_completion_refreshes_cached_rows() {
        let mut syncing = sample_report("r1");
        syncing.status = ReportStatus::Syncing;
        let reports = Arc::new(MockReportApi::with_reports(vec![syncing]));
        let metrics = Arc::new(MockMetricsApi::new(sample_metrics_payload()));
        let core = core(reports, metrics.clone());
        core.load_project("project-1").await.expect("load");
        core.load_view_data("r1").await.expect("load data");
        assert_eq!(core.cache().len(), 1);

        core.tracker()
            .transition("r1", ReportStatus::Ready)
            .expect("ready");
        assert!(core.cache().is_empty());
        core.load_view_data("r1").await.expect("reload");
        assert_eq!(metrics.queries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mirror_is_written_and_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CoreConfig {
            mirror_path: Some(dir.path().join("mirror.db")),
            ..CoreConfig::default()
        };
        let reports = Arc::new(MockReportApi::with_reports(vec![sample_report("r1")]));
        let metrics = Arc::new(MockMetricsApi::new(sample_metrics_payload()));
        let core = DashboardCore::new(config.clone(), reports.clone(), metrics.clone(), MetricCatalog::standard())
            .expect("core");
        core.load_project("project-1").await.expect("load");
        core.open_report("r1").expect("open");
        core.shutdown().await.expect("shutdown");
        drop(core);

        reports.fail("list_reports");
        let reloaded = DashboardCore::new(config, reports, metrics, MetricCatalog::standard()).expect("core");
        assert!(reloaded.load_project("project-1").await.is_err());
        assert_eq!(reloaded.list_reports(false).len(), 1);
        let selection = reloaded.last_selection().expect("selection");
        assert_eq!(selection.report_id.as_deref(), Some("r1"));
    }
}
