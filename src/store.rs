use crate::errors::{AppError, AppResult};
use crate::models::{EntityTab, Report, ReportPatch, ReportRecord};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Report entities for the loaded project, kept as two layers: the last
/// server-acknowledged report and the merged edits the server has not yet
/// acknowledged. Readers always see `confirmed` with `intent` applied on top.
#[derive(Clone, Default)]
pub struct ReportStateStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    confirmed: HashMap<String, Report>,
    intent: HashMap<String, ReportPatch>,
    current_project: Option<String>,
    current_report: Option<String>,
}

impl StoreInner {
    fn visible(&self, report_id: &str) -> Option<Report> {
        let mut report = self.confirmed.get(report_id)?.clone();
        if let Some(intent) = self.intent.get(report_id) {
            intent.apply_to(&mut report);
        }
        Some(report)
    }
}

impl ReportStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swaps in the full report list of `project_id`. Reports of other
    /// projects are dropped. Unacknowledged edits survive only for reports
    /// still present and for which `keep_intent` answers true.
    pub fn replace_project(&self, project_id: &str, reports: Vec<Report>, keep_intent: impl Fn(&str) -> bool) {
        let mut inner = self.write();
        inner.confirmed = reports
            .into_iter()
            .filter(|report| report.project_id == project_id)
            .map(|report| (report.id.clone(), report))
            .collect();
        let StoreInner {
            confirmed, intent, ..
        } = &mut *inner;
        intent.retain(|id, _| confirmed.contains_key(id) && keep_intent(id));

        if inner.current_project.as_deref() != Some(project_id) {
            inner.current_project = Some(project_id.to_string());
        }
        let current_missing = inner
            .current_report
            .as_ref()
            .is_some_and(|id| !inner.confirmed.contains_key(id));
        if current_missing {
            inner.current_report = None;
        }
    }

    pub fn upsert_confirmed(&self, report: Report) -> Report {
        let mut inner = self.write();
        let id = report.id.clone();
        inner.confirmed.insert(id.clone(), report.clone());
        inner.visible(&id).unwrap_or(report)
    }

    pub fn get(&self, report_id: &str) -> Option<Report> {
        self.read().visible(report_id)
    }

    pub fn confirmed(&self, report_id: &str) -> Option<Report> {
        self.read().confirmed.get(report_id).cloned()
    }

    pub fn contains(&self, report_id: &str) -> bool {
        self.read().confirmed.contains_key(report_id)
    }

    pub fn pending_intent(&self, report_id: &str) -> Option<ReportPatch> {
        self.read().intent.get(report_id).cloned()
    }

    /// Visible reports of a project: pinned first, then most recently
    /// opened, then by name.
    pub fn list(&self, project_id: &str, include_deleted: bool) -> Vec<Report> {
        let inner = self.read();
        let mut reports = inner
            .confirmed
            .values()
            .filter(|report| report.project_id == project_id)
            .filter_map(|report| inner.visible(&report.id))
            .filter(|report| include_deleted || report.deleted_at.is_none())
            .collect::<Vec<_>>();
        reports.sort_by(compare_for_listing);
        reports
    }

    /// Optimistic local edit. Returns the report as readers now see it.
    pub fn apply_local(&self, report_id: &str, patch: &ReportPatch) -> AppResult<Report> {
        let mut inner = self.write();
        if !inner.confirmed.contains_key(report_id) {
            return Err(AppError::NotFound(format!("report {report_id}")));
        }
        inner
            .intent
            .entry(report_id.to_string())
            .or_default()
            .merge(patch.clone());
        inner
            .visible(report_id)
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))
    }

    /// Reconciles a persisted patch. Fields the server echoed replace the
    /// confirmed value; fields it omitted keep what the client sent. Intent
    /// fields edited again since `sent` left stay pending.
    pub fn acknowledge(&self, report_id: &str, sent: &ReportPatch, echo: &ReportRecord) -> Option<Report> {
        let mut inner = self.write();
        let confirmed = inner.confirmed.get_mut(report_id)?;
        sent.apply_to(confirmed);
        let mut echoed = echoed_fields(echo);
        // The tab is local view state; only an edit that sent one settles it.
        if sent.active_tab.is_none() {
            echoed.active_tab = None;
        }
        echoed.apply_to(confirmed);
        if let Some(data_range) = &echo.data_range {
            confirmed.data_range = data_range.clone();
        }
        if let Some(auto_refresh) = echo.auto_refresh {
            confirmed.auto_refresh = auto_refresh;
        }
        if let Some(updated_at) = echo.updated_at {
            confirmed.updated_at = updated_at;
        }

        let drained = match inner.intent.get_mut(report_id) {
            Some(intent) => {
                intent.forget_acknowledged(sent);
                intent.is_empty()
            }
            None => false,
        };
        if drained {
            inner.intent.remove(report_id);
        }
        inner.visible(report_id)
    }

    /// Mutates server-owned fields of the confirmed layer in place.
    pub fn update_confirmed(&self, report_id: &str, update: impl FnOnce(&mut Report)) -> Option<Report> {
        let mut inner = self.write();
        update(inner.confirmed.get_mut(report_id)?);
        inner.visible(report_id)
    }

    /// Moves the view to `tab` without creating intent: the drilled-in tab
    /// is view state and never goes through the mutation queue. A queued tab
    /// edit that has not been sent yet is dropped in favor of this one.
    pub fn set_view_tab(&self, report_id: &str, tab: EntityTab) -> AppResult<Report> {
        let mut inner = self.write();
        let confirmed = inner
            .confirmed
            .get_mut(report_id)
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))?;
        confirmed.active_tab = tab;

        let drained = match inner.intent.get_mut(report_id) {
            Some(intent) => {
                intent.active_tab = None;
                intent.is_empty()
            }
            None => false,
        };
        if drained {
            inner.intent.remove(report_id);
        }
        inner
            .visible(report_id)
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))
    }

    pub fn remove(&self, report_id: &str) -> Option<Report> {
        let mut inner = self.write();
        inner.intent.remove(report_id);
        if inner.current_report.as_deref() == Some(report_id) {
            inner.current_report = None;
        }
        inner.confirmed.remove(report_id)
    }

    pub fn current_project(&self) -> Option<String> {
        self.read().current_project.clone()
    }

    pub fn current_report(&self) -> Option<String> {
        self.read().current_report.clone()
    }

    pub fn set_current_report(&self, report_id: Option<&str>) -> AppResult<()> {
        let mut inner = self.write();
        if let Some(id) = report_id {
            if !inner.confirmed.contains_key(id) {
                return Err(AppError::NotFound(format!("report {id}")));
            }
        }
        inner.current_report = report_id.map(str::to_string);
        Ok(())
    }

    pub fn report_ids(&self) -> Vec<String> {
        self.read().confirmed.keys().cloned().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        *inner = StoreInner::default();
    }
}

fn echoed_fields(echo: &ReportRecord) -> ReportPatch {
    ReportPatch {
        name: echo.name.clone(),
        selections: echo.selections.clone(),
        active_tab: echo.active_tab,
        selected_metrics: echo.selected_metrics.clone(),
        date_from: echo.date_from,
        date_to: echo.date_to,
        pinned: echo.pinned,
        tags: echo.tags.clone(),
    }
}

fn compare_for_listing(left: &Report, right: &Report) -> Ordering {
    right
        .pinned
        .cmp(&left.pinned)
        .then_with(|| right.last_opened_at.cmp(&left.last_opened_at))
        .then_with(|| left.name.to_lowercase().cmp(&right.name.to_lowercase()))
        .then_with(|| left.id.cmp(&right.id))
}
