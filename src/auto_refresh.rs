use crate::api::ReportApi;
use crate::errors::{AppError, AppResult};
use crate::models::{AutoRefreshBudget, CoreEvent, Report};
use crate::store::ReportStateStore;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Client-side gate in front of the server-owned auto-refresh budget. The
/// counters are only ever replaced by server responses.
#[derive(Clone)]
pub struct AutoRefreshLimiter {
    api: Arc<dyn ReportApi>,
    store: ReportStateStore,
    events: broadcast::Sender<CoreEvent>,
    budget: Arc<RwLock<Option<AutoRefreshBudget>>>,
}

impl AutoRefreshLimiter {
    pub fn new(api: Arc<dyn ReportApi>, store: ReportStateStore, events: broadcast::Sender<CoreEvent>) -> Self {
        Self {
            api,
            store,
            events,
            budget: Arc::new(RwLock::new(None)),
        }
    }

    pub fn budget(&self) -> Option<AutoRefreshBudget> {
        *self.budget.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_budget(&self, budget: Option<AutoRefreshBudget>) {
        *self.budget.write().unwrap_or_else(PoisonError::into_inner) = budget;
    }

    pub async fn refresh_budget(&self, project_id: &str) -> AppResult<AutoRefreshBudget> {
        let budget = self.api.auto_refresh_budget(project_id).await?;
        self.set_budget(Some(budget));
        Ok(budget)
    }

    /// Enabling with no remaining budget is refused before any network call.
    /// An unknown budget is left to the server to judge.
    pub async fn toggle_auto_refresh(&self, report_id: &str, enable: bool) -> AppResult<Report> {
        if !self.store.contains(report_id) {
            return Err(AppError::NotFound(format!("report {report_id}")));
        }
        if enable {
            if let Some(budget) = self.budget().filter(|budget| budget.remaining <= 0) {
                tracing::info!(report_id, limit = budget.limit, "auto-refresh limit reached");
                return Err(AppError::LimitReached {
                    limit: budget.limit,
                    current: budget.current,
                });
            }
        }

        let toggled = self.api.toggle_auto_refresh(report_id, enable).await?;
        self.set_budget(Some(toggled.budget));
        let report = self
            .store
            .update_confirmed(report_id, |report| report.auto_refresh = toggled.auto_refresh)
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))?;
        let _ = self.events.send(CoreEvent::AutoRefreshChanged {
            report_id: report_id.to_string(),
            enabled: toggled.auto_refresh,
            budget: toggled.budget,
        });
        Ok(report)
    }
}
