use crate::api::ReportApi;
use crate::errors::{AppError, AppResult};
use crate::models::{normalize_sync_progress, CoreEvent, Report, ReportStatus, SyncStatusSnapshot};
use crate::store::ReportStateStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

type ReadyObserver = Arc<dyn Fn(&str) + Send + Sync>;

const DEFAULT_SYNC_ERROR: &str = "Sync failed";

/// Who caused a status change. Only backend-observed completions count as
/// a finished sync; a client-side cancel landing on `ready` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Backend,
    Client,
}

struct Poller {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Drives each report through its sync lifecycle and owns the status poll
/// loops. A poll loop runs for a report exactly while its status is
/// `syncing` or `extending`.
#[derive(Clone)]
pub struct SyncStatusTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    api: Arc<dyn ReportApi>,
    store: ReportStateStore,
    events: broadcast::Sender<CoreEvent>,
    poll_interval: Duration,
    pollers: Mutex<HashMap<String, Poller>>,
    next_generation: AtomicU64,
    ready_observer: RwLock<Option<ReadyObserver>>,
}

pub fn can_transition(from: ReportStatus, to: ReportStatus) -> bool {
    use ReportStatus::*;
    match (from, to) {
        (Deleted, Ready) => true,
        (Deleted, _) => false,
        (_, Deleted) => true,
        (Pending, Syncing | Ready | Error) => true,
        (Syncing, Ready | Error | Pending) => true,
        (Ready, Extending | Syncing) => true,
        (Extending, Ready | Error) => true,
        (Error, Syncing | Ready) => true,
        _ => false,
    }
}

impl SyncStatusTracker {
    pub fn new(
        api: Arc<dyn ReportApi>,
        store: ReportStateStore,
        events: broadcast::Sender<CoreEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                api,
                store,
                events,
                poll_interval,
                pollers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                ready_observer: RwLock::new(None),
            }),
        }
    }

    /// Called with the report id whenever a sync or extension is observed
    /// completing.
    pub fn set_ready_observer(&self, observer: ReadyObserver) {
        let mut writer = self
            .inner
            .ready_observer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *writer = Some(observer);
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<String, Poller>> {
        self.inner.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, report_id: &str) -> AppResult<Report> {
        self.inner
            .store
            .get(report_id)
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))
    }

    /// Backend-observed status change.
    pub fn transition(&self, report_id: &str, to: ReportStatus) -> AppResult<Report> {
        let report = self.commit(report_id, to, Origin::Backend, |_| {})?;
        self.ensure_polling(report_id);
        Ok(report)
    }

    /// pending -> syncing once the backend accepted the job.
    pub fn mark_sync_accepted(&self, report_id: &str) -> AppResult<Report> {
        self.transition(report_id, ReportStatus::Syncing)
    }

    /// Folds a status snapshot into the report and starts or stops polling
    /// to match the resulting status.
    pub fn apply_snapshot(&self, report_id: &str, snapshot: SyncStatusSnapshot) -> AppResult<Report> {
        let report = self.reduce_snapshot(report_id, snapshot)?;
        self.ensure_polling(report_id);
        Ok(report)
    }

    /// One-shot status fetch outside the poll loop.
    pub async fn refresh_status(&self, report_id: &str) -> AppResult<Report> {
        let snapshot = self.inner.api.get_sync_status(report_id).await?;
        self.apply_snapshot(report_id, snapshot)
    }

    fn reduce_snapshot(&self, report_id: &str, snapshot: SyncStatusSnapshot) -> AppResult<Report> {
        let current = self.report(report_id)?;
        if current.status == ReportStatus::Deleted {
            return Ok(current);
        }
        let to = snapshot.status;
        if to != current.status && !can_transition(current.status, to) {
            tracing::warn!(
                report_id,
                from = current.status.as_str(),
                to = to.as_str(),
                "ignoring sync snapshot with unreachable status"
            );
            return Ok(current);
        }

        self.commit(report_id, to, Origin::Backend, move |report| {
            if let Some(progress) = snapshot.progress {
                report.sync_progress = normalize_sync_progress(progress);
            }
            match to {
                ReportStatus::Ready => {
                    if let Some(data_range) = snapshot.data_range {
                        report.data_range = data_range;
                    }
                    report.sync_error = None;
                    report.sync_progress = 100.0;
                }
                ReportStatus::Error => {
                    report.sync_error = Some(
                        snapshot
                            .error
                            .filter(|message| !message.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_SYNC_ERROR.to_string()),
                    );
                    report.sync_progress = 0.0;
                }
                _ => {
                    if let Some(data_range) = snapshot.data_range {
                        report.data_range = data_range;
                    }
                    report.sync_error = None;
                }
            }
        })
    }

    /// Validates and applies one status change in the store, then announces
    /// it. Same-status commits only run `update`.
    fn commit(
        &self,
        report_id: &str,
        to: ReportStatus,
        origin: Origin,
        update: impl FnOnce(&mut Report),
    ) -> AppResult<Report> {
        let from = self.report(report_id)?.status;
        if from != to && !can_transition(from, to) {
            return Err(AppError::InvalidTransition(format!(
                "report {report_id} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            )));
        }

        let report = self
            .inner
            .store
            .update_confirmed(report_id, |report| {
                report.status = to;
                update(report);
            })
            .ok_or_else(|| AppError::NotFound(format!("report {report_id}")))?;
        if from == to {
            return Ok(report);
        }

        tracing::info!(report_id, from = from.as_str(), to = to.as_str(), "report status changed");
        let _ = self.inner.events.send(CoreEvent::StatusChanged {
            report_id: report_id.to_string(),
            from,
            to,
        });

        if origin == Origin::Backend && from.is_active() && to == ReportStatus::Ready {
            let observer = self
                .inner
                .ready_observer
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(observer) = observer {
                observer(report_id);
            }
            let _ = self.inner.events.send(CoreEvent::SyncCompleted {
                report_id: report_id.to_string(),
            });
        }
        Ok(report)
    }

    /// Starts a poll loop when the report is active and none runs yet, and
    /// stops the running one when it is not.
    pub fn ensure_polling(&self, report_id: &str) {
        let active = self
            .inner
            .store
            .get(report_id)
            .is_some_and(|report| report.status.is_active());
        if !active {
            self.stop_polling(report_id);
            return;
        }

        let mut pollers = self.pollers();
        if pollers.contains_key(report_id) {
            return;
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let tracker = self.clone();
        let id = report_id.to_string();
        let handle = tokio::spawn(async move {
            tracker.poll_loop(id, generation).await;
        });
        pollers.insert(report_id.to_string(), Poller { generation, handle });
        tracing::debug!(report_id, "status polling started");
    }

    pub fn is_polling(&self, report_id: &str) -> bool {
        self.pollers().contains_key(report_id)
    }

    pub fn stop_polling(&self, report_id: &str) {
        if let Some(poller) = self.pollers().remove(report_id) {
            poller.handle.abort();
            tracing::debug!(report_id, "status polling stopped");
        }
    }

    /// Clears every timer owned by the report.
    pub fn teardown(&self, report_id: &str) {
        self.stop_polling(report_id);
    }

    pub fn teardown_all(&self) {
        let pollers = std::mem::take(&mut *self.pollers());
        for (_, poller) in pollers {
            poller.handle.abort();
        }
    }

    /// Decides under the pollers lock whether the loop with `generation`
    /// keeps running, dropping its registration when it does not.
    fn keep_polling(&self, report_id: &str, generation: u64) -> bool {
        let mut pollers = self.pollers();
        if pollers.get(report_id).map(|poller| poller.generation) != Some(generation) {
            return false;
        }
        let active = self
            .inner
            .store
            .get(report_id)
            .is_some_and(|report| report.status.is_active());
        if !active {
            pollers.remove(report_id);
            tracing::debug!(report_id, "status polling finished");
        }
        active
    }

    async fn poll_loop(self, report_id: String, generation: u64) {
        let period = self.inner.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.keep_polling(&report_id, generation) {
                return;
            }
            match self.inner.api.get_sync_status(&report_id).await {
                Ok(snapshot) => {
                    if let Err(err) = self.reduce_snapshot(&report_id, snapshot) {
                        tracing::warn!(report_id = %report_id, error = %err, "failed to apply sync snapshot");
                    }
                }
                Err(err) => {
                    tracing::warn!(report_id = %report_id, error = %err, "sync status poll failed");
                }
            }
            if !self.keep_polling(&report_id, generation) {
                return;
            }
        }
    }

    /// ready -> extending -> ready | error. The loaded range is only replaced
    /// by a successful extension.
    pub async fn extend_range(&self, report_id: &str, target_days: u32) -> AppResult<Report> {
        let report = self.report(report_id)?;
        if report.status != ReportStatus::Ready {
            return Err(AppError::InvalidTransition(format!(
                "report {report_id} can only extend its range while ready (currently {})",
                report.status.as_str()
            )));
        }
        if target_days <= report.data_range.loaded_days {
            return Err(AppError::Validation(format!(
                "target of {target_days} days does not exceed the {} days already loaded",
                report.data_range.loaded_days
            )));
        }

        self.commit(report_id, ReportStatus::Extending, Origin::Client, |report| {
            report.data_range.requested_days = target_days;
            report.sync_progress = 0.0;
            report.sync_error = None;
        })?;
        self.ensure_polling(report_id);

        match self.inner.api.extend_range(report_id, target_days).await {
            Ok(snapshot) => {
                let report = self.reduce_snapshot(report_id, snapshot)?;
                self.ensure_polling(report_id);
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(report_id, target_days, error = %err, "range extension failed");
                let message = err.to_string();
                let failed = self.commit(report_id, ReportStatus::Error, Origin::Backend, |report| {
                    report.sync_error = Some(message);
                    report.sync_progress = 0.0;
                    report.data_range.requested_days = report.data_range.loaded_days;
                });
                if let Err(commit_err) = failed {
                    tracing::debug!(report_id, error = %commit_err, "report left extending state before failure landed");
                }
                self.ensure_polling(report_id);
                Err(err)
            }
        }
    }

    /// Stops waiting on the backend job. Does not guarantee the job halts.
    pub async fn cancel_sync(&self, report_id: &str, reason: &str) -> AppResult<Report> {
        let report = self.report(report_id)?;
        if !report.status.is_active() {
            self.stop_polling(report_id);
            return Ok(report);
        }
        self.stop_polling(report_id);

        if let Err(err) = self.inner.api.cancel_sync(report_id, reason).await {
            tracing::warn!(report_id, error = %err, "backend did not accept sync cancellation");
        }

        let current = self.report(report_id)?;
        let target = match current.status {
            ReportStatus::Extending => ReportStatus::Ready,
            ReportStatus::Syncing if current.data_range.loaded_days > 0 => ReportStatus::Ready,
            ReportStatus::Syncing => ReportStatus::Pending,
            _ => current.status,
        };
        let was_extending = current.status == ReportStatus::Extending;
        let report = self.commit(report_id, target, Origin::Client, |report| {
            report.sync_progress = 0.0;
            if was_extending {
                report.data_range.requested_days = report.data_range.loaded_days;
            }
        })?;
        self.ensure_polling(report_id);
        Ok(report)
    }

    /// Soft delete: the report stays restorable.
    pub async fn delete_report(&self, report_id: &str) -> AppResult<Report> {
        self.report(report_id)?;
        self.inner.api.delete_report(report_id).await?;
        self.stop_polling(report_id);
        self.commit(report_id, ReportStatus::Deleted, Origin::Client, |report| {
            report.deleted_at = Some(Utc::now());
            report.sync_progress = 0.0;
        })
    }

    /// Only a soft-deleted report can be restored; it comes back `ready`.
    pub async fn restore_report(&self, report_id: &str) -> AppResult<Report> {
        let report = self.report(report_id)?;
        if report.status != ReportStatus::Deleted {
            return Err(AppError::InvalidTransition(format!(
                "report {report_id} is not deleted (currently {})",
                report.status.as_str()
            )));
        }
        let restored = self.inner.api.restore_report(report_id).await?;
        self.commit(report_id, ReportStatus::Ready, Origin::Client, move |report| {
            report.deleted_at = None;
            report.data_range = restored.data_range;
            report.sync_error = None;
            report.updated_at = restored.updated_at;
        })
    }
}
