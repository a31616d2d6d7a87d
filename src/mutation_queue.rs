use crate::api::ReportApi;
use crate::errors::AppResult;
use crate::models::{CoreEvent, Report, ReportPatch};
use crate::store::ReportStateStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Per-report debounce and coalescing of report edits.
///
/// Each report owns one pending-patch slot, one debounce timer and one
/// in-flight flag. At most one persistence call per report is outstanding;
/// edits made while it is outstanding are merged and sent right after it
/// resolves.
#[derive(Clone)]
pub struct MutationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    api: Arc<dyn ReportApi>,
    store: ReportStateStore,
    events: broadcast::Sender<CoreEvent>,
    debounce: Duration,
    slots: Mutex<HashMap<String, MutationSlot>>,
}

#[derive(Default)]
struct MutationSlot {
    pending: Option<ReportPatch>,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    in_flight: bool,
}

impl MutationSlot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
    }

    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.timer.is_none() && !self.in_flight
    }
}

impl MutationQueue {
    pub fn new(
        api: Arc<dyn ReportApi>,
        store: ReportStateStore,
        events: broadcast::Sender<CoreEvent>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                api,
                store,
                events,
                debounce,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, MutationSlot>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `patch` to the store right away and (re)arms the debounce
    /// timer for the report. Must be called from within a tokio runtime.
    pub fn queue_update(&self, report_id: &str, patch: ReportPatch) -> AppResult<Report> {
        let visible = self.inner.store.apply_local(report_id, &patch)?;
        if patch.is_empty() {
            return Ok(visible);
        }

        let mut slots = self.slots();
        let slot = slots.entry(report_id.to_string()).or_default();
        slot.pending.get_or_insert_with(ReportPatch::default).merge(patch);
        slot.cancel_timer();

        let generation = slot.timer_generation;
        let queue = self.clone();
        let id = report_id.to_string();
        let debounce = self.inner.debounce;
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if !queue.claim_timer(&id, generation) {
                return;
            }
            // Failures are already logged and broadcast by drain.
            let _ = queue.drain(&id).await;
        }));
        tracing::debug!(report_id, "report edit queued");
        Ok(visible)
    }

    /// Sends whatever is pending for the report now, skipping the rest of
    /// the debounce window. Resolves once the report has nothing left to
    /// send, or immediately when another call is already delivering.
    pub async fn flush_now(&self, report_id: &str) -> AppResult<()> {
        if let Some(slot) = self.slots().get_mut(report_id) {
            slot.cancel_timer();
        }
        self.drain(report_id).await
    }

    /// Flushes every report with queued edits. Returns the first failure.
    pub async fn flush_all(&self) -> AppResult<()> {
        let ids = self.slots().keys().cloned().collect::<Vec<_>>();
        let mut first_error = None;
        for id in ids {
            if let Err(err) = self.flush_now(&id).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drops the report's debounce timer. Edits still pending are delivered
    /// in the background rather than lost.
    pub fn teardown(&self, report_id: &str) {
        let has_pending = {
            let mut slots = self.slots();
            match slots.get_mut(report_id) {
                Some(slot) => {
                    slot.cancel_timer();
                    slot.pending.is_some()
                }
                None => false,
            }
        };
        if has_pending {
            let queue = self.clone();
            let id = report_id.to_string();
            tokio::spawn(async move {
                let _ = queue.drain(&id).await;
            });
        }
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.flush_all().await
    }

    pub fn has_pending(&self, report_id: &str) -> bool {
        self.slots()
            .get(report_id)
            .is_some_and(|slot| slot.pending.is_some())
    }

    pub fn is_in_flight(&self, report_id: &str) -> bool {
        self.slots().get(report_id).is_some_and(|slot| slot.in_flight)
    }

    pub fn has_timer(&self, report_id: &str) -> bool {
        self.slots()
            .get(report_id)
            .is_some_and(|slot| slot.timer.is_some())
    }

    fn claim_timer(&self, report_id: &str, generation: u64) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(report_id) {
            Some(slot) if slot.timer_generation == generation => {
                slot.timer = None;
                true
            }
            _ => false,
        }
    }

    /// Takes the pending patch and marks the slot in flight, unless a call
    /// is already outstanding; that call picks the patch up when it returns.
    fn take_next(&self, report_id: &str) -> Option<ReportPatch> {
        let mut slots = self.slots();
        let slot = slots.get_mut(report_id)?;
        if slot.in_flight {
            return None;
        }
        let patch = slot.pending.take().filter(|patch| !patch.is_empty());
        match patch {
            Some(patch) => {
                slot.cancel_timer();
                slot.in_flight = true;
                Some(patch)
            }
            None => {
                if slot.is_idle() {
                    slots.remove(report_id);
                }
                None
            }
        }
    }

    fn finish_flight(&self, report_id: &str) {
        if let Some(slot) = self.slots().get_mut(report_id) {
            slot.in_flight = false;
        }
    }

    async fn drain(&self, report_id: &str) -> AppResult<()> {
        let mut first_error = None;
        while let Some(patch) = self.take_next(report_id) {
            let result = self.inner.api.update_report(report_id, &patch).await;
            self.finish_flight(report_id);

            match result {
                Ok(echo) => {
                    self.inner.store.acknowledge(report_id, &patch, &echo);
                    tracing::debug!(report_id, "report edit persisted");
                    let _ = self.inner.events.send(CoreEvent::MutationPersisted {
                        report_id: report_id.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(report_id, error = %err, "report edit failed to persist");
                    let _ = self.inner.events.send(CoreEvent::MutationFailed {
                        report_id: report_id.to_string(),
                        message: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
