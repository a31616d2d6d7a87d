use crate::api::MetricsApi;
use crate::errors::AppResult;
use crate::metrics::{MetricCatalog, MetricKind};
use crate::models::{
    CoreEvent, DataRangeAnchor, EntityMeta, EntityTab, MetricId, MetricRecord, MetricsPayload, MetricsQuery, Report,
};
use crate::view::{ParentRef, ViewRow};
use chrono::{DateTime, Duration as DateDuration, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, OnceCell};

const MAX_PARENT_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub report_id: String,
    pub tab: EntityTab,
    pub anchor: Option<DataRangeAnchor>,
}

impl CacheKey {
    pub fn for_report(report: &Report, tab: EntityTab) -> Self {
        Self {
            report_id: report.id.clone(),
            tab,
            anchor: report.data_range.anchor(),
        }
    }
}

/// One (date, entity) row with duplicate records summed and raw derived
/// values stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub entity_id: String,
    pub metrics: BTreeMap<MetricId, f64>,
}

/// Precomputed rows for one cache key. Immutable once built; consumers get
/// shared references and never a mutable handle.
#[derive(Debug)]
pub struct MaterializedReport {
    key: CacheKey,
    daily: Vec<DailyRow>,
    entities: HashMap<String, EntityMeta>,
    tab_entities: Vec<String>,
    parent_chains: HashMap<String, Vec<ParentRef>>,
    observed_metrics: BTreeSet<MetricId>,
    occurrence_counts: BTreeMap<MetricId, usize>,
    window: (NaiveDate, NaiveDate),
    fetched_at: DateTime<Utc>,
}

impl MaterializedReport {
    pub fn build(
        catalog: &MetricCatalog,
        key: CacheKey,
        window: (NaiveDate, NaiveDate),
        payload: MetricsPayload,
    ) -> Self {
        let entities = payload
            .entities
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect::<HashMap<_, _>>();

        let mut merged: BTreeMap<(NaiveDate, String), BTreeMap<MetricId, f64>> = BTreeMap::new();
        for MetricRecord {
            date,
            entity_id,
            metrics,
        } in payload.records
        {
            if entities.get(&entity_id).is_some_and(|entity| entity.tab != key.tab) {
                continue;
            }
            let slot = merged.entry((date, entity_id)).or_default();
            for (metric_id, value) in metrics {
                if !value.is_finite() {
                    continue;
                }
                match catalog.kind(&metric_id) {
                    MetricKind::Derived { .. } => {}
                    MetricKind::Base { summable: true } => *slot.entry(metric_id).or_insert(0.0) += value,
                    MetricKind::Base { summable: false } => {
                        let current = slot.entry(metric_id).or_insert(value);
                        *current = current.max(value);
                    }
                }
            }
        }

        let mut observed_metrics = BTreeSet::new();
        let mut occurrence_counts = BTreeMap::new();
        let mut record_entities = BTreeSet::new();
        let daily = merged
            .into_iter()
            .map(|((date, entity_id), metrics)| {
                for (metric_id, value) in &metrics {
                    observed_metrics.insert(metric_id.clone());
                    if *value != 0.0 {
                        *occurrence_counts.entry(metric_id.clone()).or_insert(0) += 1;
                    }
                }
                record_entities.insert(entity_id.clone());
                DailyRow {
                    date,
                    entity_id,
                    metrics,
                }
            })
            .collect::<Vec<_>>();

        let mut tab_entities = entities
            .values()
            .filter(|entity| entity.tab == key.tab)
            .map(|entity| entity.id.clone())
            .collect::<BTreeSet<_>>();
        tab_entities.extend(
            record_entities
                .into_iter()
                .filter(|id| entities.get(id).map_or(true, |entity| entity.tab == key.tab)),
        );
        let tab_entities = tab_entities.into_iter().collect::<Vec<_>>();

        let parent_chains = tab_entities
            .iter()
            .map(|id| (id.clone(), parent_chain(&entities, key.tab, id)))
            .collect();

        Self {
            key,
            daily,
            entities,
            tab_entities,
            parent_chains,
            observed_metrics,
            occurrence_counts,
            window,
            fetched_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn daily_rows(&self) -> &[DailyRow] {
        &self.daily
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityMeta> {
        self.entities.get(entity_id)
    }

    pub fn parent_chain(&self, entity_id: &str) -> &[ParentRef] {
        self.parent_chains
            .get(entity_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn observed_metrics(&self) -> &BTreeSet<MetricId> {
        &self.observed_metrics
    }

    pub fn occurrence_counts(&self) -> &BTreeMap<MetricId, usize> {
        &self.occurrence_counts
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Whether the fetched data spans every day of `from..=to`.
    pub fn covers(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.window.0 <= from && to <= self.window.1
    }

    /// Per-entity rows for the display window `from..=to`. Base metrics are
    /// rolled up day by day; derived metrics are left to row evaluation.
    pub fn window_rows(&self, catalog: &MetricCatalog, from: NaiveDate, to: NaiveDate) -> Vec<ViewRow> {
        let mut totals: HashMap<&str, BTreeMap<MetricId, f64>> = HashMap::new();
        for row in self.daily.iter().filter(|row| row.date >= from && row.date <= to) {
            let values = totals.entry(row.entity_id.as_str()).or_default();
            for (metric_id, value) in &row.metrics {
                match catalog.kind(metric_id) {
                    MetricKind::Base { summable: false } => {
                        let current = values.entry(metric_id.clone()).or_insert(*value);
                        *current = current.max(*value);
                    }
                    _ => *values.entry(metric_id.clone()).or_insert(0.0) += value,
                }
            }
        }

        let mut rows = self
            .tab_entities
            .iter()
            .map(|id| {
                let meta = self.entities.get(id);
                let mut row = ViewRow::new(
                    self.key.tab,
                    id,
                    meta.map(|entity| entity.name.as_str()).unwrap_or(id.as_str()),
                );
                row.status = meta.and_then(|entity| entity.status.clone());
                row.created_on = meta.and_then(|entity| entity.created_on);
                row.parent_chain = self.parent_chain(id).to_vec();
                row.values = totals.remove(id.as_str()).unwrap_or_default();
                row
            })
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| {
            left.name
                .to_lowercase()
                .cmp(&right.name.to_lowercase())
                .then_with(|| left.entity_id.cmp(&right.entity_id))
        });
        rows
    }
}

fn parent_chain(entities: &HashMap<String, EntityMeta>, tab: EntityTab, entity_id: &str) -> Vec<ParentRef> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::from([entity_id.to_string()]);
    let mut next = entities.get(entity_id).and_then(|entity| entity.parent_id.clone());
    let mut level = tab.ancestors().iter();

    while let Some(parent_id) = next.take() {
        if chain.len() >= MAX_PARENT_DEPTH || !seen.insert(parent_id.clone()) {
            break;
        }
        let fallback_tab = level.next().copied();
        match entities.get(&parent_id) {
            Some(parent) => {
                chain.push(ParentRef {
                    tab: parent.tab,
                    id: parent.id.clone(),
                    name: parent.name.clone(),
                });
                next = parent.parent_id.clone();
            }
            None => {
                if let Some(tab) = fallback_tab {
                    chain.push(ParentRef {
                        tab,
                        name: parent_id.clone(),
                        id: parent_id,
                    });
                }
            }
        }
    }
    chain
}

/// Prior period of equal length ending the day before `from`.
pub fn comparison_window(from: NaiveDate, to: NaiveDate) -> (NaiveDate, NaiveDate) {
    let days = (to - from).num_days().max(0);
    let previous_to = from - DateDuration::days(1);
    (previous_to - DateDuration::days(days), previous_to)
}

type CacheSlot = Arc<OnceCell<Arc<MaterializedReport>>>;

/// Materialized metric rows keyed by (report, tab, data-range anchor).
///
/// The first `load` of a key fetches and precomputes; concurrent loads of
/// the same key share that single fetch. Afterwards `get` answers without
/// any network call until the entry is invalidated.
#[derive(Clone)]
pub struct ReportCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    api: Arc<dyn MetricsApi>,
    catalog: Arc<MetricCatalog>,
    events: broadcast::Sender<CoreEvent>,
    entries: Mutex<HashMap<CacheKey, CacheSlot>>,
}

impl ReportCache {
    pub fn new(api: Arc<dyn MetricsApi>, catalog: Arc<MetricCatalog>, events: broadcast::Sender<CoreEvent>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                api,
                catalog,
                events,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheSlot>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<MaterializedReport>> {
        self.entries().get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the materialized rows for the report's `tab`, fetching the
    /// report's full anchor window on first access.
    pub async fn load(&self, report: &Report, tab: EntityTab) -> AppResult<Arc<MaterializedReport>> {
        let key = CacheKey::for_report(report, tab);
        let slot = self.entries().entry(key.clone()).or_default().clone();
        let materialized = slot
            .get_or_try_init(|| self.materialize(report, key.clone()))
            .await?;
        Ok(materialized.clone())
    }

    async fn materialize(&self, report: &Report, key: CacheKey) -> AppResult<Arc<MaterializedReport>> {
        let (date_from, date_to) = key
            .anchor
            .map(|anchor| (anchor.start, anchor.end))
            .unwrap_or((report.date_from, report.date_to));
        let query = MetricsQuery {
            project_id: report.project_id.clone(),
            report_id: report.id.clone(),
            tab: key.tab,
            entity_ids: report.selection_for(key.tab),
            date_from,
            date_to,
        };
        let payload = self.inner.api.fetch_metrics(&query).await?;
        let record_count = payload.records.len();
        let materialized = MaterializedReport::build(&self.inner.catalog, key, (date_from, date_to), payload);
        tracing::debug!(
            report_id = %report.id,
            tab = materialized.key.tab.as_str(),
            records = record_count,
            "report cache filled"
        );
        let _ = self.inner.events.send(CoreEvent::CacheFilled {
            report_id: report.id.clone(),
            tab: materialized.key.tab,
        });
        Ok(Arc::new(materialized))
    }

    /// Drops every entry of the report. The next `load` fetches again.
    pub fn refresh_cache(&self, report_id: &str) -> usize {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|key, _| key.report_id != report_id);
            before - entries.len()
        };
        let _ = self.inner.events.send(CoreEvent::CacheInvalidated {
            report_id: report_id.to_string(),
        });
        removed
    }

    /// Invalidation trigger for an observed sync completion.
    pub fn on_sync_completed(&self, report_id: &str) {
        let removed = self.refresh_cache(report_id);
        tracing::debug!(report_id, removed, "report cache invalidated after sync completion");
    }

    /// Drops entries built for an anchor the report no longer has.
    pub fn invalidate_stale_anchors(&self, report: &Report) -> usize {
        let anchor = report.data_range.anchor();
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|key, _| key.report_id != report.id || key.anchor == anchor);
            before - entries.len()
        };
        if removed > 0 {
            let _ = self.inner.events.send(CoreEvent::CacheInvalidated {
                report_id: report.id.clone(),
            });
        }
        removed
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
