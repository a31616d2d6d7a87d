//! Pure table view computation: filter, sort, summarize and compare a set of
//! per-entity rows. Nothing here touches the network or the caches.

mod filter;
mod pagination;
mod trend;

pub use filter::{
    text_matches, ColumnCondition, ColumnRef, ConditionOp, DateOp, NumericOp, ParentFilter, TextMatch,
};
pub use pagination::Pagination;
pub use trend::{percent_change, Trend};

use crate::metrics::{aggregate, row_value, MetricCatalog, MetricRow};
use crate::models::{EntityTab, MetricId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    pub tab: EntityTab,
    pub id: String,
    pub name: String,
}

impl ParentRef {
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

/// One entity of the active tab, base metrics summed over the display window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRow {
    pub key: String,
    pub group_key: String,
    pub tab: EntityTab,
    pub entity_id: String,
    pub name: String,
    pub status: Option<String>,
    pub created_on: Option<NaiveDate>,
    /// Ancestors, nearest first.
    pub parent_chain: Vec<ParentRef>,
    pub values: BTreeMap<MetricId, f64>,
}

impl ViewRow {
    pub fn new(tab: EntityTab, entity_id: &str, name: &str) -> Self {
        Self {
            key: row_key(tab, entity_id),
            group_key: entity_id.to_string(),
            tab,
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            status: None,
            created_on: None,
            parent_chain: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    /// Ancestor shown in the parent column: the requested level when the row
    /// has one, otherwise the nearest ancestor.
    pub fn parent_at(&self, level: Option<EntityTab>) -> Option<&ParentRef> {
        match level {
            Some(level) => self
                .parent_chain
                .iter()
                .find(|parent| parent.tab == level)
                .or_else(|| self.parent_chain.first()),
            None => self.parent_chain.first(),
        }
    }

    pub fn subtitle(&self, level: Option<EntityTab>) -> Option<String> {
        self.parent_at(level).map(ParentRef::label)
    }
}

impl MetricRow for ViewRow {
    fn row_key(&self) -> &str {
        &self.group_key
    }

    fn metric_value(&self, metric_id: &str) -> Option<f64> {
        self.values.get(metric_id).copied()
    }
}

pub fn row_key(tab: EntityTab, entity_id: &str) -> String {
    format!("{}:{}", tab.as_str(), entity_id)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    #[default]
    All,
    SelectionOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSort {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewRequest {
    pub column_conditions: Vec<ColumnCondition>,
    pub sort: Option<ColumnSort>,
    pub selected_row_keys: BTreeSet<String>,
    pub selected_group_keys: BTreeSet<String>,
    pub parent_filter: Option<ParentFilter>,
    pub parent_display_level: Option<EntityTab>,
    pub search_text: String,
    pub filter_mode: FilterMode,
    /// Concrete metric columns to summarize and trend.
    pub metrics: Vec<MetricId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResult {
    pub filtered_rows: Vec<ViewRow>,
    pub summary: BTreeMap<MetricId, f64>,
    pub trends: BTreeMap<MetricId, Trend>,
    /// Per-row trends keyed by row key, for rows present in the comparison
    /// period.
    pub row_trends: BTreeMap<String, BTreeMap<MetricId, Trend>>,
}

/// Runs the fixed pipeline: parent filter, column conditions, free-text
/// search, then the selection-only restriction, followed by the single
/// column sort. Input rows are never mutated.
pub fn compute_view(
    catalog: &MetricCatalog,
    rows: &[ViewRow],
    request: &ViewRequest,
    comparison_rows: Option<&[ViewRow]>,
) -> ViewResult {
    let level = request.parent_display_level;
    let mut filtered = rows
        .iter()
        .filter(|row| {
            request
                .parent_filter
                .as_ref()
                .map_or(true, |filter| filter.matches(row, level))
        })
        .filter(|row| {
            request
                .column_conditions
                .iter()
                .all(|condition| condition.matches(row, catalog, level))
        })
        .filter(|row| matches_search(row, &request.search_text, level))
        .filter(|row| match request.filter_mode {
            FilterMode::All => true,
            FilterMode::SelectionOnly => {
                request.selected_row_keys.contains(&row.key)
                    || request.selected_group_keys.contains(&row.group_key)
            }
        })
        .cloned()
        .collect::<Vec<_>>();

    if let Some(sort) = &request.sort {
        sort_rows(catalog, &mut filtered, sort, level);
    }

    let summary = summarize(catalog, &filtered, &request.metrics, &request.selected_group_keys);

    let mut trends = BTreeMap::new();
    let mut row_trends = BTreeMap::new();
    if let Some(previous_rows) = comparison_rows {
        // Both periods are summarized over the same rows: the ones that
        // survived the pipeline for the current period.
        let in_view = filtered.iter().map(|row| row.key.as_str()).collect::<BTreeSet<_>>();
        let previous_in_view = previous_rows
            .iter()
            .filter(|row| in_view.contains(row.key.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        let previous_summary = summarize(
            catalog,
            &previous_in_view,
            &request.metrics,
            &request.selected_group_keys,
        );
        for metric in &request.metrics {
            let current = summary.get(metric).copied().unwrap_or(0.0);
            let previous = previous_summary.get(metric).copied().unwrap_or(0.0);
            trends.insert(metric.clone(), Trend::between(current, previous));
        }

        let previous_by_key = previous_rows
            .iter()
            .map(|row| (row.key.as_str(), row))
            .collect::<BTreeMap<_, _>>();
        for row in &filtered {
            let Some(previous) = previous_by_key.get(row.key.as_str()) else {
                continue;
            };
            let per_metric = request
                .metrics
                .iter()
                .map(|metric| {
                    let trend = Trend::between(
                        row_value(catalog, metric, row),
                        row_value(catalog, metric, *previous),
                    );
                    (metric.clone(), trend)
                })
                .collect();
            row_trends.insert(row.key.clone(), per_metric);
        }
    }

    ViewResult {
        filtered_rows: filtered,
        summary,
        trends,
        row_trends,
    }
}

/// Summary row over the rows whose group key is selected.
pub fn summarize(
    catalog: &MetricCatalog,
    rows: &[ViewRow],
    metrics: &[MetricId],
    selected_group_keys: &BTreeSet<String>,
) -> BTreeMap<MetricId, f64> {
    metrics
        .iter()
        .map(|metric| {
            (
                metric.clone(),
                aggregate(catalog, metric, rows, Some(selected_group_keys)),
            )
        })
        .collect()
}

fn matches_search(row: &ViewRow, search_text: &str, level: Option<EntityTab>) -> bool {
    let needle = search_text.trim();
    if needle.is_empty() {
        return true;
    }
    text_matches(TextMatch::Contains, &row.name, needle)
        || text_matches(TextMatch::Contains, &row.entity_id, needle)
        || row
            .subtitle(level)
            .map(|subtitle| text_matches(TextMatch::Contains, &subtitle, needle))
            .unwrap_or(false)
}

fn sort_rows(catalog: &MetricCatalog, rows: &mut [ViewRow], sort: &ColumnSort, level: Option<EntityTab>) {
    let ordering = |left: &ViewRow, right: &ViewRow| -> Ordering {
        match &sort.column {
            ColumnRef::Metric(metric) => {
                row_value(catalog, metric, left).total_cmp(&row_value(catalog, metric, right))
            }
            ColumnRef::Name => compare_text(&left.name, &right.name),
            ColumnRef::Parent => compare_text(
                &left.subtitle(level).unwrap_or_default(),
                &right.subtitle(level).unwrap_or_default(),
            ),
            ColumnRef::Status => compare_text(
                left.status.as_deref().unwrap_or_default(),
                right.status.as_deref().unwrap_or_default(),
            ),
            ColumnRef::CreatedOn => left.created_on.cmp(&right.created_on),
        }
    };

    match sort.direction {
        SortDirection::Asc => rows.sort_by(|left, right| ordering(left, right)),
        SortDirection::Desc => rows.sort_by(|left, right| ordering(right, left)),
    }
}

fn compare_text(left: &str, right: &str) -> Ordering {
    left.to_lowercase().cmp(&right.to_lowercase())
}
