use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type MetricId = String;
pub type Selections = BTreeMap<EntityTab, BTreeSet<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityTab {
    Accounts,
    Campaigns,
    Adsets,
    Ads,
    Creatives,
}

impl EntityTab {
    pub const ALL: [EntityTab; 5] = [
        Self::Accounts,
        Self::Campaigns,
        Self::Adsets,
        Self::Ads,
        Self::Creatives,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Campaigns => "campaigns",
            Self::Adsets => "adsets",
            Self::Ads => "ads",
            Self::Creatives => "creatives",
        }
    }

    /// Ancestor levels, nearest first.
    pub fn ancestors(self) -> &'static [EntityTab] {
        match self {
            Self::Accounts => &[],
            Self::Campaigns => &[Self::Accounts],
            Self::Adsets => &[Self::Campaigns, Self::Accounts],
            Self::Ads => &[Self::Adsets, Self::Campaigns, Self::Accounts],
            Self::Creatives => &[Self::Ads, Self::Adsets, Self::Campaigns, Self::Accounts],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStatus {
    Pending,
    Syncing,
    Ready,
    Extending,
    Error,
    Deleted,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Ready => "ready",
            Self::Extending => "extending",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }

    /// Polling may only run while a report is in one of these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Syncing | Self::Extending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRangeAnchor {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataRange {
    pub loaded_days: u32,
    pub requested_days: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DataRange {
    pub fn anchor(&self) -> Option<DataRangeAnchor> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start <= end => Some(DataRangeAnchor { start, end }),
            _ => None,
        }
    }

    pub fn covers(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.anchor()
            .map(|anchor| anchor.start <= from && to <= anchor.end)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub selections: Selections,
    #[serde(default = "default_tab")]
    pub active_tab: EntityTab,
    #[serde(default)]
    pub selected_metrics: Vec<MetricId>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    #[serde(default)]
    pub data_range: DataRange,
    pub status: ReportStatus,
    #[serde(default)]
    pub sync_progress: f64,
    #[serde(default)]
    pub sync_error: Option<String>,
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_tab() -> EntityTab {
    EntityTab::Campaigns
}

impl Report {
    pub fn selection_for(&self, tab: EntityTab) -> Vec<String> {
        self.selections
            .get(&tab)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Accepts either a 0..=100 percentage or a value pre-scaled by 100.
pub fn normalize_sync_progress(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    let scaled = if raw > 100.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 100.0)
}

/// Partial edit of the user-editable report fields. Every field overwrites
/// its counterpart; `selections` overwrites per tab.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selections: Option<Selections>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_tab: Option<EntityTab>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_metrics: Option<Vec<MetricId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ReportPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn merge(&mut self, newer: ReportPatch) {
        if newer.name.is_some() {
            self.name = newer.name;
        }
        if let Some(selections) = newer.selections {
            let target = self.selections.get_or_insert_with(Selections::new);
            for (tab, ids) in selections {
                target.insert(tab, ids);
            }
        }
        if newer.active_tab.is_some() {
            self.active_tab = newer.active_tab;
        }
        if newer.selected_metrics.is_some() {
            self.selected_metrics = newer.selected_metrics;
        }
        if newer.date_from.is_some() {
            self.date_from = newer.date_from;
        }
        if newer.date_to.is_some() {
            self.date_to = newer.date_to;
        }
        if newer.pinned.is_some() {
            self.pinned = newer.pinned;
        }
        if newer.tags.is_some() {
            self.tags = newer.tags;
        }
    }

    pub fn apply_to(&self, report: &mut Report) {
        if let Some(name) = &self.name {
            report.name = name.clone();
        }
        if let Some(selections) = &self.selections {
            for (tab, ids) in selections {
                report.selections.insert(*tab, ids.clone());
            }
        }
        if let Some(tab) = self.active_tab {
            report.active_tab = tab;
        }
        if let Some(metrics) = &self.selected_metrics {
            report.selected_metrics = metrics.clone();
        }
        if let Some(date_from) = self.date_from {
            report.date_from = date_from;
        }
        if let Some(date_to) = self.date_to {
            report.date_to = date_to;
        }
        if let Some(pinned) = self.pinned {
            report.pinned = pinned;
        }
        if let Some(tags) = &self.tags {
            report.tags = tags.clone();
        }
    }

    /// Drops every field whose value is still exactly what `sent` carried.
    /// Fields edited again after `sent` left keep their newer value.
    pub fn forget_acknowledged(&mut self, sent: &ReportPatch) {
        fn clear_if_same<T: PartialEq>(slot: &mut Option<T>, sent: &Option<T>) {
            if sent.is_some() && slot.as_ref() == sent.as_ref() {
                *slot = None;
            }
        }

        clear_if_same(&mut self.name, &sent.name);
        clear_if_same(&mut self.active_tab, &sent.active_tab);
        clear_if_same(&mut self.selected_metrics, &sent.selected_metrics);
        clear_if_same(&mut self.date_from, &sent.date_from);
        clear_if_same(&mut self.date_to, &sent.date_to);
        clear_if_same(&mut self.pinned, &sent.pinned);
        clear_if_same(&mut self.tags, &sent.tags);

        if let (Some(current), Some(sent_selections)) = (self.selections.as_mut(), sent.selections.as_ref()) {
            for (tab, ids) in sent_selections {
                if current.get(tab) == Some(ids) {
                    current.remove(tab);
                }
            }
            if current.is_empty() {
                self.selections = None;
            }
        }
    }
}

/// Report as echoed by a partial update. The backend may omit any field.
/// Lifecycle status is not part of the echo; the sync tracker owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: String,
    pub name: Option<String>,
    pub selections: Option<Selections>,
    pub active_tab: Option<EntityTab>,
    pub selected_metrics: Option<Vec<MetricId>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub pinned: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub data_range: Option<DataRange>,
    pub auto_refresh: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportPayload {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub selections: Selections,
    pub active_tab: EntityTab,
    #[serde(default)]
    pub selected_metrics: Vec<MetricId>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub requested_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub status: ReportStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub data_range: Option<DataRange>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRefreshBudget {
    pub limit: u32,
    pub current: u32,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRefreshToggle {
    pub report_id: String,
    pub auto_refresh: bool,
    pub budget: AutoRefreshBudget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub project_id: String,
    pub report_id: String,
    pub tab: EntityTab,
    pub entity_ids: Vec<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// One (date, entity) cell of the metric table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub entity_id: String,
    #[serde(default)]
    pub metrics: BTreeMap<MetricId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub id: String,
    pub tab: EntityTab,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_on: Option<NaiveDate>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsPayload {
    pub records: Vec<MetricRecord>,
    pub entities: Vec<EntityMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    MutationPersisted { report_id: String },
    MutationFailed { report_id: String, message: String },
    StatusChanged { report_id: String, from: ReportStatus, to: ReportStatus },
    SyncCompleted { report_id: String },
    AutoRefreshChanged { report_id: String, enabled: bool, budget: AutoRefreshBudget },
    CacheFilled { report_id: String, tab: EntityTab },
    CacheInvalidated { report_id: String },
}

#[cfg(test)]
pub(crate) fn sample_report(id: &str) -> Report {
    let from = NaiveDate::from_ymd_opt(2026, 9, 1).expect("date");
    let to = NaiveDate::from_ymd_opt(2026, 9, 30).expect("date");
    Report {
        id: id.to_string(),
        project_id: "project-1".to_string(),
        name: format!("Report {id}"),
        selections: Selections::new(),
        active_tab: EntityTab::Campaigns,
        selected_metrics: vec!["spend".to_string(), "ctr".to_string()],
        date_from: from,
        date_to: to,
        data_range: DataRange {
            loaded_days: 30,
            requested_days: 30,
            start_date: Some(from),
            end_date: Some(to),
        },
        status: ReportStatus::Ready,
        sync_progress: 100.0,
        sync_error: None,
        auto_refresh: false,
        pinned: false,
        tags: Vec::new(),
        last_opened_at: None,
        deleted_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
