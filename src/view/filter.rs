use super::ViewRow;
use crate::metrics::{row_value, MetricCatalog};
use crate::models::{EntityTab, MetricId};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

static LABEL_WITH_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\s*\(([^()]+)\)\s*$").expect("valid parent label regex"));

const NUMERIC_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnRef {
    Metric(MetricId),
    Name,
    Parent,
    Status,
    CreatedOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextMatch {
    Contains,
    NotContains,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumericOp {
    Greater(f64),
    Less(f64),
    Equal(f64),
    NotEqual(f64),
    Between(f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateOp {
    Before(NaiveDate),
    After(NaiveDate),
    On(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionOp {
    Numeric(NumericOp),
    Text { op: TextMatch, value: String },
    Date(DateOp),
    Status(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnCondition {
    pub column: ColumnRef,
    pub op: ConditionOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentFilter {
    pub op: TextMatch,
    pub value: String,
}

impl NumericOp {
    pub fn matches(self, value: f64) -> bool {
        match self {
            Self::Greater(bound) => value > bound,
            Self::Less(bound) => value < bound,
            Self::Equal(target) => (value - target).abs() <= NUMERIC_EPSILON,
            Self::NotEqual(target) => (value - target).abs() > NUMERIC_EPSILON,
            Self::Between(low, high) => {
                let (low, high) = if low <= high { (low, high) } else { (high, low) };
                value >= low && value <= high
            }
        }
    }
}

impl DateOp {
    pub fn matches(self, date: NaiveDate) -> bool {
        match self {
            Self::Before(bound) => date < bound,
            Self::After(bound) => date > bound,
            Self::On(day) => date == day,
        }
    }
}

/// Case-insensitive text match. An empty needle matches everything.
pub fn text_matches(op: TextMatch, haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let haystack = haystack.trim().to_lowercase();
    match op {
        TextMatch::Contains => haystack.contains(&needle),
        TextMatch::NotContains => !haystack.contains(&needle),
        TextMatch::Equal => haystack == needle,
    }
}

impl ParentFilter {
    /// Matches against the resolved "parent label (id)" string. `equal` also
    /// accepts the bare parent id, or a label whose trailing id matches.
    pub fn matches(&self, row: &ViewRow, level: Option<EntityTab>) -> bool {
        let parent = row.parent_at(level);
        let label = parent.map(|parent| parent.label()).unwrap_or_default();
        match self.op {
            TextMatch::Contains | TextMatch::NotContains => text_matches(self.op, &label, &self.value),
            TextMatch::Equal => {
                let Some(parent) = parent else {
                    return self.value.trim().is_empty();
                };
                if text_matches(TextMatch::Equal, &label, &self.value)
                    || text_matches(TextMatch::Equal, &parent.id, &self.value)
                {
                    return true;
                }
                LABEL_WITH_ID_RE
                    .captures(self.value.trim())
                    .and_then(|captures| captures.get(2))
                    .map(|id| id.as_str().trim() == parent.id)
                    .unwrap_or(false)
            }
        }
    }
}

enum Cell {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Missing,
}

impl Cell {
    fn as_text(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::Date(value) => value.to_string(),
            Self::Missing => String::new(),
        }
    }
}

impl ColumnCondition {
    pub fn matches(&self, row: &ViewRow, catalog: &MetricCatalog, parent_level: Option<EntityTab>) -> bool {
        let cell = cell_for(&self.column, row, catalog, parent_level);
        match &self.op {
            ConditionOp::Numeric(op) => match cell {
                Cell::Number(value) => op.matches(value),
                Cell::Text(text) => text.trim().parse::<f64>().map(|value| op.matches(value)).unwrap_or(false),
                Cell::Date(_) | Cell::Missing => false,
            },
            ConditionOp::Text { op, value } => text_matches(*op, &cell.as_text(), value),
            ConditionOp::Date(op) => match cell {
                Cell::Date(date) => op.matches(date),
                _ => false,
            },
            ConditionOp::Status(allowed) => {
                if allowed.is_empty() {
                    return true;
                }
                let current = cell.as_text().trim().to_lowercase();
                allowed
                    .iter()
                    .any(|status| status.trim().to_lowercase() == current)
            }
        }
    }
}

fn cell_for(column: &ColumnRef, row: &ViewRow, catalog: &MetricCatalog, parent_level: Option<EntityTab>) -> Cell {
    match column {
        ColumnRef::Metric(id) => Cell::Number(row_value(catalog, id, row)),
        ColumnRef::Name => Cell::Text(row.name.clone()),
        ColumnRef::Parent => row
            .parent_at(parent_level)
            .map(|parent| Cell::Text(parent.label()))
            .unwrap_or(Cell::Missing),
        ColumnRef::Status => row.status.clone().map(Cell::Text).unwrap_or(Cell::Missing),
        ColumnRef::CreatedOn => row.created_on.map(Cell::Date).unwrap_or(Cell::Missing),
    }
}

#[cfg(test)]
mod tests {
    use super::{text_matches, ColumnCondition, ColumnRef, ConditionOp, DateOp, NumericOp, ParentFilter, TextMatch};
    use crate::metrics::MetricCatalog;
    use crate::models::EntityTab;
    use crate::view::{ParentRef, ViewRow};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn ad_row() -> ViewRow {
        let mut row = ViewRow::new(EntityTab::Ads, "ad-1", "Spring promo video");
        row.status = Some("ACTIVE".to_string());
        row.created_on = NaiveDate::from_ymd_opt(2026, 3, 14);
        row.parent_chain = vec![
            ParentRef {
                tab: EntityTab::Adsets,
                id: "as-9".to_string(),
                name: "Lookalike 1%".to_string(),
            },
            ParentRef {
                tab: EntityTab::Campaigns,
                id: "c-3".to_string(),
                name: "Spring sale".to_string(),
            },
        ];
        row.values.insert("clicks".to_string(), 20.0);
        row.values.insert("impressions".to_string(), 1_000.0);
        row
    }

    #[test]
    fn numeric_conditions_use_derived_row_values() {
        let catalog = MetricCatalog::standard();
        let row = ad_row();
        let ctr_above = ColumnCondition {
            column: ColumnRef::Metric("ctr".to_string()),
            op: ConditionOp::Numeric(NumericOp::Greater(1.5)),
        };
        let ctr_between = ColumnCondition {
            column: ColumnRef::Metric("ctr".to_string()),
            op: ConditionOp::Numeric(NumericOp::Between(3.0, 1.0)),
        };
        assert!(ctr_above.matches(&row, &catalog, None));
        assert!(ctr_between.matches(&row, &catalog, None));
    }

    #[test]
    fn status_and_date_conditions() {
        let catalog = MetricCatalog::standard();
        let row = ad_row();
        let status = ColumnCondition {
            column: ColumnRef::Status,
            op: ConditionOp::Status(BTreeSet::from(["active".to_string(), "paused".to_string()])),
        };
        let before = ColumnCondition {
            column: ColumnRef::CreatedOn,
            op: ConditionOp::Date(DateOp::Before(NaiveDate::from_ymd_opt(2026, 1, 1).expect("date"))),
        };
        assert!(status.matches(&row, &catalog, None));
        assert!(!before.matches(&row, &catalog, None));
    }

    #[test]
    fn parent_filter_resolves_display_level() {
        let row = ad_row();
        let by_campaign = ParentFilter {
            op: TextMatch::Equal,
            value: "Spring sale (c-3)".to_string(),
        };
        assert!(by_campaign.matches(&row, Some(EntityTab::Campaigns)));
        assert!(!by_campaign.matches(&row, Some(EntityTab::Adsets)));

        let by_id = ParentFilter {
            op: TextMatch::Equal,
            value: "as-9".to_string(),
        };
        assert!(by_id.matches(&row, None));

        let excluded = ParentFilter {
            op: TextMatch::NotContains,
            value: "lookalike".to_string(),
        };
        assert!(!excluded.matches(&row, None));
    }

    #[test]
    fn empty_needle_matches_everything() {
        assert!(text_matches(TextMatch::NotContains, "anything", "  "));
        assert!(text_matches(TextMatch::Equal, " Video ", "video"));
    }
}
