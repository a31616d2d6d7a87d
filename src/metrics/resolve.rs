use super::{MetricCatalog, MetricKind};
use crate::models::MetricId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedColumn {
    pub requested: MetricId,
    pub concrete: MetricId,
}

/// Maps each requested id to the concrete id to display, or `None` when the
/// current data window carries no usable variant.
///
/// A requested id that is present maps to itself. A derived id counts as
/// present when all of its dependencies are. Generic ids pick the present
/// variant with the most occurrences, ties going to the earlier declared
/// variant.
pub fn resolve(
    catalog: &MetricCatalog,
    requested: &[MetricId],
    present: &BTreeSet<MetricId>,
    occurrence_counts: &BTreeMap<MetricId, usize>,
) -> BTreeMap<MetricId, Option<MetricId>> {
    requested
        .iter()
        .map(|id| {
            (
                id.clone(),
                resolve_one(catalog, id, present, occurrence_counts),
            )
        })
        .collect()
}

/// Resolved columns in requested order, unresolvable ids dropped.
pub fn resolved_columns(
    catalog: &MetricCatalog,
    requested: &[MetricId],
    present: &BTreeSet<MetricId>,
    occurrence_counts: &BTreeMap<MetricId, usize>,
) -> Vec<ResolvedColumn> {
    let mut seen = BTreeSet::new();
    requested
        .iter()
        .filter_map(|id| {
            let concrete = resolve_one(catalog, id, present, occurrence_counts)?;
            seen.insert(concrete.clone()).then(|| ResolvedColumn {
                requested: id.clone(),
                concrete,
            })
        })
        .collect()
}

fn resolve_one(
    catalog: &MetricCatalog,
    id: &str,
    present: &BTreeSet<MetricId>,
    occurrence_counts: &BTreeMap<MetricId, usize>,
) -> Option<MetricId> {
    if is_present(catalog, id, present, 0) {
        return Some(id.to_string());
    }

    catalog
        .variants(id)
        .iter()
        .enumerate()
        .filter(|(_, variant)| is_present(catalog, variant, present, 0))
        .max_by(|(left_index, left), (right_index, right)| {
            let left_count = occurrences(catalog, left, occurrence_counts, 0);
            let right_count = occurrences(catalog, right, occurrence_counts, 0);
            match left_count.cmp(&right_count) {
                Ordering::Equal => right_index.cmp(left_index),
                other => other,
            }
        })
        .map(|(_, variant)| variant.clone())
}

fn is_present(catalog: &MetricCatalog, id: &str, present: &BTreeSet<MetricId>, depth: usize) -> bool {
    if present.contains(id) {
        return true;
    }
    match catalog.kind(id) {
        MetricKind::Derived { dependencies, .. } if depth < 8 => dependencies
            .iter()
            .all(|dependency| is_present(catalog, dependency, present, depth + 1)),
        _ => false,
    }
}

fn occurrences(
    catalog: &MetricCatalog,
    id: &str,
    occurrence_counts: &BTreeMap<MetricId, usize>,
    depth: usize,
) -> usize {
    if let Some(count) = occurrence_counts.get(id) {
        return *count;
    }
    match catalog.kind(id) {
        MetricKind::Derived { dependencies, .. } if depth < 8 => dependencies
            .iter()
            .map(|dependency| occurrences(catalog, dependency, occurrence_counts, depth + 1))
            .min()
            .unwrap_or(0),
        _ => 0,
    }
}
