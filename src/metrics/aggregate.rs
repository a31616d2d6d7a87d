use super::{DependencyValues, MetricCatalog, MetricKind};
use std::collections::BTreeSet;

const MAX_DERIVATION_DEPTH: usize = 8;

pub trait MetricRow {
    fn row_key(&self) -> &str;
    fn metric_value(&self, metric_id: &str) -> Option<f64>;
}

/// Aggregates `metric_id` over `rows`, restricted to `selection` when given.
///
/// A derived metric sums each of its dependencies over the rows in scope and
/// applies its formula once to those sums. Per-row derived values are never
/// summed. Summable base metrics are summed; non-summable base metrics (unique
/// counts such as reach) take the largest observed value.
pub fn aggregate<R: MetricRow>(
    catalog: &MetricCatalog,
    metric_id: &str,
    rows: &[R],
    selection: Option<&BTreeSet<String>>,
) -> f64 {
    let in_scope = rows
        .iter()
        .filter(|row| selection.map_or(true, |keys| keys.contains(row.row_key())))
        .collect::<Vec<_>>();
    aggregate_scoped(catalog, metric_id, &in_scope, 0)
}

/// Value of `metric_id` for a single row, derived metrics included.
pub fn row_value<R: MetricRow>(catalog: &MetricCatalog, metric_id: &str, row: &R) -> f64 {
    aggregate_scoped(catalog, metric_id, &[row], 0)
}

fn aggregate_scoped<R: MetricRow>(
    catalog: &MetricCatalog,
    metric_id: &str,
    rows: &[&R],
    depth: usize,
) -> f64 {
    match catalog.kind(metric_id) {
        MetricKind::Derived {
            dependencies,
            formula,
        } => {
            if depth >= MAX_DERIVATION_DEPTH {
                tracing::warn!(metric_id, "derived metric nesting too deep, treating as zero");
                return 0.0;
            }
            let values = dependencies
                .iter()
                .map(|dependency| {
                    (
                        dependency.to_string(),
                        aggregate_scoped(catalog, dependency, rows, depth + 1),
                    )
                })
                .collect::<DependencyValues>();
            formula(&values)
        }
        MetricKind::Base { summable: true } => rows
            .iter()
            .filter_map(|row| row.metric_value(metric_id))
            .sum(),
        MetricKind::Base { summable: false } => rows
            .iter()
            .filter_map(|row| row.metric_value(metric_id))
            .fold(None, |max: Option<f64>, value| {
                Some(max.map_or(value, |current| current.max(value)))
            })
            .unwrap_or(0.0),
    }
}
