//! Metric catalog: every metric id is classified exactly once as a base
//! metric or a derived one, and generic ids list their concrete variants.

mod aggregate;
mod resolve;

pub use aggregate::{aggregate, row_value, MetricRow};
pub use resolve::{resolve, resolved_columns, ResolvedColumn};

use crate::models::MetricId;
use std::collections::{BTreeMap, HashMap};

pub type DependencyValues = BTreeMap<MetricId, f64>;
pub type Formula = fn(&DependencyValues) -> f64;

#[derive(Debug, Clone, Copy)]
pub enum MetricKind {
    Base { summable: bool },
    Derived {
        dependencies: &'static [&'static str],
        formula: Formula,
    },
}

impl MetricKind {
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Derived { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub id: MetricId,
    pub label: String,
    pub kind: MetricKind,
}

#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    definitions: HashMap<MetricId, MetricDefinition>,
    variants: HashMap<MetricId, Vec<MetricId>>,
}

const SUMMABLE: MetricKind = MetricKind::Base { summable: true };
const NOT_SUMMABLE: MetricKind = MetricKind::Base { summable: false };

/// Concrete conversion actions, in tie-break priority order.
const CONVERSION_ACTIONS: [&str; 4] = ["purchase", "lead", "complete_registration", "add_to_cart"];

impl MetricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut catalog = Self::new();

        catalog.define("spend", "Amount spent", SUMMABLE);
        catalog.define("impressions", "Impressions", SUMMABLE);
        catalog.define("clicks", "Clicks", SUMMABLE);
        catalog.define("link_clicks", "Link clicks", SUMMABLE);
        catalog.define("revenue", "Revenue", SUMMABLE);
        catalog.define("reach", "Reach", NOT_SUMMABLE);

        catalog.define(
            "ctr",
            "CTR",
            MetricKind::Derived {
                dependencies: &["clicks", "impressions"],
                formula: |deps| ratio(dep(deps, "clicks"), dep(deps, "impressions")) * 100.0,
            },
        );
        catalog.define(
            "cpc",
            "CPC",
            MetricKind::Derived {
                dependencies: &["spend", "clicks"],
                formula: |deps| ratio(dep(deps, "spend"), dep(deps, "clicks")),
            },
        );
        catalog.define(
            "cpm",
            "CPM",
            MetricKind::Derived {
                dependencies: &["spend", "impressions"],
                formula: |deps| ratio(dep(deps, "spend"), dep(deps, "impressions")) * 1_000.0,
            },
        );
        catalog.define(
            "frequency",
            "Frequency",
            MetricKind::Derived {
                dependencies: &["impressions", "reach"],
                formula: |deps| ratio(dep(deps, "impressions"), dep(deps, "reach")),
            },
        );
        catalog.define(
            "roas",
            "ROAS",
            MetricKind::Derived {
                dependencies: &["revenue", "spend"],
                formula: |deps| ratio(dep(deps, "revenue"), dep(deps, "spend")),
            },
        );

        catalog.define("conversions_purchase", "Purchases", SUMMABLE);
        catalog.define("conversions_lead", "Leads", SUMMABLE);
        catalog.define("conversions_complete_registration", "Registrations", SUMMABLE);
        catalog.define("conversions_add_to_cart", "Adds to cart", SUMMABLE);
        catalog.define("conversion_value_purchase", "Purchase value", SUMMABLE);
        catalog.define("conversion_value_lead", "Lead value", SUMMABLE);

        catalog.define(
            "cost_per_conversion_purchase",
            "Cost per purchase",
            MetricKind::Derived {
                dependencies: &["spend", "conversions_purchase"],
                formula: |deps| ratio(dep(deps, "spend"), dep(deps, "conversions_purchase")),
            },
        );
        catalog.define(
            "cost_per_conversion_lead",
            "Cost per lead",
            MetricKind::Derived {
                dependencies: &["spend", "conversions_lead"],
                formula: |deps| ratio(dep(deps, "spend"), dep(deps, "conversions_lead")),
            },
        );
        catalog.define(
            "cost_per_conversion_complete_registration",
            "Cost per registration",
            MetricKind::Derived {
                dependencies: &["spend", "conversions_complete_registration"],
                formula: |deps| ratio(dep(deps, "spend"), dep(deps, "conversions_complete_registration")),
            },
        );

        catalog.declare_generic(
            "conversions",
            CONVERSION_ACTIONS.iter().map(|action| format!("conversions_{action}")),
        );
        catalog.declare_generic(
            "cost_per_conversion",
            CONVERSION_ACTIONS[..3]
                .iter()
                .map(|action| format!("cost_per_conversion_{action}")),
        );
        catalog.declare_generic(
            "conversion_value",
            ["conversion_value_purchase", "conversion_value_lead"]
                .iter()
                .map(|id| id.to_string()),
        );

        catalog
    }

    pub fn define(&mut self, id: &str, label: &str, kind: MetricKind) {
        self.definitions.insert(
            id.to_string(),
            MetricDefinition {
                id: id.to_string(),
                label: label.to_string(),
                kind,
            },
        );
    }

    /// Registers a generic id. `variants` is also the tie-break priority.
    pub fn declare_generic(&mut self, id: &str, variants: impl IntoIterator<Item = String>) {
        self.variants
            .insert(id.to_string(), variants.into_iter().collect());
    }

    pub fn definition(&self, id: &str) -> Option<&MetricDefinition> {
        self.definitions.get(id)
    }

    /// Undeclared ids are summable base metrics, so they are never silently
    /// dropped from aggregation.
    pub fn kind(&self, id: &str) -> MetricKind {
        self.definitions
            .get(id)
            .map(|definition| definition.kind)
            .unwrap_or(SUMMABLE)
    }

    pub fn variants(&self, id: &str) -> &[MetricId] {
        self.variants.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_generic(&self, id: &str) -> bool {
        self.variants.contains_key(id)
    }

    pub fn label(&self, id: &str) -> String {
        self.definitions
            .get(id)
            .map(|definition| definition.label.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

fn dep(deps: &DependencyValues, id: &str) -> f64 {
    deps.get(id).copied().unwrap_or(0.0)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
