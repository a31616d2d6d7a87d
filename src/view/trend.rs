use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub current: f64,
    pub previous: f64,
    pub percent_change: f64,
}

impl Trend {
    pub fn between(current: f64, previous: f64) -> Self {
        Self {
            current,
            previous,
            percent_change: percent_change(current, previous),
        }
    }
}

/// Change from `previous` to `current` in percent. A zero baseline yields 0
/// when nothing happened in either period and ±100 otherwise.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else if current > 0.0 {
            100.0
        } else {
            -100.0
        }
    } else {
        (current - previous) / previous * 100.0
    }
}
