//! Anomaly log
//!
//! Market-condition anomalies are recovered locally and recorded here. They
//! are expected and frequent, not defects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Action blocked by the structural mask
    MaskedAction,
    /// Action forced to HOLD during a risk cooldown
    CooldownOverride,
    /// Take profit moved back into bounds
    CorrectedTakeProfit,
    /// Stop loss moved back into bounds
    CorrectedStopLoss,
    /// Position closed by a critical breach
    ForcedFlatten,
    /// Quantity shrunk by the risk manager
    ResizedPosition,
    /// Trade skipped because the sized quantity was zero
    ZeroQuantity,
    NumericalInstability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub bar: usize,
    pub kind: AnomalyKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyLog {
    entries: Vec<Anomaly>,
}

impl AnomalyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, bar: usize, kind: AnomalyKind, detail: impl Into<String>) {
        let detail = detail.into();
        debug!(bar, ?kind, %detail, "anomaly");
        self.entries.push(Anomaly { bar, kind, detail });
    }

    pub fn entries(&self) -> &[Anomaly] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.entries.iter().filter(|a| a.kind == kind).count()
    }

    /// Counts per kind, for reporting
    pub fn summary(&self) -> BTreeMap<AnomalyKind, usize> {
        let mut out = BTreeMap::new();
        for a in &self.entries {
            *out.entry(a.kind).or_insert(0) += 1;
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
