//! Observation Builder
//!
//! Turns precomputed per-bar features plus the account state into the
//! fixed-width rows consumed by the recurrent model.

use serde::{Deserialize, Serialize};

use super::indicators::INDICATOR_COUNT;
use super::structural::StructuralFeatures;
use super::MarketFeatures;

/// Encoded structural values per row
pub const STRUCTURAL_COUNT: usize = 15;

/// Account values per row
pub const ACCOUNT_COUNT: usize = 5;

/// Width of one observation row
pub const OBSERVATION_SIZE: usize = INDICATOR_COUNT + STRUCTURAL_COUNT + ACCOUNT_COUNT;

/// Distance reported for a missing support or resistance level, in ATR/10
const FAR_LEVEL: f64 = 5.0;

/// Account state appended to every row of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// +1 long, -1 short, 0 flat
    pub position_side: f64,
    /// Unrealized return on the entry notional
    pub unrealized_pct: f64,
    /// Bars held / timeout
    pub hold_fraction: f64,
    /// Current drawdown from peak equity
    pub drawdown: f64,
    pub cooling_down: bool,
}

impl AccountSnapshot {
    fn encode(&self) -> [f64; ACCOUNT_COUNT] {
        [
            self.position_side,
            (self.unrealized_pct * 10.0).clamp(-5.0, 5.0),
            self.hold_fraction.clamp(0.0, 1.0),
            self.drawdown.clamp(0.0, 1.0),
            if self.cooling_down { 1.0 } else { 0.0 },
        ]
    }
}

/// Fixed-width encoding of a structural snapshot
pub fn encode_structural(features: &StructuralFeatures) -> [f64; STRUCTURAL_COUNT] {
    let level = |d: Option<f64>| {
        d.filter(|v| v.is_finite())
            .map_or(FAR_LEVEL, |v| (v / 10.0).clamp(0.0, FAR_LEVEL))
    };
    let regime = features.regime.as_array();
    let mut out = [0.0; STRUCTURAL_COUNT];
    out[..4].copy_from_slice(&regime);
    out[4] = f64::from(features.vol_regime) / 2.0;
    out[5] = level(features.dist_to_support);
    out[6] = level(features.dist_to_resistance);
    out[7] = features.support_strength;
    out[8] = features.resistance_strength;
    for (slot, d) in out[9..].iter_mut().zip(features.fib_distances.iter()) {
        *slot = d / 10.0;
    }
    out
}

/// Build the observation window ending at `end_bar`.
///
/// Rows before the first bar repeat the first available row.
pub fn build_window(
    market: &MarketFeatures,
    end_bar: usize,
    window: usize,
    account: &AccountSnapshot,
) -> Vec<Vec<f64>> {
    let last = market.len().saturating_sub(1);
    let end = end_bar.min(last);
    let account = account.encode();

    (0..window)
        .map(|k| {
            let bar = (end + k + 1).saturating_sub(window);
            let mut row = Vec::with_capacity(OBSERVATION_SIZE);
            row.extend_from_slice(&market.indicators(bar));
            row.extend_from_slice(&encode_structural(market.structure(bar)));
            row.extend_from_slice(&account);
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::environment::generate_candles;
    use crate::rl::environment::MarketConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_window_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let candles = generate_candles(&MarketConfig::default(), 120, &mut rng);
        let market = MarketFeatures::new(candles).unwrap();
        let account = AccountSnapshot {
            position_side: 1.0,
            cooling_down: true,
            ..Default::default()
        };
        let rows = build_window(&market, 100, 16, &account);
        assert_eq!(rows.len(), 16);
        assert!(rows.iter().all(|r| r.len() == OBSERVATION_SIZE));
        let last = rows.last().unwrap();
        assert_eq!(last[OBSERVATION_SIZE - 5], 1.0);
        assert_eq!(last[OBSERVATION_SIZE - 1], 1.0);
    }

    #[test]
    fn test_window_pads_at_series_start() {
        let mut rng = StdRng::seed_from_u64(4);
        let candles = generate_candles(&MarketConfig::default(), 60, &mut rng);
        let market = MarketFeatures::new(candles).unwrap();
        let rows = build_window(&market, 2, 8, &AccountSnapshot::default());
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0], rows[5]);
    }

    #[test]
    fn test_missing_levels_encode_as_far() {
        let encoded = encode_structural(&StructuralFeatures::neutral(100.0));
        assert_eq!(encoded[5], FAR_LEVEL);
        assert_eq!(encoded[6], FAR_LEVEL);
        assert!((encoded[4] - 0.5).abs() < 1e-12);
    }
}
