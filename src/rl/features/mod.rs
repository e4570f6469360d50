//! Feature Extraction
//!
//! Indicator and structural features, precomputed once per candle series and
//! shared read-only between environments.

pub mod indicators;
pub mod observation;
pub mod structural;
pub mod suggest;

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::domain::{validate_candles, Candle};
use crate::error::{EngineError, Result};
use crate::rl::core::action::Direction;

pub use indicators::{compute_indicators, INDICATOR_COUNT, INDICATOR_NAMES};
pub use observation::{
    build_window, encode_structural, AccountSnapshot, ACCOUNT_COUNT, OBSERVATION_SIZE,
    STRUCTURAL_COUNT,
};
pub use structural::{
    FibLevel, MarketPhase, RegimeMix, StructuralFeatureExtractor, StructuralFeatures, SwingLeg,
    SwingPair, MIN_HISTORY,
};
pub use suggest::{compute_entry_meta, suggest_tp_sl, EntryMeta, LevelSource, TpSlSuggestion};

/// Candles plus their per-bar indicator and structural features
#[derive(Debug)]
pub struct MarketFeatures {
    candles: Arc<[Candle]>,
    indicators: Vec<[f64; INDICATOR_COUNT]>,
    structure: Vec<StructuralFeatures>,
    meta: Vec<EntryMeta>,
}

impl MarketFeatures {
    /// Validate the candles and precompute every bar's features
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        if candles.is_empty() {
            return Err(EngineError::InsufficientData {
                required: 1,
                available: 0,
            });
        }
        validate_candles(&candles)?;
        let indicators = compute_indicators(&candles);
        let meta = compute_entry_meta(&indicators);
        let extractor = StructuralFeatureExtractor::new(&candles);
        let structure: Vec<StructuralFeatures> = (0..candles.len())
            .into_par_iter()
            .map(|i| extractor.extract(i))
            .collect();
        debug!(bars = candles.len(), "precomputed market features");

        Ok(Self {
            candles: candles.into(),
            indicators,
            structure,
            meta,
        })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candle(&self, bar: usize) -> &Candle {
        &self.candles[bar.min(self.candles.len() - 1)]
    }

    pub fn indicators(&self, bar: usize) -> [f64; INDICATOR_COUNT] {
        self.indicators[bar.min(self.indicators.len() - 1)]
    }

    /// Structural snapshot at a bar, clamped to the series
    pub fn structure(&self, bar: usize) -> &StructuralFeatures {
        &self.structure[bar.min(self.structure.len() - 1)]
    }

    /// Trend and volatility context at a bar, clamped to the series
    pub fn entry_meta(&self, bar: usize) -> &EntryMeta {
        &self.meta[bar.min(self.meta.len() - 1)]
    }

    /// TP/SL suggestion for an entry at `bar`
    pub fn suggest(&self, bar: usize, direction: Direction, confluence: f64) -> TpSlSuggestion {
        suggest_tp_sl(direction, self.structure(bar), self.entry_meta(bar), confluence)
    }
}
