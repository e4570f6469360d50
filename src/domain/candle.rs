use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => (self.high - self.low)
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => self.high - self.low,
        }
    }

    fn is_well_formed(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.low > 0.0
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0.0
    }
}

/// Check that a candle sequence is usable by the engine.
///
/// Bars must be finite, internally consistent and strictly ascending in time.
/// Gaps between timestamps are allowed.
pub fn validate_candles(candles: &[Candle]) -> Result<()> {
    for (i, candle) in candles.iter().enumerate() {
        if !candle.is_well_formed() {
            return Err(EngineError::Validation(format!(
                "malformed candle at index {} ({})",
                i, candle.timestamp
            )));
        }
        if i > 0 && candle.timestamp <= candles[i - 1].timestamp {
            return Err(EngineError::Validation(format!(
                "candles not in ascending order at index {}",
                i
            )));
        }
    }
    Ok(())
}

/// Load a JSON array of candles and validate it
pub fn load_candles<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let candles: Vec<Candle> = serde_json::from_str(&raw)?;
    validate_candles(&candles)?;
    Ok(candles)
}

/// Write candles as a JSON array
pub fn save_candles<P: AsRef<Path>>(path: P, candles: &[Candle]) -> Result<()> {
    let raw = serde_json::to_string_pretty(candles)?;
    std::fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candle(minutes: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        let base = DateTime::parse_from_rfc3339("2024-03-10T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Candle {
            timestamp: base + Duration::minutes(minutes),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 10.0,
        }
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let c = candle(0, 100.0, 102.0, 99.0, 101.0);
        assert!((c.true_range(None) - 3.0).abs() < 1e-12);
        // gap down from 106: |99 - 106| = 7 dominates
        assert!((c.true_range(Some(106.0)) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_accepts_gaps() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(60, 100.5, 102.0, 100.0, 101.0),
        ];
        assert!(validate_candles(&candles).is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered() {
        let candles = vec![
            candle(5, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 102.0, 100.0, 101.0),
        ];
        let err = validate_candles(&candles).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let candles = vec![candle(0, 100.0, 98.0, 99.0, 100.5)];
        assert!(validate_candles(&candles).is_err());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 102.0, 100.0, 101.0),
        ];
        let path = std::env::temp_dir().join(format!("candles_{}.json", uuid::Uuid::new_v4()));
        save_candles(&path, &candles).unwrap();
        let loaded = load_candles(&path).unwrap();
        assert_eq!(loaded, candles);
        let _ = std::fs::remove_file(&path);
    }
}
