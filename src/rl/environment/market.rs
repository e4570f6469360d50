//! Simulated Market for Candle Generation
//!
//! Generates OHLCV bars for training demos and tests: a mean-reverting
//! random walk around a drifting mean, with regime switches in trend and
//! volatility so that every structural regime shows up.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::Candle;

/// Market simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Initial price
    pub initial_price: f64,
    /// Per-bar return volatility
    pub volatility: f64,
    /// Pull towards the drifting mean (0 = random walk)
    pub mean_reversion: f64,
    /// Per-bar drift of the mean
    pub trend: f64,
    /// Probability per bar of a trend/volatility regime switch
    pub regime_switch_prob: f64,
    /// Base traded volume
    pub base_volume: f64,
    /// Bar length in minutes
    pub bar_minutes: i64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            initial_price: 100.0,
            volatility: 0.008,
            mean_reversion: 0.05,
            trend: 0.0005,
            regime_switch_prob: 0.02,
            base_volume: 1_000.0,
            bar_minutes: 60,
        }
    }
}

/// Current simulator state
#[derive(Debug, Clone)]
pub struct MarketState {
    pub price: f64,
    /// Level the price reverts to
    pub mean_price: f64,
    /// Current drift of the mean
    pub trend: f64,
    /// Current volatility multiplier
    pub vol_scale: f64,
    pub step: usize,
}

/// Simulated market producing one candle per step
pub struct SimulatedMarket {
    config: MarketConfig,
    state: MarketState,
    start: DateTime<Utc>,
}

impl SimulatedMarket {
    /// Create a new simulated market
    pub fn new(config: MarketConfig) -> Self {
        let state = Self::initial_state(&config);
        Self {
            config,
            state,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        }
    }

    fn initial_state(config: &MarketConfig) -> MarketState {
        MarketState {
            price: config.initial_price,
            mean_price: config.initial_price,
            trend: config.trend,
            vol_scale: 1.0,
            step: 0,
        }
    }

    /// Generate a sample from standard normal distribution (Box-Muller transform)
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        let u1: f64 = rng.gen_range(1e-12..1.0);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Reset market to initial state
    pub fn reset(&mut self) -> &MarketState {
        self.state = Self::initial_state(&self.config);
        &self.state
    }

    /// Step the market forward one bar
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Candle {
        if rng.gen::<f64>() < self.config.regime_switch_prob {
            self.state.trend = self.config.trend * rng.gen_range(-3.0..3.0);
            self.state.vol_scale = rng.gen_range(0.5..2.5);
        }

        let vol = self.config.volatility * self.state.vol_scale;
        self.state.mean_price *= 1.0 + self.state.trend;
        let reversion =
            self.config.mean_reversion * (self.state.mean_price - self.state.price) / self.state.price;
        let ret = Self::sample_normal(rng) * vol + reversion;

        let open = self.state.price;
        let close = (open * (1.0 + ret)).max(1.0);
        let wick_up = Self::sample_normal(rng).abs() * vol * 0.5;
        let wick_down = Self::sample_normal(rng).abs() * vol * 0.5;
        let high = open.max(close) * (1.0 + wick_up);
        let low = (open.min(close) * (1.0 - wick_down)).max(0.5);
        let volume = self.config.base_volume
            * (1.0 + ret.abs() / self.config.volatility.max(1e-12))
            * rng.gen_range(0.5..1.5);

        let candle = Candle {
            timestamp: self.start + Duration::minutes(self.config.bar_minutes * self.state.step as i64),
            open,
            high,
            low,
            close,
            volume,
        };

        self.state.price = close;
        self.state.step += 1;
        candle
    }

    /// Get current market state
    pub fn state(&self) -> &MarketState {
        &self.state
    }

    /// Get configuration
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }
}

/// Generate `bars` candles from a fresh simulated market
pub fn generate_candles<R: Rng + ?Sized>(config: &MarketConfig, bars: usize, rng: &mut R) -> Vec<Candle> {
    let mut market = SimulatedMarket::new(config.clone());
    (0..bars).map(|_| market.step(rng)).collect()
}
