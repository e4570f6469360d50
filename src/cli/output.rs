//! Output formatting for CLI commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::rl::integration::Decision;
use crate::rl::training::{EpisodeResult, TrainingSummary};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Print a single Serialize item as pretty JSON.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

/// Print a simple key-value pair.
pub fn print_kv(key: &str, value: impl std::fmt::Display) {
    println!("{key:>18}: {value}");
}

#[derive(Debug, Serialize, Tabled)]
pub struct EpisodeRow {
    pub episode: usize,
    pub reward: String,
    pub pnl: String,
    pub trades: usize,
    pub win_rate: String,
    pub max_drawdown: String,
    pub steps: usize,
}

impl From<&EpisodeResult> for EpisodeRow {
    fn from(r: &EpisodeResult) -> Self {
        Self {
            episode: r.episode + 1,
            reward: format!("{:.3}", r.total_reward),
            pnl: format!("{:.2}", r.final_pnl),
            trades: r.num_trades,
            win_rate: format!("{:.1}%", r.win_rate * 100.0),
            max_drawdown: format!("{:.2}%", r.max_drawdown * 100.0),
            steps: r.length,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct DecisionRow {
    pub bar: usize,
    pub direction: String,
    pub tp_offset: String,
    pub sl_tight: String,
    pub size: String,
    pub reason: String,
    pub value: String,
    pub tp_sl_hint: String,
}

impl From<&Decision> for DecisionRow {
    fn from(d: &Decision) -> Self {
        Self {
            bar: d.bar,
            direction: d.action.direction.to_string(),
            tp_offset: format!("{:+.3}", d.action.tp_offset),
            sl_tight: format!("{:.3}", d.action.sl_tight),
            size: format!("{:.3}", d.action.size),
            reason: d.reason.clone(),
            value: format!("{:.4}", d.value),
            tp_sl_hint: d.suggestion.map_or_else(
                || "-".to_string(),
                |s| format!("{} {:.2} / {} {:.2}", s.tp_source, s.tp_mult, s.sl_source, s.sl_mult),
            ),
        }
    }
}

/// Print a training or evaluation summary.
pub fn print_summary(summary: &TrainingSummary) {
    print_kv("Episodes", summary.num_episodes);
    print_kv("Avg Reward", format!("{:.3}", summary.avg_reward));
    print_kv("Avg PnL", format!("{:.2}", summary.avg_pnl));
    print_kv("Avg Length", format!("{:.1}", summary.avg_episode_length));
    print_kv("Avg Trades", format!("{:.1}", summary.avg_trades));
    print_kv("Win Rate", format!("{:.1}%", summary.avg_win_rate * 100.0));
    print_kv("Avg Max DD", format!("{:.2}%", summary.avg_max_drawdown * 100.0));
    print_kv("Profit Factor", format!("{:.2}", summary.profit_factor));
}
