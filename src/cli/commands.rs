//! Command implementations.
//!
//! Everything here is synchronous; the binary runs training on a blocking
//! task so Ctrl+C can cancel it between rollout rounds.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use super::output::{self, DecisionRow, EpisodeRow, OutputMode};
use crate::config::AppConfig;
use crate::domain::{load_candles, save_candles};
use crate::rl::environment::generate_candles;
use crate::rl::features::MarketFeatures;
use crate::rl::integration::InferenceEngine;
use crate::rl::networks::{ParamGroup, ParamSource, RecurrentPolicyValueModel};
use crate::rl::training::{
    evaluate_model, summarize_results, Checkpointer, TrainingControl, TrainingLoop,
};

/// Flags of `ppo-trader train`
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub episodes: Option<usize>,
    pub data: Option<String>,
    pub checkpoint: Option<String>,
    pub seed: Option<u64>,
    pub rollout_workers: Option<usize>,
    pub workers: Option<usize>,
    pub deadline: Option<u64>,
    pub resume: Option<String>,
    pub output: Option<String>,
    pub json: bool,
}

impl TrainOptions {
    /// CLI flags win over file and environment configuration
    pub fn apply(&self, config: &mut AppConfig) {
        let training = &mut config.rl.training;
        if let Some(episodes) = self.episodes {
            training.episodes = episodes;
        }
        if let Some(dir) = &self.checkpoint {
            training.checkpoint_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            training.seed = seed;
        }
        if let Some(workers) = self.rollout_workers {
            training.rollout_workers = workers;
        }
        if let Some(deadline) = self.deadline {
            training.deadline_secs = Some(deadline);
        }
        if let Some(workers) = self.workers {
            config.rl.gradient.workers = workers;
        }
        if let Some(path) = &self.data {
            config.data.candles_path = Some(path.clone());
        }
    }
}

/// Candles from `data.candles_path`, or a seeded synthetic series
pub fn load_market(config: &AppConfig) -> anyhow::Result<Arc<MarketFeatures>> {
    let candles = match &config.data.candles_path {
        Some(path) => {
            load_candles(path).with_context(|| format!("failed to load candles from {path}"))?
        }
        None => {
            let mut rng = StdRng::seed_from_u64(config.rl.training.seed);
            generate_candles(&config.data.synthetic, config.data.synthetic_bars, &mut rng)
        }
    };
    info!(bars = candles.len(), "market data ready");
    Ok(Arc::new(MarketFeatures::new(candles)?))
}

pub fn train(mut config: AppConfig, opts: &TrainOptions, control: TrainingControl) -> anyhow::Result<()> {
    opts.apply(&mut config);
    config.validate()?;

    let market = load_market(&config)?;
    let mut training = match &opts.resume {
        Some(path) => {
            let model = RecurrentPolicyValueModel::load(path)
                .with_context(|| format!("failed to load model {path}"))?;
            info!(path = %path, "resuming from model");
            config.rl.environment.window_size = model.sequence_length;
            TrainingLoop::with_model(config.rl.clone(), market, model)?
        }
        None => TrainingLoop::new(config.rl.clone(), market)?,
    }
    .with_checkpoints()?;

    let control = match config.rl.training.deadline_secs {
        Some(secs) => control.with_deadline(Duration::from_secs(secs)),
        None => control,
    };
    let report = training.train(&control)?;
    training.checkpoint(report.episodes.len())?;

    let output_path = opts.output.clone().unwrap_or_else(|| {
        Path::new(&config.rl.training.checkpoint_dir)
            .join("ppo_final.json")
            .to_string_lossy()
            .into_owned()
    });
    training.model().save(&output_path)?;

    if opts.json {
        return output::print_item(&report);
    }
    let rows: Vec<EpisodeRow> = report.episodes.iter().map(EpisodeRow::from).collect();
    output::print_items(&rows, OutputMode::Table)?;
    println!();
    output::print_summary(&report.summary);
    output::print_kv("Stopped", report.stop_reason);
    output::print_kv("Run", report.run_id);
    output::print_kv("Elapsed", format!("{:.1}s", report.elapsed_secs));
    output::print_kv("Model", &output_path);
    Ok(())
}

pub fn eval(
    mut config: AppConfig,
    model_path: &str,
    data: Option<String>,
    episodes: usize,
    json: bool,
) -> anyhow::Result<()> {
    if data.is_some() {
        config.data.candles_path = data;
    }
    let model = RecurrentPolicyValueModel::load(model_path)
        .with_context(|| format!("failed to load model {model_path}"))?;
    config.rl.environment.window_size = model.sequence_length;
    config.validate()?;

    let market = load_market(&config)?;
    let results = evaluate_model(&model, market, &config.rl, episodes)?;
    let summary = summarize_results(&results);

    if json {
        return output::print_item(&serde_json::json!({ "episodes": results, "summary": summary }));
    }
    let rows: Vec<EpisodeRow> = results.iter().map(EpisodeRow::from).collect();
    output::print_items(&rows, OutputMode::Table)?;
    println!();
    output::print_summary(&summary);
    Ok(())
}

pub fn infer(
    mut config: AppConfig,
    model_path: &str,
    data: Option<String>,
    last: usize,
    json: bool,
) -> anyhow::Result<()> {
    if data.is_some() {
        config.data.candles_path = data;
    }
    let model = RecurrentPolicyValueModel::load(model_path)
        .with_context(|| format!("failed to load model {model_path}"))?;
    let engine = InferenceEngine::new(model, config.rl.environment.confluence_threshold)?;

    let market = load_market(&config)?;
    let end = market.len();
    let decisions = engine.decide_range(&market, end.saturating_sub(last.max(1))..end)?;

    let mode = OutputMode::from_json_flag(json);
    if mode == OutputMode::Json {
        return output::print_item(&decisions);
    }
    let rows: Vec<DecisionRow> = decisions.iter().map(DecisionRow::from).collect();
    output::print_items(&rows, mode)
}

pub fn info(path: &str) -> anyhow::Result<()> {
    let path_ref = Path::new(path);
    if path_ref.is_dir() {
        let checkpointer = Checkpointer::new(path_ref, usize::MAX)?;
        let names = checkpointer.list_checkpoints();
        if names.is_empty() {
            println!("(no checkpoints in {path})");
        }
        for name in names {
            match checkpointer.load_metadata(&name)? {
                Some(meta) => println!(
                    "{name}  episodes={}  run={}  created={}",
                    meta.episodes, meta.run_id, meta.created_at
                ),
                None => println!("{name}"),
            }
        }
        return Ok(());
    }

    let model = RecurrentPolicyValueModel::load(path)
        .with_context(|| format!("failed to load model {path}"))?;
    output::print_kv("Model", path);
    output::print_kv("Feature size", model.feature_size);
    output::print_kv("Hidden size", model.hidden_size);
    output::print_kv("Sequence length", model.sequence_length);
    output::print_kv("Parameters", model.param_count());
    for group in ParamGroup::ALL {
        output::print_kv(group.name(), model.group(group).param_count());
    }
    Ok(())
}

pub fn synth(config: &AppConfig, bars: usize, seed: u64, output_path: &str) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let candles = generate_candles(&config.data.synthetic, bars, &mut rng);
    save_candles(output_path, &candles)?;
    output::print_kv("Bars", candles.len());
    output::print_kv("Written", output_path);
    Ok(())
}
