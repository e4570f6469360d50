use std::sync::Arc;

use ppo_trader::rl::config::{EnvironmentConfig, ModelConfig, RewardConfig};
use ppo_trader::rl::core::{validate_reward, Direction, HybridAction, REWARD_BOUND};
use ppo_trader::rl::environment::{compute_stop_loss, generate_candles, MarketConfig, TradingEnvironment};
use ppo_trader::rl::features::{MarketFeatures, StructuralFeatures};
use ppo_trader::rl::risk::{ActionMasker, MaskReason, RiskLimitManager, RiskLimits, RiskSnapshot, ViolationKind};
use ppo_trader::rl::RecurrentPolicyValueModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn market(bars: usize, seed: u64) -> Arc<MarketFeatures> {
    let candles = generate_candles(&MarketConfig::default(), bars, &mut StdRng::seed_from_u64(seed));
    Arc::new(MarketFeatures::new(candles).unwrap())
}

fn environment(seed: u64) -> TradingEnvironment {
    TradingEnvironment::new(
        market(500, seed),
        EnvironmentConfig::default(),
        RewardConfig::default(),
        Box::new(StdRng::seed_from_u64(seed)),
    )
    .unwrap()
}

fn random_action(rng: &mut StdRng) -> HybridAction {
    let direction = Direction::from_index(rng.gen_range(0..3)).unwrap();
    HybridAction::new(
        direction,
        rng.gen_range(-0.5..0.5),
        rng.gen_range(0.5..2.0),
        rng.gen_range(0.0..1.0),
    )
}

#[test]
fn random_episode_keeps_equity_invariant() {
    let mut env = environment(11);
    let mut rng = StdRng::seed_from_u64(12);
    env.reset().unwrap();

    let mut equity = env.config().initial_equity;
    let mut steps = 0;
    loop {
        let had_position = env.state().position.is_some();
        let result = env.step(&random_action(&mut rng)).unwrap();
        steps += 1;
        assert!(result.reward.is_finite());
        assert!(result.reward.abs() <= REWARD_BOUND);

        if let (true, Some(trade)) = (had_position, &result.info.closed_trade) {
            assert!((result.info.equity - (equity + trade.pnl)).abs() < 1e-9);
        }
        equity = result.info.equity;
        assert!(result.info.max_drawdown >= result.info.drawdown - 1e-12);

        if result.done || result.truncated {
            break;
        }
        assert!(steps < 10_000, "episode never ended");
    }
    assert!(env.state().position.is_none());
    assert_eq!(env.num_trades(), env.state().trades.len());
}

#[test]
fn episodes_from_the_same_seed_match() {
    let run = |seed| {
        let mut env = environment(seed);
        let mut rng = StdRng::seed_from_u64(99);
        env.reset().unwrap();
        let mut rewards = Vec::new();
        loop {
            let result = env.step(&random_action(&mut rng)).unwrap();
            rewards.push(result.reward);
            if result.done || result.truncated {
                break;
            }
        }
        (rewards, env.state().equity)
    };
    assert_eq!(run(21), run(21));
}

#[test]
fn model_drives_an_episode() {
    let mut env = environment(5);
    let config = ModelConfig::default();
    let model = RecurrentPolicyValueModel::new(&config, &mut StdRng::seed_from_u64(6)).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let mut observation = env.reset().unwrap();
    for _ in 0..25 {
        let output = model.forward_pass(&observation, false, &mut rng).unwrap();
        assert!(output.log_probs.total().is_finite());
        let result = env.step(&output.action).unwrap();
        observation = result.observation;
        if result.done {
            break;
        }
    }
    assert_eq!(observation.len(), config.sequence_length);
}

#[test]
fn daily_loss_breach_triggers_cooldown() {
    let env_config = EnvironmentConfig {
        daily_loss_cap: 0.06,
        ..EnvironmentConfig::default()
    };
    let mut risk = RiskLimitManager::new(RiskLimits::from(&env_config));
    let violation = risk
        .check_limits(&RiskSnapshot {
            equity: 10_000.0,
            daily_pnl: -650.0,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(violation.kind, ViolationKind::DailyLossCap);
    assert!(violation.is_critical());

    let response = risk.handle_risk_breach(&violation);
    assert!(response.force_flatten);
    assert_eq!(response.cooldown_bars, 20);
    assert_eq!(response.penalty, -1.0);

    let (filtered, overridden) = risk.filter_action(&HybridAction::new(Direction::Long, 0.0, 1.0, 1.0));
    assert!(overridden);
    assert_eq!(filtered.direction, Direction::Hold);
}

#[test]
fn extreme_volatility_masks_both_directions() {
    let mut features = StructuralFeatures::neutral(100.0);
    features.vol_regime = 2;
    let mask = ActionMasker::default().compute_mask(&features);
    assert!(!mask.can_trade_long);
    assert!(!mask.can_trade_short);
    assert_eq!(mask.reason, MaskReason::ExtremeVolatility);
}

#[test]
fn stop_loss_example() {
    let sl = compute_stop_loss(Direction::Long, 100.0, 2.0, Some(98.0), 1.0);
    assert!((sl - 96.0).abs() < 1e-9);
}

#[test]
fn reward_validation_is_idempotent() {
    for raw in [f64::NAN, f64::INFINITY, -1e9, 3.5, 250.0] {
        let once = validate_reward(raw);
        assert!(once.is_finite());
        assert!(once.abs() <= REWARD_BOUND);
        assert_eq!(validate_reward(once), once);
    }
}
