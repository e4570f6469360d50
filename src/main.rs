use clap::Parser;
use ppo_trader::cli::commands::{self, TrainOptions};
use ppo_trader::cli::{Cli, Commands};
use ppo_trader::config::{AppConfig, LoggingConfig};
use ppo_trader::rl::training::TrainingControl;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", cli.config_dir, e);
            return Err(e.into());
        }
    };
    let mut logging = config.logging.clone();
    logging.json |= cli.json_logs;
    let _guard = init_logging(&logging);

    match cli.command {
        Commands::Train {
            episodes,
            data,
            checkpoint,
            seed,
            rollout_workers,
            workers,
            deadline,
            resume,
            output,
            json,
        } => {
            let opts = TrainOptions {
                episodes,
                data,
                checkpoint,
                seed,
                rollout_workers,
                workers,
                deadline,
                resume,
                output,
                json,
            };
            run_training(config, opts).await?;
        }
        Commands::Eval {
            model,
            data,
            episodes,
            json,
        } => {
            tokio::task::spawn_blocking(move || commands::eval(config, &model, data, episodes, json))
                .await??;
        }
        Commands::Infer {
            model,
            data,
            last,
            json,
        } => {
            commands::infer(config, &model, data, last, json)?;
        }
        Commands::Info { model } => {
            commands::info(&model)?;
        }
        Commands::Synth { bars, seed, output } => {
            commands::synth(&config, bars, seed, &output)?;
        }
    }

    Ok(())
}

/// Train on a blocking task; Ctrl+C stops after the current rollout round
async fn run_training(config: AppConfig, opts: TrainOptions) -> anyhow::Result<()> {
    let control = TrainingControl::new();
    let cancel = control.cancel_handle();

    let mut task = tokio::task::spawn_blocking(move || commands::train(config, &opts, control));

    tokio::select! {
        result = &mut task => return result?,
        _ = shutdown_signal() => {
            warn!("Shutdown requested, finishing the current round...");
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    match task.await? {
        Ok(()) => {
            info!("Training stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!("Training failed after cancellation: {}", e);
            Err(e)
        }
    }
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},ppo_trader=debug", config.level)));

    let stdout = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ppo-trader.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init();
    guard
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
