use anyhow::Result;
use clap::{Parser, Subcommand};
use marketplace_scout::core::config::MonitoringConfig;
use marketplace_scout::core::error::RunError;
use marketplace_scout::core::{logging, Config, HealthChecker};
use marketplace_scout::pipeline::{format_report, RunOutcome, RunReport, Trigger};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "marketplace-scout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watches a classifieds search and alerts on matching listings", long_about = None)]
struct Cli {
    /// Config file (defaults to $SCOUT_CONFIG, then scout.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the pipeline once and print the report
    Run,

    /// Run on an interval until interrupted
    Watch {
        /// Seconds between runs (overrides run.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Serve POST /run and GET /health
    Serve {
        /// Listen port (overrides monitoring.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let loaded = match &cli.config {
        Some(path) => {
            dotenv::dotenv().ok();
            Config::load(path)
        }
        None => Config::from_env(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            let defaults = MonitoringConfig::default();
            logging::init_logging(&defaults.log_level, defaults.log_format);
            let report = RunReport::failed_before_start(&RunError::Config(e));
            eprintln!("{}", format_report(&report));
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(exit_code(&report));
        }
    };
    logging::init_logging(&config.monitoring.log_level, config.monitoring.log_format);

    tracing::info!("🔎 Marketplace scout starting ({:?})", command);
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);
    let health = HealthChecker::new();
    let trigger = Arc::new(Trigger::new(config.clone()).with_health(health.clone()));

    match command {
        Command::Run => {
            let report = trigger.fire().await;
            eprintln!("{}", format_report(&report));
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(exit_code(&report));
        }
        Command::Watch { interval } => {
            watch(trigger, interval.unwrap_or(config.run.interval_secs)).await
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(config.monitoring.port);
            tracing::info!("✅ Trigger endpoint running on port {}", port);
            start_server(trigger, health, port).await;
            Ok(())
        }
    }
}

fn exit_code(report: &RunReport) -> i32 {
    match report.outcome {
        RunOutcome::Success => 0,
        RunOutcome::FatalFailure => 1,
        RunOutcome::PartialFailure => 2,
    }
}

async fn watch(trigger: Arc<Trigger>, interval_secs: u64) -> Result<()> {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = trigger.fire().await;
                tracing::info!("{}", format_report(&report));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("👋 Shutting down");
                return Ok(());
            }
        }
    }
}

async fn start_server(trigger: Arc<Trigger>, health: HealthChecker, port: u16) {
    use warp::http::StatusCode;
    use warp::Filter;

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::any().map(move || health.clone()))
        .and_then(|checker: HealthChecker| async move {
            let status = checker.get_status().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&status))
        });

    let run_route = warp::path("run")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::any().map(move || trigger.clone()))
        .and_then(|trigger: Arc<Trigger>| async move {
            let report = trigger.fire().await;
            let status = if report.outcome == RunOutcome::FatalFailure {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            Ok::<_, warp::Rejection>(warp::reply::with_status(
                warp::reply::json(&report),
                status,
            ))
        });

    warp::serve(health_route.or(run_route))
        .run(([0, 0, 0, 0], port))
        .await;
}
