//! CamNet Simulator CLI
//!
//! Run a camera network scenario from a JSON file, or a random one.

use camnet_sim::{
    JsonScenarioLoader, RunResult, ScenarioLoader, ScenarioRunner, ScenarioSettings, SimConfig,
    StaticScenarioLoader, StrategyRegistry,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// CamNet camera network simulator
#[derive(Parser, Debug)]
#[command(name = "camnet-sim")]
#[command(about = "Run deterministic camera network simulations", long_about = None)]
struct Args {
    /// Scenario JSON file (random scenario when absent)
    #[arg(short = 'S', long)]
    scenario: Option<PathBuf>,

    /// Cameras in the random scenario
    #[arg(short, long, default_value = "6")]
    cameras: usize,

    /// Targets in the random scenario
    #[arg(short, long, default_value = "4")]
    objects: usize,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Ticks per run
    #[arg(short, long, default_value = "1000")]
    ticks: u64,

    /// Per-tick probability of a random camera failure
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Probability that a failing camera loses its state
    #[arg(long, default_value = "0.5")]
    reset_probability: f64,

    /// Message delay in ticks
    #[arg(long, default_value = "0")]
    delay: u32,

    /// Re-advertise lost targets through the central registry
    #[arg(long)]
    global: bool,

    /// Movement forced onto every target (straight, waypoints, brownian)
    #[arg(long)]
    movement: Option<String>,

    /// Exploration rate of learning cameras
    #[arg(long, default_value = "0.1")]
    epsilon: f64,

    /// Utility weight of the learning reward
    #[arg(long, default_value = "0.5")]
    alpha: f64,

    /// `key = value` parameters applied to every camera node
    #[arg(long)]
    param_file: Option<PathBuf>,

    /// CSV output prefix (writes <prefix>_network.csv and <prefix>_agents.csv)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Export frames to a JSON file for rendering
    #[arg(long)]
    export: Option<PathBuf>,

    /// Ticks between exported frames
    #[arg(long, default_value = "10")]
    export_interval: u64,

    /// Skip the per-tick consistency audit
    #[arg(long)]
    no_audit: bool,

    /// List registered nodes, policies, movements and selectors
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for scripting
    #[arg(long)]
    json: bool,
}

fn config_from(args: &Args, seed: u64) -> SimConfig {
    let mut config = SimConfig::default()
        .with_seed(seed)
        .with_reset_probability(args.reset_probability)
        .with_message_delay(args.delay)
        .with_global_registration(args.global)
        .with_bandit(args.epsilon, args.alpha);
    if let Some(rate) = args.failure_rate {
        config = config.with_failure_rate(rate);
    }
    if let Some(movement) = &args.movement {
        config = config.with_movement(movement.clone());
    }
    if let Some(path) = &args.param_file {
        config = config.with_param_file(path.clone());
    }
    if let Some(prefix) = &args.output {
        config = config.with_output(prefix.clone());
    }
    config
}

fn print_registry() {
    let registry = StrategyRegistry::new();
    println!("nodes:      {}", registry.list_nodes().join(", "));
    println!("policies:   {}", registry.list_comms().join(", "));
    println!("movements:  {}", registry.list_movements().join(", "));
    println!("selectors:  {}", registry.list_selectors().join(", "));
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if args.list {
        print_registry();
        return;
    }

    if !args.json {
        info!("CamNet Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let loader: Box<dyn ScenarioLoader> = match &args.scenario {
        Some(path) => Box::new(JsonScenarioLoader::new(path)),
        None => Box::new(StaticScenarioLoader(ScenarioSettings::random(
            "random",
            args.cameras,
            args.objects,
        ))),
    };

    let mut runner = ScenarioRunner::new(config_from(&args, base_seed), args.ticks).with_audit(!args.no_audit);
    if let Some(path) = &args.export {
        if args.seeds > 1 {
            eprintln!("Error: --export only supports a single seed");
            std::process::exit(1);
        }
        runner = runner.with_export(path, args.export_interval);
    }

    let results: Vec<RunResult> = match runner.run_seeds(loader.as_ref(), args.seeds) {
        Ok(results) => results,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let failed_count = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": results.len(),
            "passed": results.len() - failed_count,
            "failed": failed_count,
            "results": results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        for result in &results {
            if result.passed {
                info!("✓ {} (seed={}) {}", result.scenario, result.seed, result.summary);
            } else {
                error!(
                    "✗ {} (seed={}) {} violations, first: {}",
                    result.scenario,
                    result.seed,
                    result.violations.len(),
                    result.failure_reason().unwrap_or("unknown")
                );
            }
        }
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("All {} runs consistent", results.len());
        } else {
            error!("{}/{} runs had consistency violations", failed_count, results.len());
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
}
