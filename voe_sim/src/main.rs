//! VOE Scene Simulator CLI
//!
//! Run synthetic scenarios or replay recorded scenes through the engine.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use voe_sim::scenarios::ScenarioId;
use voe_sim::{find_scenes, PredictorKind, ScenarioResult, ScenarioRunner, SceneFile, SimExport};

/// VOE scene simulator
#[derive(Parser, Debug)]
#[command(name = "voe-sim")]
#[command(about = "Run violation-of-expectation scenes and check their verdicts", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (stationary, linear_motion, teleport, vanish, occluded_vanish, late_arrival, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Frames per synthetic scene
    #[arg(short, long, default_value = "30")]
    frames: u64,

    /// Motion model (last_seen, constant_velocity)
    #[arg(short, long, default_value = "last_seen")]
    predictor: PredictorKind,

    /// Per-call predictor timeout in milliseconds
    #[arg(long)]
    predictor_timeout_ms: Option<u64>,

    /// Replay recorded scene files from this file or directory instead
    #[arg(long)]
    path: Option<PathBuf>,

    /// Only replay scene files whose name contains this
    #[arg(long)]
    filter: Option<String>,

    /// Skip scene files whose name contains this
    #[arg(long)]
    exclude: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-frame results of a single scene to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn replay_scenes(args: &Args, runner: &ScenarioRunner, path: &Path) -> Vec<ScenarioResult> {
    let files = find_scenes(path, args.filter.as_deref(), args.exclude.as_deref())
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        });

    if files.is_empty() {
        error!("No scene files matched under {}", path.display());
    }

    files
        .iter()
        .map(|file| match SceneFile::load(file) {
            Ok(scene) => runner.replay(&scene),
            Err(e) => {
                error!("✗ {}", e);
                ScenarioResult {
                    scenario: file.display().to_string(),
                    seed: runner.seed(),
                    passed: false,
                    total_frames: 0,
                    verdict: None,
                    expected: None,
                    failure_reason: Some(e.to_string()),
                    metrics: Default::default(),
                    frames: Vec::new(),
                }
            }
        })
        .collect()
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the flags
    let level = match (args.json, args.verbose) {
        (true, _) => "warn",
        (false, true) => "debug",
        (false, false) => "info",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("VOE Scene Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: {}, all",
                ScenarioId::all()
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let build_runner = |seed: u64| {
        let runner = ScenarioRunner::new(seed)
            .with_frames(args.frames)
            .with_predictor(args.predictor);
        match args.predictor_timeout_ms {
            Some(ms) => runner.with_predictor_timeout(Duration::from_millis(ms)),
            None => runner,
        }
    };

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();

    if let Some(path) = &args.path {
        all_results = replay_scenes(&args, &build_runner(base_seed), path);
    } else {
        for seed_offset in 0..args.seeds {
            let seed = base_seed.wrapping_add(seed_offset as u64);
            let runner = build_runner(seed);
            for scenario in &scenarios {
                all_results.push(runner.run(*scenario));
            }
        }
    }

    // Handle --export for a single run
    if let Some(export_path) = &args.export {
        if all_results.len() != 1 {
            eprintln!("Error: --export needs exactly one scene, got {}", all_results.len());
            std::process::exit(1);
        }

        let export = SimExport::from_result(&all_results[0], args.predictor.name());
        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
        } else if !args.json {
            info!("Exported {} frames to {}", export.frames.len(), export_path);
        }
    }

    if !args.json {
        for result in &all_results {
            if result.passed {
                info!("✓ {} (seed={}) PASSED", result.scenario, result.seed);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    result.scenario,
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "predictor": args.predictor.name(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario,
                    "seed": r.seed,
                    "passed": r.passed,
                    "frames": r.total_frames,
                    "verdict": r.verdict,
                    "expected": r.expected,
                    "frames_with_violations": r.metrics.frames_with_violations,
                    "undeterminable_frames": r.metrics.undeterminable_frames,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scene runs passed!", total);
        } else {
            error!("❌ {}/{} scene runs failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
