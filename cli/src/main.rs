//! `mcmot` CLI: scenario runs, replay, metrics export.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sim::replay::{load_replay, save_replay, ReplayLog};
use sim::scenarios::{Scenario, ScenarioKind};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracker_core::metrics::{FusionMetrics, RunCounters, TruthAssociation};
use tracker_core::{JsonLinesPublisher, ResultPublisher, TrackingConfig, TrackingOrchestrator};

/// IoU for pairing a published box with a ground-truth box.
const TRUTH_MIN_IOU: f64 = 0.3;

#[derive(Parser)]
#[command(name = "mcmot", about = "Multi-camera multi-object tracking coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a named scenario, track it and report metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// JSON tracking configuration (defaults suit the scenario)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write every cycle's result as JSON lines
        #[arg(long)]
        publish: Option<PathBuf>,
        /// Also save the recorded frames as a replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Track a previously recorded replay log.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        publish: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            config,
            output,
            publish,
            save_replay: replay_path,
        } => {
            let scenario = Scenario::build(scenario, seed);
            let config = match config {
                Some(path) => load_config(&path)?,
                None => scenario.tracking_config(),
            };
            println!(
                "Running scenario '{}' (seed={}, {} cameras, {} targets, {} cycles)...",
                scenario.name,
                seed,
                scenario.cameras.len(),
                scenario.targets.len(),
                scenario.n_cycles()
            );
            let log = scenario.record();
            if let Some(path) = replay_path {
                save_replay(&log, &path)?;
                println!("Replay saved to {}", path.display());
            }
            run(&log, config, output.as_deref(), publish.as_deref())?;
        }
        Commands::Replay {
            input,
            config,
            output,
            publish,
        } => {
            let log = load_replay(&input)?;
            let config = match config {
                Some(path) => load_config(&path)?,
                None => TrackingConfig {
                    camera_count: log.camera_count,
                    ..Default::default()
                },
            };
            println!(
                "Replaying '{}' ({} cycles)...",
                log.scenario_name,
                log.batches.len()
            );
            run(&log, config, output.as_deref(), publish.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<TrackingConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = TrackingConfig::from_json(&text)
        .with_context(|| format!("loading config {}", path.display()))?;
    Ok(config)
}

fn run(
    log: &ReplayLog,
    config: TrackingConfig,
    output_path: Option<&Path>,
    publish_path: Option<&Path>,
) -> Result<()> {
    if config.camera_count != log.camera_count {
        bail!(
            "config declares {} cameras but the log has {}",
            config.camera_count,
            log.camera_count
        );
    }
    let mut orchestrator = TrackingOrchestrator::new(config)?;
    let mut publisher = match publish_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating publish file {}", path.display()))?;
            Some(JsonLinesPublisher::new(BufWriter::new(file)))
        }
        None => None,
    };

    let mut counters = RunCounters::default();
    let mut fusion = FusionMetrics::default();
    let start = std::time::Instant::now();

    for (batch, truth) in log.batches.iter().zip(&log.ground_truth) {
        let output = match orchestrator.process(batch) {
            Ok(output) => output,
            Err(e) => {
                warn!(cycle = batch.cycle, error = %e, "cycle aborted");
                counters.record_abort();
                continue;
            }
        };
        counters.record(&output.stats);

        let associations: Vec<TruthAssociation> = output
            .cameras
            .iter()
            .flat_map(|cam| {
                cam.iter().filter_map(move |(bbox, _, identity)| {
                    truth
                        .associate(cam.camera_id, bbox, TRUTH_MIN_IOU)
                        .map(|target_id| TruthAssociation {
                            identity,
                            target_id,
                        })
                })
            })
            .collect();
        fusion.accumulate(&associations);

        if let Some(p) = publisher.as_mut() {
            p.publish(&output)?;
        }
    }

    let elapsed = start.elapsed();
    let (identities, active_identities) = orchestrator
        .correlator()
        .map_or((0, 0), |c| (c.len(), c.active_len()));

    info!(
        cycles = counters.cycles,
        aborted = counters.aborted_cycles,
        identities,
        "run complete"
    );
    println!(
        "Done: {} cycles ({} aborted, {} degraded), elapsed={:.2}s",
        counters.cycles,
        counters.aborted_cycles,
        counters.degraded_cycles,
        elapsed.as_secs_f64()
    );
    println!(
        "Identities: {} in table, {} active, {} ever published",
        identities,
        active_identities,
        fusion.identities_seen()
    );
    println!(
        "Fusion: purity={:.3}, id_switches={}, fragmented={}, churn/cycle={:.3}",
        fusion.purity(),
        fusion.id_switches,
        fusion.fragmented,
        counters.churn_rate()
    );

    if let Some(p) = publisher {
        let published = p.published();
        p.into_inner().flush()?;
        println!("Published {published} cycles");
    }

    if let Some(opath) = output_path {
        let json = json!({
            "scenario": log.scenario_name,
            "seed": log.seed,
            "elapsed_s": elapsed.as_secs_f64(),
            "counters": counters,
            "fusion": fusion,
            "purity": fusion.purity(),
            "identities": identities,
            "active_identities": active_identities,
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Metrics saved to {}", opath.display());
    }

    Ok(())
}
