//! ApexCoach CLI
//!
//! Analyse a telemetry capture into a coaching payload, or import the
//! landmarks dataset snapshot into the track store.

use apexcoach_analyzer::{Analyzer, AnalyzerOptions};
use apexcoach_core::error::AnalysisError;
use apexcoach_core::model::CoachingPayload;
use apexcoach_telemetry::corners::DetectionPreset;
use apexcoach_track::{LandmarkSeeder, TrackStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "apexcoach")]
#[command(about = "Telemetry analysis core for racing coaching", version)]
struct Cli {
    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a capture file and emit the coaching payload
    Analyse {
        /// Path to the binary telemetry capture
        capture: PathBuf,

        /// Track store database (corner naming is skipped without it)
        #[arg(long, env = "APEXCOACH_DB")]
        db: Option<PathBuf>,

        /// Landmarks dataset snapshot for lazy corner-name seeding
        #[arg(long, env = "APEXCOACH_LANDMARKS")]
        landmarks: Option<PathBuf>,

        /// Detection preset override: road, street or oval
        #[arg(long)]
        preset: Option<String>,
    },

    /// Import a landmarks dataset snapshot into the track store
    Seed {
        /// Track store database
        #[arg(long, env = "APEXCOACH_DB")]
        db: PathBuf,

        /// Landmarks dataset snapshot
        #[arg(long, env = "APEXCOACH_LANDMARKS")]
        landmarks: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(tag = err.tag(), "{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<(), AnalysisError> {
    match cli.command {
        Commands::Analyse {
            capture,
            db,
            landmarks,
            preset,
        } => {
            let preset = preset
                .as_deref()
                .map(|p| {
                    p.parse::<DetectionPreset>()
                        .map_err(AnalysisError::Internal)
                })
                .transpose()?;

            let store = match db {
                Some(path) => Some(TrackStore::open(&path)?),
                None => None,
            };

            let analyzer = Analyzer::new(AnalyzerOptions {
                preset,
                landmarks_path: landmarks,
                ..AnalyzerOptions::default()
            });
            let payload = analyzer.analyse(&capture, store.as_ref(), &CancellationToken::new())?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .map_err(|e| AnalysisError::internal(e.to_string()))?
                );
            } else {
                print_summary(&payload);
            }
            Ok(())
        }
        Commands::Seed { db, landmarks } => {
            let store = TrackStore::open(&db)?;
            let snapshot = LandmarkSeeder::load_snapshot(&landmarks)?;
            let report = LandmarkSeeder::new(&store).seed_all(&snapshot)?;
            info!(
                seeded = report.seeded.len(),
                skipped = report.skipped.len(),
                "seed finished"
            );
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "seeded": report.seeded,
                        "skipped": report.skipped.len(),
                    })
                );
            }
            Ok(())
        }
    }
}

fn print_summary(payload: &CoachingPayload) {
    println!(
        "{} — {} ({} laps analysed)",
        payload.session.track_name,
        payload.session.car_name,
        payload.lap_times.len()
    );
    println!(
        "reference lap {}: {:.3}s   theoretical best: {:.3}s (gap {:.3}s)",
        payload.reference_lap.lap_number,
        payload.reference_lap.lap_time_s,
        payload.theoretical_best.theoretical_time_s,
        payload.theoretical_best.gap_s
    );
    if payload.priority_corners.is_empty() {
        println!("no priority corners: candidate and reference laps are within noise");
        return;
    }
    println!("priority corners:");
    for pc in &payload.priority_corners {
        let name = pc
            .corner_name
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default();
        println!(
            "  #{}{} — {:+.3}s, {}",
            pc.corner_number,
            name,
            pc.time_lost_s,
            match pc.diagnosis {
                apexcoach_core::model::DiagnosisTag::LateBrakeOverSlow => "braking too late, over-slowing",
                apexcoach_core::model::DiagnosisTag::EarlyLift => "lifting early",
                apexcoach_core::model::DiagnosisTag::TightLine => "line too tight",
                apexcoach_core::model::DiagnosisTag::EarlyThrottleLossOfDrive => "early throttle, losing drive",
                apexcoach_core::model::DiagnosisTag::Other => "mixed losses",
            }
        );
    }
}
