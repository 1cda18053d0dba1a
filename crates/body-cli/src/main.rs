//! body: command-line interface for body measurement and shape fitting.
//!
//! This tool exposes body-measure and beta-fit from the command line, for
//! measuring single meshes, running batch fits and calibrating the hip band.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=beta_fit=info` - Per-prototype and batch logging
//! - `RUST_LOG=body_measure=debug` - Slice and component detail
//! - `RUST_LOG=body_measure::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Measure one mesh
//! body measure body.json --group
//!
//! # Fit ten development targets with progress logging
//! body -v fit --out-dir runs/dev --k 10 --mesh-provider torso
//!
//! # Calibrate the hip band on that run
//! body sweep --run-dir runs/dev --mesh-provider torso
//! ```

use std::path::PathBuf;

use anyhow::Result;
use beta_fit::ProviderKind;
use body_measure::{HipBandId, HipMethod, MeasurementKey};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{determinism, fit, hip_ab, measure, sweep};

/// body - Body circumference measurement and shape fitting.
///
/// Measure bust, waist and hip circumferences on body meshes and fit shape
/// parameters to circumference targets.
#[derive(Parser)]
#[command(name = "body")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Provider selection shared by the fitting and calibration commands.
#[derive(clap::Args, Clone)]
pub struct ProviderArgs {
    /// Mesh provider (scaled or torso)
    #[arg(long, default_value = "scaled")]
    mesh_provider: ProviderKind,

    /// Seed for provider jitter
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Base vertex file for the scaled provider
    #[arg(long)]
    base_verts: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure circumferences on a vertex file
    Measure {
        /// Input vertex file (JSON)
        input: PathBuf,

        /// Keys to measure (default: all)
        #[arg(long = "key")]
        keys: Vec<MeasurementKey>,

        /// Force a named hip band (A, B, C, D, E, B_high)
        #[arg(long, conflicts_with = "hip_method")]
        hip_band: Option<HipBandId>,

        /// Force a hip method (world_y_band, pelvis_frame_band)
        #[arg(long)]
        hip_method: Option<HipMethod>,

        /// Measure all keys from one shared preparation pass
        #[arg(long)]
        group: bool,

        /// Case id used in logs
        #[arg(long, default_value = "case")]
        case_id: String,

        /// Include the slice debug record for each key
        #[arg(long)]
        debug: bool,
    },

    /// Fit shape parameters for a batch of targets
    Fit {
        /// Run directory to write
        #[arg(long)]
        out_dir: PathBuf,

        /// Centroids file with target vectors (default: development targets)
        #[arg(long)]
        centroids_json: Option<PathBuf>,

        /// Number of prototypes
        #[arg(long, default_value = "10")]
        k: usize,

        /// Maximum objective evaluations per prototype
        #[arg(long, default_value = "200")]
        max_iter: usize,

        /// Pose id passed to the provider
        #[arg(long, default_value = beta_fit::DEFAULT_POSE_ID)]
        pose_id: String,

        /// Comma-separated keys to fit (default: all)
        #[arg(long, value_delimiter = ',')]
        keys: Vec<MeasurementKey>,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Reuse existing fit_result.json files
        #[arg(long)]
        resume: bool,

        /// Stop gracefully after this many seconds (0 = no limit)
        #[arg(long, default_value = "0")]
        time_budget_sec: u64,

        /// Recorded only; prototypes are fitted one at a time
        #[arg(long, default_value = "1")]
        batch_size: usize,
    },

    /// Sweep the named hip bands over the worst hip prototypes of a run
    Sweep {
        /// Run directory produced by `body fit`
        #[arg(long)]
        run_dir: PathBuf,

        /// Eval set size
        #[arg(long, default_value = "40")]
        n: usize,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Compare two hip methods on a run's hip eval set
    HipAb {
        /// Run directory with artifacts/eval_sets/hip_topN_ids.json
        #[arg(long)]
        run_dir: PathBuf,

        /// Method A
        #[arg(long, default_value = "world_y_band")]
        method_a: HipMethod,

        /// Method B
        #[arg(long, default_value = "pelvis_frame_band")]
        method_b: HipMethod,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Byte-compare prototype results of two runs
    Determinism {
        /// First run directory (receives determinism_check.json)
        #[arg(long)]
        run_dir_1: PathBuf,

        /// Second run directory
        #[arg(long)]
        run_dir_2: PathBuf,

        /// Number of prototypes to compare, from p0000
        #[arg(long, default_value = "10")]
        subset_size: usize,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "beta_fit=info,body_measure=info",
            2 => "beta_fit=debug,body_measure=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn print_error(e: &anyhow::Error) {
    if let Some(fit_err) = e.downcast_ref::<beta_fit::FitError>() {
        eprintln!("{}: {}", "Error".red().bold(), fit_err);
        eprintln!("  {}: {}", "Code".cyan(), fit_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            fit_err.recovery_suggestion()
        );
    } else if let Some(measure_err) = e.downcast_ref::<body_measure::MeasureError>() {
        eprintln!("{}: {}", "Error".red().bold(), measure_err);
        eprintln!("  {}: {}", "Code".cyan(), measure_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            measure_err.recovery_suggestion()
        );
        if let Some(location) = measure_err.location() {
            eprintln!("  {}: {}", "Location".yellow(), location);
        }
    } else {
        eprintln!("{}: {}", "Error".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("  {}: {}", "Caused by".yellow(), cause);
        }
    }
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Measure {
            input,
            keys,
            hip_band,
            hip_method,
            group,
            case_id,
            debug,
        } => measure::run(
            input,
            &measure::MeasureArgs {
                keys: keys.clone(),
                hip_band: *hip_band,
                hip_method: *hip_method,
                group: *group,
                case_id: case_id.clone(),
                debug: *debug,
            },
            &cli,
        ),
        Commands::Fit {
            out_dir,
            centroids_json,
            k,
            max_iter,
            pose_id,
            keys,
            provider,
            resume,
            time_budget_sec,
            batch_size,
        } => fit::run(
            &fit::FitArgs {
                out_dir: out_dir.clone(),
                centroids_json: centroids_json.clone(),
                k: *k,
                max_iter: *max_iter,
                pose_id: pose_id.clone(),
                keys: keys.clone(),
                resume: *resume,
                time_budget_sec: *time_budget_sec,
                batch_size: *batch_size,
            },
            provider,
            &cli,
        ),
        Commands::Sweep {
            run_dir,
            n,
            provider,
        } => sweep::run(run_dir, *n, provider, &cli),
        Commands::HipAb {
            run_dir,
            method_a,
            method_b,
            provider,
        } => hip_ab::run(run_dir, *method_a, *method_b, provider, &cli),
        Commands::Determinism {
            run_dir_1,
            run_dir_2,
            subset_size,
        } => determinism::run(run_dir_1, run_dir_2, *subset_size, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            print_error(e);
        }
        std::process::exit(1);
    }

    Ok(())
}
