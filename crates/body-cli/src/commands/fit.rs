//! body fit command - batch shape-parameter fitting.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use beta_fit::{BatchBuilder, FitOptions, Progress, StopReason, dev_targets, load_centroids};
use body_measure::MeasurementKey;
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::commands::build_provider;
use crate::{Cli, OutputFormat, ProviderArgs, output};

pub struct FitArgs {
    pub out_dir: PathBuf,
    pub centroids_json: Option<PathBuf>,
    pub k: usize,
    pub max_iter: usize,
    pub pose_id: String,
    pub keys: Vec<MeasurementKey>,
    pub resume: bool,
    pub time_budget_sec: u64,
    pub batch_size: usize,
}

#[derive(Serialize)]
struct FitRunResult {
    out_dir: String,
    prototypes: usize,
    failures: usize,
    reused: usize,
    unsaved: Vec<String>,
    stopped: Option<&'static str>,
    quality_p50: f64,
    quality_p90: f64,
    quality_min: f64,
    bucket_ok: usize,
    bucket_low: usize,
    elapsed_sec: f64,
}

pub fn run(args: &FitArgs, provider_args: &ProviderArgs, cli: &Cli) -> Result<()> {
    let targets = match &args.centroids_json {
        Some(path) => load_centroids(path, args.k)
            .with_context(|| format!("Failed to load targets from {:?}", path))?,
        None => dev_targets(args.k),
    };
    let provider = build_provider(provider_args)?;

    let mut options = FitOptions::default()
        .with_max_iter(args.max_iter)
        .with_pose_id(args.pose_id.clone());
    if !args.keys.is_empty() {
        options = options.with_keys(args.keys.iter().copied());
    }

    let mut builder = BatchBuilder::new(&args.out_dir, provider)
        .targets(targets)
        .options(options)
        .seed(provider_args.seed)
        .resume(args.resume)
        .time_budget(Duration::from_secs(args.time_budget_sec))
        .batch_size(args.batch_size);

    if cli.verbose > 0 && !cli.quiet {
        builder = builder.with_progress(Box::new(|p: &Progress| {
            info!(
                target: "beta_fit::batch",
                completed = p.completed,
                total = p.total,
                percent = (p.fraction() * 100.0).round() as u32,
                success = p.success,
                failures = p.failures,
                eta_sec = p.estimated_remaining.map_or(0.0, |d| d.as_secs_f64()),
                "{}",
                p.prototype_id
            );
            true
        }));
    }

    let report = builder
        .build()
        .with_context(|| format!("Batch fit into {:?} failed", args.out_dir))?;

    let summary = &report.summary;
    let result = FitRunResult {
        out_dir: report.out_dir.display().to_string(),
        prototypes: report.results.len(),
        failures: summary.failures.count,
        reused: report.skipped_resume.len(),
        unsaved: report.unsaved.clone(),
        stopped: report.stopped.map(|reason| match reason {
            StopReason::TimeBudget => "time_budget",
            StopReason::Cancelled => "cancelled",
        }),
        quality_p50: summary.quality_score_stats.p50,
        quality_p90: summary.quality_score_stats.p90,
        quality_min: summary.quality_score_stats.min,
        bucket_ok: summary.bucket_counts.ok,
        bucket_low: summary.bucket_counts.low,
        elapsed_sec: report.elapsed.as_secs_f64(),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Fitted {} prototypes into {}", result.prototypes, result.out_dir),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {:.2} / {:.2} / {:.2}",
                    "Quality p50/p90/min".cyan(),
                    result.quality_p50,
                    result.quality_p90,
                    result.quality_min
                );
                println!(
                    "  {}: {} / {}",
                    "Bucket OK/LOW".cyan(),
                    result.bucket_ok,
                    result.bucket_low
                );
                for (key, stats) in &summary.residual_cm_stats {
                    println!(
                        "  {}: p50={:.4} p90={:.4} max={:.4} cm",
                        key.as_str().cyan(),
                        stats.p50,
                        stats.p90,
                        stats.max
                    );
                }
                if result.reused > 0 {
                    println!("  {}: {}", "Reused".cyan(), result.reused);
                }
                if result.failures > 0 {
                    output::warning(
                        &format!(
                            "{} fits failed ({})",
                            result.failures,
                            summary.failures.top_error_types.join(", ")
                        ),
                        cli.format,
                        cli.quiet,
                    );
                }
                if !result.unsaved.is_empty() {
                    output::warning(
                        &format!(
                            "Results not written for {} (see artifacts/diagnostics)",
                            result.unsaved.join(", ")
                        ),
                        cli.format,
                        cli.quiet,
                    );
                }
                if let Some(reason) = result.stopped {
                    output::warning(
                        &format!("Stopped early: {}", reason),
                        cli.format,
                        cli.quiet,
                    );
                }
                println!("  {}: {:.1}s", "Elapsed".cyan(), result.elapsed_sec);
            }
        }
    }

    Ok(())
}
