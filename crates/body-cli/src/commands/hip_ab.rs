//! body hip-ab command - compare two hip methods on the hip eval set.

use std::path::Path;

use anyhow::{Context, Result};
use beta_fit::eval_hip_method_ab;
use beta_fit::calibration::MethodStats;
use body_measure::HipMethod;
use colored::Colorize;

use crate::commands::build_provider;
use crate::{Cli, OutputFormat, ProviderArgs, output};

fn print_method(label: &str, method: HipMethod, stats: &MethodStats) {
    println!("  {} ({}):", label.cyan(), method);
    println!(
        "    HIP p50/p90/max|r|: {} / {} / {} cm",
        output::opt(stats.hip_p50_cm, 3),
        output::opt(stats.hip_p90_cm, 3),
        output::opt(stats.hip_max_abs_cm, 3)
    );
    println!(
        "    count={} null={} warnings={}",
        stats.count, stats.null_count, stats.warnings_count
    );
}

pub fn run(
    run_dir: &Path,
    method_a: HipMethod,
    method_b: HipMethod,
    provider_args: &ProviderArgs,
    cli: &Cli,
) -> Result<()> {
    let provider = build_provider(provider_args)?;
    let report = eval_hip_method_ab(run_dir, method_a, method_b, provider.as_ref())
        .with_context(|| format!("Hip method A/B on {:?} failed", run_dir))?;

    match cli.format {
        OutputFormat::Json => {
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Hip Method A/B".bold().underline());
                println!("  {}: {}", "Run".cyan(), run_dir.display());
                println!(
                    "  {}: {}",
                    "Eval set".cyan(),
                    report.eval_set.prototype_ids.len()
                );
                print_method("A", report.method_a, &report.method_a_results);
                print_method("B", report.method_b, &report.method_b_results);
                println!(
                    "  {}: {} cm (|p90| change {} cm)",
                    "Delta p90".cyan(),
                    output::opt(report.delta_p90_cm, 3),
                    output::opt(report.delta_abs_p90_cm, 3)
                );
                println!(
                    "  {}: {}",
                    "Waist/bust unchanged".cyan(),
                    if report.waist_bust_unchanged { "yes" } else { "no" }
                );
                if report.determinism_check.method_b_twice_identical {
                    output::success("Method B repeatable", cli.format, cli.quiet);
                } else {
                    output::warning("Method B differs between two runs", cli.format, cli.quiet);
                }
            }
        }
    }

    Ok(())
}
