//! body sweep command - hip band sweep over a run's worst hip prototypes.

use std::path::Path;

use anyhow::{Context, Result};
use beta_fit::run_hip_sweep;
use colored::Colorize;

use crate::commands::build_provider;
use crate::{Cli, OutputFormat, ProviderArgs, output};

pub fn run(run_dir: &Path, n: usize, provider_args: &ProviderArgs, cli: &Cli) -> Result<()> {
    let provider = build_provider(provider_args)?;
    let report = run_hip_sweep(run_dir, n, provider.as_ref())
        .with_context(|| format!("Hip sweep on {:?} failed", run_dir))?;

    match cli.format {
        OutputFormat::Json => {
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Hip Band Sweep".bold().underline());
                println!("  {}: {}", "Run".cyan(), run_dir.display());
                println!("  {}: {}", "Eval set".cyan(), report.eval_set_size);
                for (id, stats) in &report.configs {
                    println!(
                        "  {}: p50={} p90={} max|r|={} cm  n={} null={} warnings={}",
                        id.as_str().cyan(),
                        output::opt(stats.hip_p50_cm, 3),
                        output::opt(stats.hip_p90_cm, 3),
                        output::opt(stats.hip_max_cm, 3),
                        stats.count,
                        stats.null_count,
                        stats.warnings_count
                    );
                }
                if let Some((id, p90)) = report.best_config() {
                    output::success(
                        &format!("Best |HIP p90|: {} ({:.3} cm)", id, p90),
                        cli.format,
                        cli.quiet,
                    );
                }
            }
        }
    }

    Ok(())
}
