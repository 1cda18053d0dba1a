//! body determinism command - byte-compare two runs.

use std::path::Path;

use anyhow::{Context, Result, bail};
use beta_fit::check_determinism;
use colored::Colorize;

use crate::{Cli, OutputFormat, output};

pub fn run(run_dir_1: &Path, run_dir_2: &Path, subset_size: usize, cli: &Cli) -> Result<()> {
    let report = check_determinism(run_dir_1, run_dir_2, subset_size)
        .with_context(|| format!("Determinism check of {:?} failed", run_dir_1))?;

    match cli.format {
        OutputFormat::Json => {
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Determinism Check".bold().underline());
                println!("  {}: {}", "Run 1".cyan(), report.run_dir_1);
                println!("  {}: {}", "Run 2".cyan(), report.run_dir_2);
                println!("  {}: {}", "Compared".cyan(), report.subset_ids.len());
                for mismatch in &report.mismatches {
                    println!(
                        "  {}: {:?}",
                        mismatch.prototype_id.yellow(),
                        mismatch.reason
                    );
                }
                if report.bytes_match {
                    output::success("All results byte-identical", cli.format, cli.quiet);
                }
            }
        }
    }

    if !report.bytes_match {
        bail!(
            "{} of {} prototypes differ between runs",
            report.mismatches.len(),
            report.subset_ids.len()
        );
    }
    Ok(())
}
