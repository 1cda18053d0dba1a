//! body measure command - measure circumferences on one vertex file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use body_measure::{
    HipBandId, HipMethod, MeasureConfig, MeasurementKey, MeasurementResult, SliceDebugRecord,
    WarningCode, load_vertices, measure, measure_group,
};
use colored::Colorize;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

pub struct MeasureArgs {
    pub keys: Vec<MeasurementKey>,
    pub hip_band: Option<HipBandId>,
    pub hip_method: Option<HipMethod>,
    pub group: bool,
    pub case_id: String,
    pub debug: bool,
}

#[derive(Serialize)]
struct KeyResult {
    value_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_reason: Option<String>,
    warnings: Vec<WarningCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slice_debug: Option<SliceDebugRecord>,
}

#[derive(Serialize)]
struct MeasureReport {
    input: String,
    case_id: String,
    vertices: usize,
    hip_method: HipMethod,
    results: BTreeMap<MeasurementKey, KeyResult>,
}

fn key_result(result: &MeasurementResult, debug: bool) -> KeyResult {
    KeyResult {
        value_m: result.value(),
        missing_reason: result
            .value_m
            .missing_reason()
            .map(|reason| format!("{:?}", reason)),
        warnings: result.warnings().to_vec(),
        slice_debug: debug.then(|| result.slice_debug().clone()),
    }
}

pub fn run(input: &Path, args: &MeasureArgs, cli: &Cli) -> Result<()> {
    let verts = load_vertices(input)
        .with_context(|| format!("Failed to load vertices from {:?}", input))?;

    let mut config = MeasureConfig::default();
    if let Some(method) = args.hip_method {
        config = config.with_hip_method(method);
    }
    if let Some(id) = args.hip_band {
        config = config.with_hip_band(id);
    }

    let keys: Vec<MeasurementKey> = if args.keys.is_empty() {
        MeasurementKey::ALL.to_vec()
    } else {
        args.keys.clone()
    };

    let results: BTreeMap<MeasurementKey, KeyResult> = if args.group {
        measure_group(&verts, &args.case_id, &config)
            .into_iter()
            .filter(|(key, _)| keys.contains(key))
            .map(|(key, result)| (key, key_result(&result, args.debug)))
            .collect()
    } else {
        keys.iter()
            .map(|&key| (key, key_result(&measure(&verts, key, &config), args.debug)))
            .collect()
    };

    let report = MeasureReport {
        input: input.display().to_string(),
        case_id: args.case_id.clone(),
        vertices: verts.len(),
        hip_method: config.hip.method(),
        results,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Circumferences".bold().underline());
                println!("  {}: {}", "File".cyan(), report.input);
                println!("  {}: {}", "Vertices".cyan(), report.vertices);
                println!("  {}: {}", "Hip method".cyan(), report.hip_method);
                for (key, result) in &report.results {
                    let value = match (result.value_m, &result.missing_reason) {
                        (Some(v), _) => format!("{:.4} m", v),
                        (None, Some(reason)) => format!("missing ({})", reason).yellow().to_string(),
                        (None, None) => "missing".yellow().to_string(),
                    };
                    println!("  {}: {}", key.as_str().cyan(), value);
                    if !result.warnings.is_empty() {
                        let names: Vec<&str> = result.warnings.iter().map(|w| w.as_str()).collect();
                        println!("    {}: {}", "Warnings".yellow(), names.join(", "));
                    }
                    if let Some(ref debug) = result.slice_debug {
                        println!(
                            "    {}: y={:?} raw={} deduped={} component={} hull_ok={}",
                            "Slice".cyan(),
                            debug.y_range,
                            debug.n_points_raw,
                            debug.n_points_deduped,
                            debug.component_mode,
                            debug.hull_ok
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
