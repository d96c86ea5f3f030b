//! `ctflow`: CLI mínima sobre el pipeline estándar.
//!
//! Códigos de salida: 0 ok, 2 uso, 4 fallo parcial / cancelación, 5 error.

use std::path::PathBuf;

use ct_adapters::{ct_raw_inputs, default_readers, load_images, standard_registry, RECONSTRUCTION};
use ct_core::{PipelineOutput, RawInputs, RunStatus};
use ctflow_rust::{synthetic_dataset, AppConfig, AppError, Reconstruction};
use log::debug;
use serde_json::{json, Value};

const USAGE: &str = "Uso:
  ctflow stages
  ctflow run [--synthetic ANGLES,ROWS,COLS | --projections F... --open-beam F... --dark-field F...]
             [--output NAME]... [--set STAGE.KEY=JSON]... [--fail-fast] [--workers N]";

const EXIT_USAGE: i32 = 2;
const EXIT_PARTIAL: i32 = 4;
const EXIT_ERROR: i32 = 5;

#[derive(Debug, Default, PartialEq)]
struct RunArgs {
    synthetic: Option<(usize, usize, usize)>,
    projections: Vec<PathBuf>,
    open_beam: Vec<PathBuf>,
    dark_field: Vec<PathBuf>,
    outputs: Vec<String>,
    overrides: Vec<(String, String, Value)>,
    fail_fast: bool,
    workers: Option<usize>,
}

fn parse_synthetic(spec: &str) -> Result<(usize, usize, usize), String> {
    let dims: Vec<usize> = spec.split(',')
                               .map(|d| d.trim().parse::<usize>())
                               .collect::<Result<_, _>>()
                               .map_err(|_| format!("--synthetic expects ANGLES,ROWS,COLS, got '{spec}'"))?;
    match dims.as_slice() {
        [a, r, c] if *a > 0 && *r > 0 && *c > 0 => Ok((*a, *r, *c)),
        _ => Err(format!("--synthetic expects three positive sizes, got '{spec}'")),
    }
}

/// `STAGE.KEY=JSON`; un valor que no es JSON válido se toma como string.
fn parse_set(spec: &str) -> Result<(String, String, Value), String> {
    let (target, raw) = spec.split_once('=')
                            .ok_or_else(|| format!("--set expects STAGE.KEY=VALUE, got '{spec}'"))?;
    let (stage, key) = target.split_once('.')
                             .filter(|(s, k)| !s.is_empty() && !k.is_empty())
                             .ok_or_else(|| format!("--set expects STAGE.KEY=VALUE, got '{spec}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((stage.to_string(), key.to_string(), value))
}

fn parse_run(args: &[String]) -> Result<RunArgs, String> {
    let mut out = RunArgs::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--fail-fast" => out.fail_fast = true,
            "--synthetic" | "--output" | "--set" | "--workers" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| format!("{flag} needs a value"))?;
                match flag {
                    "--synthetic" => out.synthetic = Some(parse_synthetic(value)?),
                    "--output" => out.outputs.push(value.clone()),
                    "--set" => out.overrides.push(parse_set(value)?),
                    _ => {
                        let n = value.parse::<usize>()
                                     .ok()
                                     .filter(|n| *n > 0)
                                     .ok_or_else(|| format!("--workers expects a positive number, got '{value}'"))?;
                        out.workers = Some(n);
                    }
                }
            }
            "--projections" | "--open-beam" | "--dark-field" => {
                let mut files = Vec::new();
                while let Some(next) = args.get(i + 1).filter(|a| !a.starts_with("--")) {
                    files.push(PathBuf::from(next));
                    i += 1;
                }
                if files.is_empty() {
                    return Err(format!("{flag} needs at least one file"));
                }
                match flag {
                    "--projections" => out.projections.extend(files),
                    "--open-beam" => out.open_beam.extend(files),
                    _ => out.dark_field.extend(files),
                }
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
        i += 1;
    }
    let has_files = !(out.projections.is_empty() && out.open_beam.is_empty() && out.dark_field.is_empty());
    match (out.synthetic.is_some(), has_files) {
        (true, true) => return Err("--synthetic cannot be combined with input files".into()),
        (false, false) => return Err("no input data: use --synthetic or --projections/--open-beam/--dark-field".into()),
        (false, true) if out.projections.is_empty() || out.open_beam.is_empty() || out.dark_field.is_empty() => {
            return Err("--projections, --open-beam and --dark-field are all required".into())
        }
        _ => {}
    }
    if out.outputs.is_empty() {
        out.outputs.push(RECONSTRUCTION.to_string());
    }
    Ok(out)
}

fn load_raw(args: &RunArgs, workers: usize) -> Result<RawInputs, AppError> {
    if let Some((angles, rows, cols)) = args.synthetic {
        return Ok(synthetic_dataset(angles, rows, cols));
    }
    let readers = default_readers();
    Ok(ct_raw_inputs(load_images(&args.projections, &readers, workers)?,
                     load_images(&args.open_beam, &readers, workers)?,
                     load_images(&args.dark_field, &readers, workers)?))
}

fn print_output(output: &PipelineOutput) {
    println!("run {} status {:?}", output.run_id, output.status);
    for d in &output.diagnostics {
        let source = d.cache_source.map(|s| format!("{s:?}")).unwrap_or_else(|| "-".into());
        println!("  [{}] {:<16} {:<10} {:<9} {:>6} ms",
                 d.node_index,
                 d.stage_id,
                 format!("{:?}", d.status),
                 source,
                 d.duration_ms.unwrap_or(0));
        if let Some(e) = &d.error {
            println!("      error: {}", e.error);
        }
        if let Some(up) = &d.failed_upstream {
            println!("      skipped: upstream '{up}' failed");
        }
    }
    for (name, art) in &output.artifacts {
        match art.scalar() {
            Some(v) => println!("  {name} = {v}"),
            None => println!("  {name}: shape {:?} fingerprint {}", art.shape(), art.fingerprint),
        }
    }
}

fn cmd_run(args: &[String]) -> i32 {
    let parsed = match parse_run(args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[ctflow run] {e}\n{USAGE}");
            return EXIT_USAGE;
        }
    };
    let result = (|| -> Result<PipelineOutput, AppError> {
        let mut config = AppConfig::from_env()?;
        if let Some(w) = parsed.workers {
            config.workers = w;
        }
        config.fail_fast |= parsed.fail_fast;
        debug!("config: {config:?}");
        let recon = Reconstruction::from_config(&config)?;
        let raw = load_raw(&parsed, config.workers)?;
        let mut request = recon.request(parsed.outputs.iter().cloned());
        for (stage, key, value) in &parsed.overrides {
            request = request.with_override(stage, json!({ key.as_str(): value }));
        }
        recon.run(&request, &raw)
    })();
    match result {
        Ok(output) => {
            print_output(&output);
            match output.status {
                RunStatus::Completed => 0,
                _ => EXIT_PARTIAL,
            }
        }
        Err(e) => {
            eprintln!("[ctflow run] {e}");
            EXIT_ERROR
        }
    }
}

fn cmd_stages() -> i32 {
    let registry = match standard_registry() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[ctflow stages] {e}");
            return EXIT_ERROR;
        }
    };
    for d in registry.descriptors() {
        println!("{} v{} ({:?})", d.name, d.version, d.parallelism);
        println!("  inputs:  {}", d.inputs.join(", "));
        println!("  outputs: {}", d.outputs.join(", "));
        println!("  params:  {}", d.default_params);
    }
    0
}

fn main() {
    // registros de `log` de las librerías llegan vía tracing-log
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env()
                                                  .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")))
                             .init();
    let args: Vec<String> = std::env::args().collect();
    let code = match args.get(1).map(String::as_str) {
        Some("stages") => cmd_stages(),
        Some("run") => cmd_run(&args[2..]),
        _ => {
            eprintln!("{USAGE}");
            EXIT_USAGE
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn synthetic_run_with_overrides() {
        let parsed = parse_run(&args(&["--synthetic",
                                       "16,2,32",
                                       "--set",
                                       "gamma_filter.threshold=2.5",
                                       "--set",
                                       "reconstruct.filter=shepp-logan",
                                       "--workers",
                                       "3"])).unwrap();
        assert_eq!(parsed.synthetic, Some((16, 2, 32)));
        assert_eq!(parsed.outputs, vec![RECONSTRUCTION]);
        assert_eq!(parsed.overrides[0], ("gamma_filter".into(), "threshold".into(), json!(2.5)));
        assert_eq!(parsed.overrides[1].2, json!("shepp-logan"));
        assert_eq!(parsed.workers, Some(3));
        assert!(!parsed.fail_fast);
    }

    #[test]
    fn file_lists_run_until_next_flag() {
        let parsed = parse_run(&args(&["--projections",
                                       "p1.tif",
                                       "p2.tif",
                                       "--open-beam",
                                       "ob.tif",
                                       "--dark-field",
                                       "df.tif",
                                       "--output",
                                       "volume",
                                       "--fail-fast"])).unwrap();
        assert_eq!(parsed.projections, vec![PathBuf::from("p1.tif"), PathBuf::from("p2.tif")]);
        assert_eq!(parsed.dark_field, vec![PathBuf::from("df.tif")]);
        assert_eq!(parsed.outputs, vec!["volume"]);
        assert!(parsed.fail_fast);
    }

    #[test]
    fn usage_errors() {
        assert!(parse_run(&args(&[])).is_err());
        assert!(parse_run(&args(&["--synthetic", "4,4"])).is_err());
        assert!(parse_run(&args(&["--projections", "p.tif"])).is_err());
        assert!(parse_run(&args(&["--synthetic", "4,4,4", "--workers", "0"])).is_err());
        assert!(parse_run(&args(&["--synthetic", "4,4,4", "--set", "threshold=2"])).is_err());
        assert!(parse_run(&args(&["--synthetic", "4,4,4", "--bogus"])).is_err());
    }
}
