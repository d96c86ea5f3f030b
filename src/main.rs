//! Demo: reconstruye el dataset sintético dos veces cambiando sólo el
//! umbral del gamma filter; la segunda corrida reutiliza los stages previos.

use ct_adapters::RECONSTRUCTION;
use ctflow_rust::{synthetic_dataset, AppConfig, AppError, Reconstruction};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn print_run(label: &str, output: &ct_core::PipelineOutput) {
    println!("== {label}: run {} -> {:?}", output.run_id, output.status);
    for d in &output.diagnostics {
        let source = d.cache_source.map(|s| format!("{s:?}")).unwrap_or_else(|| "-".into());
        println!("  {:<16} {:<10} {:<9} {:>6} ms",
                 d.stage_id,
                 format!("{:?}", d.status),
                 source,
                 d.duration_ms.unwrap_or(0));
    }
    if let Some(volume) = output.artifact(RECONSTRUCTION) {
        println!("  reconstruction shape {:?}", volume.shape());
    }
    println!("  cache: {}", serde_json::to_string(&output.cache_stats).unwrap_or_default());
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::global()?;
    let recon = Reconstruction::from_config(config)?;
    let raw = synthetic_dataset(32, 4, 32);

    let first = recon.run(&recon.request([RECONSTRUCTION]), &raw)?;
    print_run("baseline", &first);

    let tuned = recon.request([RECONSTRUCTION]).with_override("gamma_filter", json!({"threshold": 2.5}));
    let second = recon.run(&tuned, &raw)?;
    print_run("gamma_filter.threshold=2.5", &second);
    println!("reused {} of {} stage(s)", second.cache_hits(), second.diagnostics.len());
    Ok(())
}

/// Filtro de logs: `RUST_LOG` si es válido, si no `info` (muestra el
/// avance por stage).
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives.and_then(|d| EnvFilter::try_new(d).ok())
              .unwrap_or_else(|| EnvFilter::new("info"))
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
                             .init();
    if let Err(e) = run() {
        eprintln!("[main-core] {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
