use clap::{Parser, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crosstab_builder::config::Config;
use crosstab_builder::core::{CellData, CellKey, Project};
use crosstab_builder::services::heatmap::{self, Metric};
use crosstab_builder::services::{CellLoader, HttpIntersectApi};
use crosstab_builder::state::{Crosstab, RefreshOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Load a crosstab project and print its heatmap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project JSON file
    #[arg(long = "project", value_name = "FILE")]
    project: PathBuf,
    /// Path to a config file (overrides default config discovery)
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Metric to print and colour by
    #[arg(long = "metric", default_value_t = Metric::Size)]
    metric: Metric,
    /// Print the colour legend after the grid
    #[arg(long = "legend")]
    legend: bool,
    /// Enable file logging at the given level (overrides RUST_LOG)
    #[arg(long = "logging", value_enum)]
    logging: Option<LogLevel>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    crosstab_builder::logging::init_with(None, args.logging.map(Into::into))?;

    let config = Config::from_path(args.config.as_ref())?;
    let project = Project::from_path(&args.project)?;
    let api = HttpIntersectApi::new(config.api.session(), config.api.timeout())?;
    let crosstab = Crosstab::new(Arc::new(CellLoader::new(Arc::new(api))));
    crosstab.load_project(&project);

    match crosstab.load_all_cells().await {
        RefreshOutcome::Applied { cells } => info!(cells, "grid loaded"),
        RefreshOutcome::Skipped => {
            println!("{}: nothing to load", project.name);
            return Ok(());
        }
        other => {
            error!(?other, "bulk load did not complete");
            return Err(eyre!("bulk load did not complete: {other:?}"));
        }
    }

    let state = crosstab.snapshot();
    let base = project.load_context().base_id().map(str::to_string);
    let scale = heatmap::calculate_heatmap_scale(&state.cells, args.metric);

    println!("{} ({})", project.name, args.metric);
    for row in &state.rows {
        let cells: Vec<String> = state
            .columns
            .iter()
            .map(|column| {
                let key = CellKey::new(row.id.as_str(), column.id.as_str()).with_base(base.as_deref());
                let label = &column.caption;
                match state.cells.get(&key.cache_key()) {
                    Some(CellData::Success(result)) => {
                        let value = args.metric.value_of(result);
                        let color = heatmap::get_heatmap_color(value, &scale);
                        format!("{label}={value:.2} {}", color.to_hex())
                    }
                    Some(CellData::Failure(message)) => format!("{label}=error ({message})"),
                    _ => format!("{label}=-"),
                }
            })
            .collect();
        println!("{}: {}", row.caption, cells.join(" | "));
    }

    if args.legend {
        for (value, color) in heatmap::legend(&scale) {
            println!("{value:>12.2} {}", color.to_hex());
        }
    }
    Ok(())
}
