use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::layout::build_layout;
use crate::analysis::render::write_figure;
use crate::config::{PlotConfig, PlotMode};
use crate::data_handling::expression_table::{collect_groups, identifiers_in, ComparisonTable, ExpressionTable};
use crate::data_handling::prepare::run_preparation;
use crate::helper_functions::{ensure_exists, resolve_path};
use crate::models::{Dataset, EntityGroup};

mod analysis;
mod config;
mod data_handling;
mod helper_functions;
mod models;

fn load_config() -> anyhow::Result<PlotConfig> {
    match env::args().nth(1) {
        Some(path) => {
            let path = resolve_path(&PathBuf::from(path));
            info!("Using configuration {}", path.display());
            PlotConfig::from_json_file(&path)
        }
        None => {
            info!("No configuration given, using defaults");
            Ok(PlotConfig::default())
        }
    }
}

fn plot_per_entity(config: &PlotConfig, groups: &[EntityGroup]) -> anyhow::Result<usize> {
    let render = config.render_options();
    let mut written = 0;
    for group in groups {
        let options = config.per_entity_layout(group);
        let Some(layout) = build_layout(std::slice::from_ref(group), &options) else {
            warn!("{} ({}) has no values to plot, skipping", group.display_name, group.identifier);
            continue;
        };
        let basename = format!("boxplot.{}", group.file_stem());
        let paths = write_figure(&layout, &config.output_dir, &basename, &render)
            .with_context(|| format!("rendering {}", group.identifier))?;
        written += paths.len();
    }
    Ok(written)
}

fn plot_combined(config: &PlotConfig, groups: &[EntityGroup]) -> anyhow::Result<usize> {
    let options = config.combined_layout();
    let Some(layout) = build_layout(groups, &options) else {
        warn!("No values to plot for the combined figure");
        return Ok(0);
    };
    let paths = write_figure(&layout, &config.output_dir, &config.output_basename, &config.render_options())
        .context("rendering combined figure")?;
    Ok(paths.len())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting boxplot generation");
    let config = load_config()?.resolved();

    if let Some(prepare) = &config.prepare {
        run_preparation(prepare, &config.expression_table, &config.pvalue_table)
            .context("preparing input tables")?;
    }

    ensure_exists(&config.expression_table)?;
    ensure_exists(&config.pvalue_table)?;

    let expression = ExpressionTable { path: config.expression_table.clone() }
        .load()
        .context("loading expression table")?;
    let pvalues = ComparisonTable { path: config.pvalue_table.clone() }
        .load()
        .context("loading p-value table")?;

    let identifiers = if config.identifiers.is_empty() {
        identifiers_in(&pvalues)?
    } else {
        config.identifiers.clone()
    };
    info!("{} identifiers requested, mode {:?}", identifiers.len(), config.mode);

    let groups = collect_groups(&expression, &pvalues, &identifiers)?;

    let written = match config.mode {
        PlotMode::PerEntity => plot_per_entity(&config, &groups)?,
        PlotMode::Combined => plot_combined(&config, &groups)?,
    };
    info!("Wrote {} files to {}", written, config.output_dir.display());
    Ok(())
}
