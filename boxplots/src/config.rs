use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::analysis::layout::{BracketGeometry, FigureSize, LayoutOptions};
use crate::analysis::render::{OutputFormat, RenderOptions};
use crate::analysis::scale::ScaleMode;
use crate::helper_functions::resolve_path;
use crate::models::{Condition, EntityGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotMode {
    /// One figure per identifier with all four conditions.
    #[default]
    PerEntity,
    /// One summary figure over every identifier.
    Combined,
}

/// One per-condition replicate table (`ID`, rep1, rep2, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateInput {
    pub condition: Condition,
    pub path: PathBuf,
}

/// Inputs for building the expression and p-value tables before plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    pub replicate_tables: Vec<ReplicateInput>,
    /// One featureCounts table per replicate, named `<condition>_rep<N>.*`.
    /// Used instead of `replicate_tables` when given.
    pub replicate_files: Vec<PathBuf>,
    /// Zero-based column of `replicate_files` holding the TPM value.
    pub value_column: usize,
    /// Comma-separated table with `ID` and `geneName` columns.
    pub names_table: Option<PathBuf>,
    /// DESeq2 result CSVs named `deseq2_<A>_vs_<B>_*.csv`.
    pub comparison_tables: Vec<PathBuf>,
    /// Identifier column of `comparison_tables`; the first column when unset.
    pub id_column: Option<String>,
    pub pvalue_column: String,
    /// Rows whose identifier starts with this prefix are dropped (e.g. `ENSG`).
    pub exclude_prefix: Option<String>,
    /// Written where a comparison table has no row for an identifier.
    pub missing_pvalue: f64,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            replicate_tables: vec![],
            replicate_files: vec![],
            value_column: 7,
            names_table: None,
            comparison_tables: vec![],
            id_column: None,
            pvalue_column: String::from("padj"),
            exclude_prefix: None,
            missing_pvalue: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub expression_table: PathBuf,
    pub pvalue_table: PathBuf,
    /// Identifiers to plot; empty means every identifier of the p-value table.
    pub identifiers: Vec<String>,
    pub mode: PlotMode,
    pub output_dir: PathBuf,
    /// File name (without extension) of the combined figure.
    pub output_basename: String,
    pub formats: Vec<OutputFormat>,
    pub dpi: u32,
    pub scale: ScaleMode,
    pub entity_order: Vec<String>,
    pub sections: Vec<String>,
    pub display_aliases: BTreeMap<String, String>,
    /// Conditions left out of the combined figure.
    pub excluded_conditions: Vec<Condition>,
    pub title: Option<String>,
    pub bracket_geometry: Option<BracketGeometry>,
    pub jitter_seed: u64,
    pub prepare: Option<PrepareConfig>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            expression_table: PathBuf::from("input-data/tpms.tsv"),
            pvalue_table: PathBuf::from("input-data/pvals.tsv"),
            identifiers: vec![],
            mode: PlotMode::PerEntity,
            output_dir: PathBuf::from("figures"),
            output_basename: String::from("combined_summary_boxplot_with_pvalues"),
            formats: vec![OutputFormat::Svg, OutputFormat::Pdf, OutputFormat::Png],
            dpi: 300,
            scale: ScaleMode::Auto,
            entity_order: vec![],
            sections: vec![],
            display_aliases: BTreeMap::new(),
            excluded_conditions: vec![Condition::Mock],
            title: None,
            bracket_geometry: None,
            jitter_seed: 42,
            prepare: None,
        }
    }
}

impl PlotConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let config: PlotConfig = serde_json::from_reader(file)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Relative paths resolved against the project root.
    pub fn resolved(mut self) -> Self {
        self.expression_table = resolve_path(&self.expression_table);
        self.pvalue_table = resolve_path(&self.pvalue_table);
        self.output_dir = resolve_path(&self.output_dir);
        if let Some(prepare) = self.prepare.as_mut() {
            for input in &mut prepare.replicate_tables {
                input.path = resolve_path(&input.path);
            }
            prepare.replicate_files = prepare.replicate_files.iter().map(|p| resolve_path(p)).collect();
            prepare.names_table = prepare.names_table.as_deref().map(resolve_path);
            prepare.comparison_tables = prepare.comparison_tables.iter().map(|p| resolve_path(p)).collect();
        }
        self
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            formats: self.formats.clone(),
            dpi: self.dpi,
        }
    }

    pub fn per_entity_layout(&self, group: &EntityGroup) -> LayoutOptions {
        let mut options = LayoutOptions::per_entity(group, self.scale, self.jitter_seed);
        if let Some(geometry) = self.bracket_geometry {
            options.geometry = geometry;
        }
        options
    }

    pub fn combined_layout(&self) -> LayoutOptions {
        LayoutOptions {
            title: self
                .title
                .clone()
                .unwrap_or_else(|| String::from("Summary Boxplot of All Genes")),
            scale: self.scale,
            conditions: Condition::ALL
                .into_iter()
                .filter(|c| !self.excluded_conditions.contains(c))
                .collect(),
            entity_order: self.entity_order.clone(),
            sections: self.sections.clone(),
            aliases: self.display_aliases.clone(),
            geometry: self.bracket_geometry.unwrap_or_else(BracketGeometry::combined),
            size: FigureSize::combined(),
            show_legend: true,
            jitter_seed: self.jitter_seed,
        }
    }
}
