//! Pure layout of an annotated box-and-strip figure.
//!
//! Everything here works in data coordinates: categories get integer x
//! positions, significance brackets get heights above the data maximum.
//! Drawing is left to [`crate::analysis::render`].

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::scale::{choose_scale, value_extent, AxisScale, ScaleMode};
use crate::analysis::significance::{format_p_value, significance_stars};
use crate::analysis::summary::{summarize, ConditionSummary};
use crate::models::{Condition, EntityGroup};

/// How significance brackets stack above the data.
///
/// Log axes grow multiplicatively (`y_k = base * max * growth^k`), linear axes
/// additively in units of the data range (`y_k = max + (base + k * step) * range`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BracketGeometry {
    pub log_base_factor: f64,
    pub log_growth: f64,
    /// Tick height as a fraction of the bracket's own height.
    pub log_tick_fraction: f64,
    pub linear_base_fraction: f64,
    pub linear_step_fraction: f64,
    /// Tick height as a fraction of the data range.
    pub linear_tick_fraction: f64,
    /// Print `p=<value> (<stars>)` instead of only the stars.
    pub show_p_value: bool,
}

impl BracketGeometry {
    pub fn per_entity() -> Self {
        Self {
            log_base_factor: 1.5,
            log_growth: 2.2,
            log_tick_fraction: 0.15,
            linear_base_fraction: 0.05,
            linear_step_fraction: 0.12,
            linear_tick_fraction: 0.02,
            show_p_value: true,
        }
    }

    pub fn combined() -> Self {
        Self {
            log_base_factor: 1.05,
            log_growth: 1.85,
            log_tick_fraction: 0.05,
            linear_base_fraction: 0.05,
            linear_step_fraction: 0.85,
            linear_tick_fraction: 0.03,
            show_p_value: false,
        }
    }

    /// Whether a bracket's tick always ends below the next offset.
    pub fn is_separated(&self) -> bool {
        1.0 + self.log_tick_fraction < self.log_growth
            && self.linear_tick_fraction < self.linear_step_fraction
    }
}

impl Default for BracketGeometry {
    fn default() -> Self {
        Self::per_entity()
    }
}

/// Figure size in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FigureSize {
    pub min_width: f64,
    pub per_category: f64,
    pub height: f64,
}

impl FigureSize {
    pub fn per_entity() -> Self {
        Self { min_width: 4.0, per_category: 0.0, height: 4.0 }
    }

    pub fn combined() -> Self {
        Self { min_width: 6.0, per_category: 0.4, height: 6.0 }
    }
}

#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub title: String,
    pub scale: ScaleMode,
    /// Conditions drawn for every entity, in display order.
    pub conditions: Vec<Condition>,
    /// Canonical order of entity display names; others follow in input order.
    pub entity_order: Vec<String>,
    /// Display-name prefixes (`mRNA`, `vRNA`) grouping entities into shaded sections.
    pub sections: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub geometry: BracketGeometry,
    pub size: FigureSize,
    pub show_legend: bool,
    pub jitter_seed: u64,
}

impl LayoutOptions {
    /// Single entity, all four conditions, `<name> (<id>)` as title.
    pub fn per_entity(group: &EntityGroup, scale: ScaleMode, jitter_seed: u64) -> Self {
        Self {
            title: format!("{} ({})", group.display_name, group.identifier),
            scale,
            conditions: Condition::ALL.to_vec(),
            entity_order: vec![],
            sections: vec![],
            aliases: BTreeMap::new(),
            geometry: BracketGeometry::per_entity(),
            size: FigureSize::per_entity(),
            show_legend: false,
            jitter_seed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    /// Index of the source group.
    pub entity: usize,
    pub entity_label: String,
    pub condition: Condition,
    pub x: f64,
    pub values: Vec<f64>,
    pub summary: ConditionSummary,
}

impl Category {
    pub fn label(&self) -> String {
        format!("{} {}", self.entity_label, self.condition)
    }
}

/// A significant comparison resolved to x positions, before height assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComparison {
    pub x1: f64,
    pub x2: f64,
    pub p_value: f64,
    pub stars: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bracket {
    pub offset: usize,
    pub x1: f64,
    pub x2: f64,
    pub y: f64,
    pub height: f64,
    pub label: String,
    pub label_y: f64,
}

impl Bracket {
    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    /// Polyline: up from `x1`, across, down to `x2`.
    pub fn points(&self) -> Vec<(f64, f64)> {
        vec![
            (self.x1, self.y),
            (self.x1, self.top()),
            (self.x2, self.top()),
            (self.x2, self.y),
        ]
    }

    pub fn label_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone)]
pub struct FigureLayout {
    pub title: String,
    pub categories: Vec<Category>,
    pub scale: AxisScale,
    pub data_min: f64,
    pub data_max: f64,
    pub y_range: (f64, f64),
    pub brackets: Vec<Bracket>,
    pub sections: Vec<Section>,
    pub show_legend: bool,
    /// Width and height in inches.
    pub size: (f64, f64),
    pub jitter_seed: u64,
}

impl FigureLayout {
    pub fn x_range(&self) -> (f64, f64) {
        (-0.5, self.categories.len() as f64 - 0.5)
    }

    /// Values a log axis cannot show are pinned to its lower limit.
    pub fn to_axis(&self, value: f64) -> f64 {
        match self.scale {
            AxisScale::Log => value.max(self.y_range.0),
            AxisScale::Linear => value,
        }
    }

    pub fn entity_count(&self) -> usize {
        let mut entities: Vec<usize> = self.categories.iter().map(|c| c.entity).collect();
        entities.dedup();
        entities.len()
    }

    /// Height at which section names are written, just below the top of the axis.
    pub fn section_label_y(&self) -> f64 {
        let (lo, hi) = self.y_range;
        match self.scale {
            AxisScale::Log => hi / 1.3,
            AxisScale::Linear => hi - 0.04 * (hi - lo),
        }
    }

    pub fn conditions(&self) -> Vec<Condition> {
        let mut conditions: Vec<Condition> = self.categories.iter().map(|c| c.condition).collect();
        conditions.sort();
        conditions.dedup();
        conditions
    }
}

/// `<section>-<entity>` for every section in turn; the plain order when there are no sections.
pub fn expand_entity_order(sections: &[String], entity_order: &[String]) -> Vec<String> {
    if sections.is_empty() {
        return entity_order.to_vec();
    }
    sections
        .iter()
        .flat_map(|s| entity_order.iter().map(move |e| format!("{}-{}", s, e)))
        .collect()
}

/// Group indices with their (aliased) display labels, in canonical order.
fn ordered_entities(groups: &[EntityGroup], options: &LayoutOptions) -> Vec<(usize, String)> {
    let order = expand_entity_order(&options.sections, &options.entity_order);
    let rank: HashMap<&str, usize> = order.iter().enumerate().map(|(i, e)| (e.as_str(), i)).collect();

    let mut entities: Vec<(usize, String)> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let label = options
                .aliases
                .get(&g.display_name)
                .cloned()
                .unwrap_or_else(|| g.display_name.clone());
            (i, label)
        })
        .collect();
    entities.sort_by_key(|(i, label)| (rank.get(label.as_str()).copied().unwrap_or(order.len()), *i));
    entities
}

fn build_categories(groups: &[EntityGroup], options: &LayoutOptions) -> Vec<Category> {
    let mut categories = Vec::new();
    for (entity, label) in ordered_entities(groups, options) {
        for &condition in &options.conditions {
            let values = groups[entity].values_for(condition);
            let Some(summary) = summarize(&values) else {
                debug!("{} has no {} values", label, condition);
                continue;
            };
            categories.push(Category {
                entity,
                entity_label: label.clone(),
                condition,
                x: categories.len() as f64,
                values,
                summary,
            });
        }
    }
    categories
}

/// Significant comparisons whose two categories are both on the figure.
pub fn resolve_comparisons(groups: &[EntityGroup], categories: &[Category]) -> Vec<ResolvedComparison> {
    let positions: HashMap<(usize, Condition), f64> =
        categories.iter().map(|c| ((c.entity, c.condition), c.x)).collect();

    let mut entities: Vec<usize> = categories.iter().map(|c| c.entity).collect();
    entities.dedup();

    let mut resolved = Vec::new();
    for entity in entities {
        for comparison in &groups[entity].comparisons {
            let Some(stars) = significance_stars(comparison.p_value) else {
                continue;
            };
            let first = positions.get(&(entity, comparison.pair.first));
            let second = positions.get(&(entity, comparison.pair.second));
            match (first, second) {
                (Some(&x1), Some(&x2)) => resolved.push(ResolvedComparison {
                    x1: x1.min(x2),
                    x2: x1.max(x2),
                    p_value: comparison.p_value,
                    stars,
                }),
                _ => debug!(
                    "{}: {}-{} not displayed, dropping annotation",
                    comparison.identifier, comparison.pair.first, comparison.pair.second
                ),
            }
        }
    }
    resolved
}

/// Assigns each comparison the next offset starting at `next_offset`.
/// Returns the brackets and the offset following the last one.
pub fn place_brackets(
    comparisons: &[ResolvedComparison],
    scale: AxisScale,
    data_min: f64,
    data_max: f64,
    geometry: &BracketGeometry,
    next_offset: usize,
) -> (Vec<Bracket>, usize) {
    let range = if data_max > data_min {
        data_max - data_min
    } else {
        data_max.abs().max(1.0)
    };
    let log_floor = data_max.max(f64::MIN_POSITIVE);

    let mut offset = next_offset;
    let mut brackets = Vec::with_capacity(comparisons.len());
    for comparison in comparisons {
        let (y, height) = match scale {
            AxisScale::Log => {
                let y = geometry.log_base_factor * log_floor * geometry.log_growth.powi(offset as i32);
                (y, y * geometry.log_tick_fraction)
            }
            AxisScale::Linear => {
                let y = data_max
                    + (geometry.linear_base_fraction + offset as f64 * geometry.linear_step_fraction) * range;
                (y, geometry.linear_tick_fraction * range)
            }
        };
        let label = if geometry.show_p_value {
            format!("p={} ({})", format_p_value(comparison.p_value), comparison.stars)
        } else {
            comparison.stars.to_string()
        };
        brackets.push(Bracket {
            offset,
            x1: comparison.x1,
            x2: comparison.x2,
            y,
            height,
            label,
            label_y: y + height * 1.05,
        });
        offset += 1;
    }
    (brackets, offset)
}

/// Half the smallest positive value, or 0.05 when nothing is positive.
fn log_lower_limit(categories: &[Category]) -> f64 {
    let smallest_positive = categories
        .iter()
        .flat_map(|c| c.values.iter().copied())
        .filter(|v| *v > 0.0)
        .fold(f64::INFINITY, f64::min);
    if smallest_positive.is_finite() {
        smallest_positive / 2.0
    } else {
        0.05
    }
}

fn y_limits(
    categories: &[Category],
    scale: AxisScale,
    data_min: f64,
    data_max: f64,
    brackets: &[Bracket],
) -> (f64, f64) {
    let highest = brackets.iter().map(|b| b.label_y).fold(data_max, f64::max);
    match scale {
        AxisScale::Log => {
            let lo = log_lower_limit(categories);
            let hi = (highest * 2.0).max(lo * 10.0);
            (lo, hi)
        }
        AxisScale::Linear => {
            let range = if data_max > data_min { data_max - data_min } else { data_max.abs().max(1.0) };
            let headroom = if brackets.is_empty() { 0.05 } else { 0.1 };
            (data_min - 0.05 * range, highest + headroom * range)
        }
    }
}

fn section_spans(categories: &[Category], sections: &[String]) -> Vec<Section> {
    sections
        .iter()
        .filter_map(|name| {
            let prefix = format!("{}-", name);
            let xs: Vec<f64> = categories
                .iter()
                .filter(|c| c.entity_label.starts_with(&prefix))
                .map(|c| c.x)
                .collect();
            let start = xs.iter().copied().reduce(f64::min)?;
            let end = xs.iter().copied().reduce(f64::max)?;
            Some(Section {
                name: name.clone(),
                start: start - 0.5,
                end: end + 0.5,
            })
        })
        .collect()
}

/// Lays out the figure; `None` when no displayed category has any value.
pub fn build_layout(groups: &[EntityGroup], options: &LayoutOptions) -> Option<FigureLayout> {
    let categories = build_categories(groups, options);
    let (data_min, data_max) = value_extent(categories.iter().flat_map(|c| c.values.iter().copied()))?;
    let scale = choose_scale(options.scale, data_min, data_max);
    debug!("Data range {}..{}, {:?} axis", data_min, data_max, scale);

    if !options.geometry.is_separated() {
        warn!("Bracket geometry lets ticks reach the next bracket; annotations may overlap");
    }
    let comparisons = resolve_comparisons(groups, &categories);
    // log brackets stack from the visible part of the axis
    let bracket_base = match scale {
        AxisScale::Log => data_max.max(log_lower_limit(&categories)),
        AxisScale::Linear => data_max,
    };
    let (brackets, next_offset) =
        place_brackets(&comparisons, scale, data_min, bracket_base, &options.geometry, 0);
    debug!("{} significance brackets, next offset {}", brackets.len(), next_offset);

    let y_range = y_limits(&categories, scale, data_min, data_max, &brackets);
    let sections = section_spans(&categories, &options.sections);
    let width = options.size.min_width.max(categories.len() as f64 * options.size.per_category);

    Some(FigureLayout {
        title: options.title.clone(),
        categories,
        scale,
        data_min,
        data_max,
        y_range,
        brackets,
        sections,
        show_legend: options.show_legend,
        size: (width, options.size.height),
        jitter_seed: options.jitter_seed,
    })
}

/// Strip-plot point positions, jittered horizontally with a seeded RNG so
/// the same layout always produces the same figure.
pub fn jittered_points(layout: &FigureLayout, half_width: f64) -> Vec<(Condition, f64, f64)> {
    let mut rng = StdRng::seed_from_u64(layout.jitter_seed);
    layout
        .categories
        .iter()
        .flat_map(|c| c.values.iter().map(move |&v| (c.condition, c.x, v)))
        .map(|(condition, x, v)| (condition, x + rng.gen_range(-half_width..=half_width), layout.to_axis(v)))
        .collect()
}

/// Dash segments along `lo..hi`, evenly spaced in the axis' own scale.
pub fn dash_segments(lo: f64, hi: f64, scale: AxisScale, dashes: usize) -> Vec<(f64, f64)> {
    let (from, to) = match scale {
        AxisScale::Log => (lo.ln(), hi.ln()),
        AxisScale::Linear => (lo, hi),
    };
    let pieces = (dashes * 2).max(1);
    let step = (to - from) / pieces as f64;
    (0..dashes)
        .map(|i| {
            let a = from + (2 * i) as f64 * step;
            let b = a + step;
            match scale {
                AxisScale::Log => (a.exp(), b.exp()),
                AxisScale::Linear => (a, b),
            }
        })
        .collect()
}
