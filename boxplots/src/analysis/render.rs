use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::ranged1d::{Ranged, ValueFormatter};
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters_backend::FontTransform;
use plotters_bitmap::BitMapBackend;
use plotters_svg::SVGBackend;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use svg2pdf::usvg;
use svg2pdf::{ConversionOptions, PageOptions};
use tracing::{debug, info};

use crate::analysis::layout::{dash_segments, jittered_points, FigureLayout};
use crate::analysis::scale::AxisScale;
use crate::models::{polars_err, Condition};

/// SVG user units per inch; raster output is scaled from this by the configured DPI.
const SVG_PX_PER_INCH: f64 = 100.0;
const BOX_HALF_WIDTH: f64 = 0.4;
const JITTER_HALF_WIDTH: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svg,
    /// Vector PDF converted from the SVG rendering.
    Pdf,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub formats: Vec<OutputFormat>,
    pub dpi: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            formats: vec![OutputFormat::Svg, OutputFormat::Pdf, OutputFormat::Png],
            dpi: 300,
        }
    }
}

fn colour_for_condition(condition: Condition) -> RGBAColor {
    match condition {
        Condition::Mock => RGBAColor(255, 255, 255, 1.0),
        Condition::Reassortant => RGBAColor(155, 190, 245, 1.0),
        Condition::Avian => RGBAColor(242, 163, 163, 1.0),
        Condition::Swine => RGBAColor(182, 250, 173, 1.0),
    }
}

const SECTION_SHADES: [RGBColor; 2] = [RGBColor(211, 211, 211), RGBColor(173, 216, 230)];

fn draw_err<E: std::fmt::Display>(e: E) -> PolarsError {
    polars_err(e.to_string().into())
}

fn pixel_size(size_in: (f64, f64), px_per_inch: f64) -> (u32, u32) {
    (
        (size_in.0 * px_per_inch).round() as u32,
        (size_in.1 * px_per_inch).round() as u32,
    )
}

/// SVG rendering of the figure, kept in memory so PDF output can reuse it.
fn svg_document(layout: &FigureLayout) -> PolarsResult<String> {
    let mut document = String::new();
    {
        let root = SVGBackend::with_string(&mut document, pixel_size(layout.size, SVG_PX_PER_INCH))
            .into_drawing_area();
        draw_figure(&root, layout, 1.0)?;
        root.present().map_err(draw_err)?;
    }
    Ok(document)
}

fn svg_to_pdf(document: &str) -> PolarsResult<Vec<u8>> {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_str(document, &options).map_err(draw_err)?;
    let page = PageOptions {
        dpi: SVG_PX_PER_INCH as f32,
        ..PageOptions::default()
    };
    svg2pdf::to_pdf(&tree, ConversionOptions::default(), page).map_err(draw_err)
}

/// Writes the figure once per configured format as `<dir>/<basename>.<ext>`.
pub fn write_figure(
    layout: &FigureLayout,
    output_dir: &Path,
    basename: &str,
    options: &RenderOptions,
) -> PolarsResult<Vec<PathBuf>> {
    create_dir_all(output_dir).map_err(|e| polars_err(Box::new(e)))?;

    let needs_vector = options
        .formats
        .iter()
        .any(|f| matches!(f, OutputFormat::Svg | OutputFormat::Pdf));
    let document = if needs_vector { svg_document(layout)? } else { String::new() };

    let mut written = Vec::with_capacity(options.formats.len());
    for format in &options.formats {
        let path = output_dir.join(format!("{}.{}", basename, format.extension()));
        match format {
            OutputFormat::Svg => {
                fs::write(&path, document.as_bytes()).map_err(|e| polars_err(Box::new(e)))?;
            }
            OutputFormat::Pdf => {
                let pdf = svg_to_pdf(&document)?;
                debug!("{}: {} bytes of PDF", basename, pdf.len());
                fs::write(&path, pdf).map_err(|e| polars_err(Box::new(e)))?;
            }
            OutputFormat::Png => {
                let px_per_inch = options.dpi as f64;
                let root = BitMapBackend::new(&path, pixel_size(layout.size, px_per_inch))
                    .into_drawing_area();
                draw_figure(&root, layout, px_per_inch / SVG_PX_PER_INCH)?;
                root.present().map_err(draw_err)?;
            }
        }
        info!("Saved {}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn draw_figure<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    layout: &FigureLayout,
    scale: f64,
) -> PolarsResult<()> {
    let px = |v: f64| (v * scale).round() as i32;
    root.fill(&WHITE).map_err(draw_err)?;

    let rotate_labels = layout.entity_count() > 1;
    let longest_label = layout
        .categories
        .iter()
        .map(|c| c.label().chars().count())
        .max()
        .unwrap_or(0);
    let x_label_area = if rotate_labels {
        px(7.0 * longest_label as f64 + 15.0)
    } else {
        px(30.0)
    };

    let (x_lo, x_hi) = layout.x_range();
    let (y_lo, y_hi) = layout.y_range;

    let mut builder = ChartBuilder::on(root);
    builder
        .caption(&layout.title, ("sans-serif", px(16.0)))
        .margin(px(10.0))
        .x_label_area_size(x_label_area)
        .y_label_area_size(px(65.0));

    match layout.scale {
        AxisScale::Linear => {
            let mut chart = builder
                .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
                .map_err(draw_err)?;
            draw_chart(&mut chart, layout, scale, rotate_labels)
        }
        AxisScale::Log => {
            let mut chart = builder
                .build_cartesian_2d(x_lo..x_hi, (y_lo..y_hi).log_scale())
                .map_err(draw_err)?;
            draw_chart(&mut chart, layout, scale, rotate_labels)
        }
    }
}

fn draw_chart<'a, DB, Y>(
    chart: &mut ChartContext<'a, DB, Cartesian2d<RangedCoordf64, Y>>,
    layout: &FigureLayout,
    scale: f64,
    rotate_labels: bool,
) -> PolarsResult<()>
where
    DB: DrawingBackend + 'a,
    Y: Ranged<ValueType = f64> + ValueFormatter<f64>,
{
    let px = |v: f64| (v * scale).round() as i32;
    let (y_lo, y_hi) = layout.y_range;

    // Section backgrounds go first so everything else is drawn over them
    for (i, section) in layout.sections.iter().enumerate() {
        let shade = SECTION_SHADES[i % SECTION_SHADES.len()];
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(section.start, y_lo), (section.end, y_hi)],
                shade.mix(0.15).filled(),
            )))
            .map_err(draw_err)?;
    }
    for section in layout.sections.iter().skip(1) {
        let x = section.start;
        chart
            .draw_series(dash_segments(y_lo, y_hi, layout.scale, 40).into_iter().map(|(a, b)| {
                PathElement::new(vec![(x, a), (x, b)], RGBColor(128, 128, 128).stroke_width(px(1.0).max(1) as u32))
            }))
            .map_err(draw_err)?;
    }

    let tick_labels: Vec<String> = layout
        .categories
        .iter()
        .map(|c| if rotate_labels { c.label() } else { c.condition.to_string() })
        .collect();
    let formatter = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() > 1e-6 || idx < 0.0 {
            return String::new();
        }
        tick_labels.get(idx as usize).cloned().unwrap_or_default()
    };
    let x_label_style = if rotate_labels {
        TextStyle::from(("sans-serif", px(11.0))).transform(FontTransform::Rotate270)
    } else {
        TextStyle::from(("sans-serif", px(11.0)))
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .label_style(("sans-serif", px(11.0)))
        .x_labels(layout.categories.len())
        .x_label_formatter(&formatter)
        .x_label_style(x_label_style)
        .y_desc(layout.scale.y_label())
        .axis_desc_style(("sans-serif", px(13.0)))
        .draw()
        .map_err(draw_err)?;

    let line = |width: f64| BLACK.stroke_width(px(width).max(1) as u32);

    for category in &layout.categories {
        let s = &category.summary;
        let x = category.x;
        let (left, right) = (x - BOX_HALF_WIDTH, x + BOX_HALF_WIDTH);
        let (q1, q3) = (layout.to_axis(s.q1), layout.to_axis(s.q3));
        let fill = colour_for_condition(category.condition);

        chart
            .draw_series([
                Rectangle::new([(left, q1), (right, q3)], fill.filled()),
                Rectangle::new([(left, q1), (right, q3)], line(1.0)),
            ])
            .map_err(draw_err)?;

        let (lower, upper) = (layout.to_axis(s.lower_whisker), layout.to_axis(s.upper_whisker));
        let median = layout.to_axis(s.median);
        let cap = BOX_HALF_WIDTH / 2.0;
        chart
            .draw_series([
                PathElement::new(vec![(left, median), (right, median)], line(2.0)),
                PathElement::new(vec![(x, q3), (x, upper)], line(1.0)),
                PathElement::new(vec![(x, q1), (x, lower)], line(1.0)),
                PathElement::new(vec![(x - cap, upper), (x + cap, upper)], line(1.0)),
                PathElement::new(vec![(x - cap, lower), (x + cap, lower)], line(1.0)),
            ])
            .map_err(draw_err)?;
    }

    chart
        .draw_series(
            jittered_points(layout, JITTER_HALF_WIDTH)
                .into_iter()
                .map(|(_, x, y)| Circle::new((x, y), px(2.5), BLACK.filled())),
        )
        .map_err(draw_err)?;

    let centered_bottom = TextStyle::from(("sans-serif", px(9.0)).into_font())
        .pos(Pos::new(HPos::Center, VPos::Bottom));
    for bracket in &layout.brackets {
        chart
            .draw_series(std::iter::once(PathElement::new(bracket.points(), line(1.2))))
            .map_err(draw_err)?;
        chart
            .draw_series(std::iter::once(Text::new(
                bracket.label.clone(),
                (bracket.label_x(), bracket.label_y),
                centered_bottom.clone(),
            )))
            .map_err(draw_err)?;
    }

    let section_style = TextStyle::from(("sans-serif", px(12.0)).into_font())
        .pos(Pos::new(HPos::Center, VPos::Center));
    for section in &layout.sections {
        chart
            .draw_series(std::iter::once(Text::new(
                section.name.clone(),
                ((section.start + section.end) / 2.0, layout.section_label_y()),
                section_style.clone(),
            )))
            .map_err(draw_err)?;
    }

    if layout.show_legend {
        let swatch = px(5.0);
        for condition in layout.conditions() {
            let fill = colour_for_condition(condition);
            let border = BLACK.stroke_width(1);
            chart
                .draw_series(std::iter::empty::<Rectangle<(f64, f64)>>())
                .map_err(draw_err)?
                .label(condition.name())
                .legend(move |(x, y)| {
                    EmptyElement::at((x, y))
                        + Rectangle::new([(0, -swatch), (2 * swatch, swatch)], fill.filled())
                        + Rectangle::new([(0, -swatch), (2 * swatch, swatch)], border)
                });
        }
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", px(11.0)))
            .draw()
            .map_err(draw_err)?;
    }

    Ok(())
}
