//! Default styling and the chart-drawing configuration.
//!
//! Everything the document embeds is resolved here, in Rust, so that the
//! drawing library receives a fully explicit configuration: palette colors,
//! border widths, legend and title visibility and per-theme axis colors.
//! Theme and chart-type dispatch are exhaustive matches.

use serde::Serialize;

use chart_common::{ChartSpec, ChartType, ColorSpec, Dataset, RenderOptions, SeriesType, Theme};

/// Series colors for the light and custom themes, cycled by dataset index.
pub const LIGHT_PALETTE: [&str; 6] = [
    "#36A2EB", "#FF6384", "#4BC0C0", "#FF9F40", "#9966FF", "#FFCD56",
];

/// Series colors for the dark theme.
pub const DARK_PALETTE: [&str; 6] = [
    "#4FC3F7", "#F06292", "#81C784", "#FFB74D", "#BA68C8", "#FFF176",
];

pub const DEFAULT_BORDER_WIDTH: u8 = 2;

/// Bubble radius when none is given.
pub const DEFAULT_BUBBLE_RADIUS: f64 = 6.0;

/// Theme-derived colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeStyle {
    pub palette: &'static [&'static str; 6],
    pub text_color: &'static str,
    pub grid_color: &'static str,
}

impl ThemeStyle {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light | Theme::Custom => Self {
                palette: &LIGHT_PALETTE,
                text_color: "#333333",
                grid_color: "#e5e5e5",
            },
            Theme::Dark => Self {
                palette: &DARK_PALETTE,
                text_color: "#e0e0e0",
                grid_color: "#3a3a3a",
            },
        }
    }

    /// Palette entry for a dataset position.
    pub fn series_color(&self, index: usize) -> &'static str {
        self.palette[index % self.palette.len()]
    }
}

/// Axis arrangement used by a chart type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleLayout {
    /// x and y axes.
    Cartesian,
    /// A single `r` scale.
    Radial,
    /// No axes (pie, doughnut).
    None,
}

impl ScaleLayout {
    pub fn for_chart(chart_type: ChartType) -> Self {
        match chart_type {
            ChartType::Line
            | ChartType::Bar
            | ChartType::Scatter
            | ChartType::Bubble
            | ChartType::Mixed => ScaleLayout::Cartesian,
            ChartType::Radar | ChartType::PolarArea => ScaleLayout::Radial,
            ChartType::Pie | ChartType::Doughnut => ScaleLayout::None,
        }
    }
}

/// Chart type as understood by the drawing library. Mixed charts are bar
/// charts whose datasets carry their own type.
pub fn library_chart_type(chart_type: ChartType) -> &'static str {
    match chart_type {
        ChartType::Mixed => "bar",
        other => other.as_str(),
    }
}

// ============================================================================
// Configuration model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartConfig {
    #[serde(rename = "type")]
    pub chart_type: &'static str,
    pub data: ConfigData,
    pub options: ConfigOptions,
}

impl ChartConfig {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigData {
    pub labels: Vec<String>,
    pub datasets: Vec<ResolvedDataset>,
}

/// A dataset with every default filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDataset {
    pub label: String,
    pub data: Vec<DataPoint>,
    pub background_color: ColorSpec,
    pub border_color: ColorSpec,
    pub border_width: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub series_type: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataPoint {
    Value(f64),
    Point { x: f64, y: f64 },
    Bubble { x: f64, y: f64, r: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOptions {
    pub responsive: bool,
    pub animation: bool,
    pub device_pixel_ratio: u8,
    pub plugins: Plugins,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scales: Option<Scales>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plugins {
    pub legend: LegendConfig,
    pub title: TitleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendConfig {
    pub display: bool,
    pub labels: ColorRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleConfig {
    pub display: bool,
    pub text: String,
    pub color: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorRef {
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scales {
    Cartesian { x: AxisConfig, y: AxisConfig },
    Radial { r: RadialAxisConfig },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisConfig {
    pub ticks: ColorRef,
    pub grid: ColorRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadialAxisConfig {
    pub ticks: RadialTicks,
    pub grid: ColorRef,
    pub angle_lines: ColorRef,
    pub point_labels: ColorRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadialTicks {
    pub color: &'static str,
    pub backdrop_color: &'static str,
}

// ============================================================================
// Resolution
// ============================================================================

/// Build the drawing configuration for a spec under the given options.
pub fn resolve_chart_config(spec: &ChartSpec, options: &RenderOptions) -> ChartConfig {
    let style = ThemeStyle::for_theme(options.theme);

    let datasets = spec
        .data
        .datasets
        .iter()
        .enumerate()
        .map(|(index, dataset)| {
            resolve_dataset(spec.chart_type, &spec.data.labels, dataset, index, &style)
        })
        .collect::<Vec<_>>();

    let title = options.display_title();

    ChartConfig {
        chart_type: library_chart_type(spec.chart_type),
        data: ConfigData {
            labels: spec.data.labels.clone(),
            datasets,
        },
        options: ConfigOptions {
            responsive: false,
            animation: false,
            device_pixel_ratio: 1,
            plugins: Plugins {
                legend: LegendConfig {
                    display: spec.data.datasets.len() > 1,
                    labels: ColorRef {
                        color: style.text_color,
                    },
                },
                title: TitleConfig {
                    display: title.is_some(),
                    text: title.unwrap_or_default().to_string(),
                    color: style.text_color,
                },
            },
            scales: scales_for(ScaleLayout::for_chart(spec.chart_type), &style),
        },
    }
}

fn resolve_dataset(
    chart_type: ChartType,
    labels: &[String],
    dataset: &Dataset,
    index: usize,
    style: &ThemeStyle,
) -> ResolvedDataset {
    let background = dataset
        .background_color
        .clone()
        .unwrap_or_else(|| ColorSpec::Single(style.series_color(index).to_string()));
    let border = dataset
        .border_color
        .clone()
        .unwrap_or_else(|| background.clone());

    let series_type = match chart_type {
        ChartType::Mixed => Some(dataset.series_type.unwrap_or(SeriesType::Bar).as_str()),
        _ => None,
    };

    ResolvedDataset {
        label: dataset.label.clone(),
        data: data_points(chart_type, labels, &dataset.values),
        background_color: background,
        border_color: border,
        border_width: dataset.border_width.unwrap_or(DEFAULT_BORDER_WIDTH),
        fill: dataset.fill,
        series_type,
    }
}

/// Scatter and bubble charts need `{x, y}` points. The x coordinate is the
/// label parsed as a number, or the point's index when the label is not one.
fn data_points(chart_type: ChartType, labels: &[String], values: &[f64]) -> Vec<DataPoint> {
    let x_at = |i: usize| {
        labels
            .get(i)
            .and_then(|l| l.trim().parse::<f64>().ok())
            .filter(|x| x.is_finite())
            .unwrap_or(i as f64)
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &y)| match chart_type {
            ChartType::Scatter => DataPoint::Point { x: x_at(i), y },
            ChartType::Bubble => DataPoint::Bubble {
                x: x_at(i),
                y,
                r: DEFAULT_BUBBLE_RADIUS,
            },
            _ => DataPoint::Value(y),
        })
        .collect()
}

fn scales_for(layout: ScaleLayout, style: &ThemeStyle) -> Option<Scales> {
    let text = ColorRef {
        color: style.text_color,
    };
    let grid = ColorRef {
        color: style.grid_color,
    };

    match layout {
        ScaleLayout::Cartesian => Some(Scales::Cartesian {
            x: AxisConfig { ticks: text, grid },
            y: AxisConfig { ticks: text, grid },
        }),
        ScaleLayout::Radial => Some(Scales::Radial {
            r: RadialAxisConfig {
                ticks: RadialTicks {
                    color: style.text_color,
                    backdrop_color: "transparent",
                },
                grid,
                angle_lines: grid,
                point_labels: text,
            },
        }),
        ScaleLayout::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chart_common::Dataset;

    fn spec(chart_type: ChartType, datasets: usize) -> ChartSpec {
        ChartSpec::new(
            chart_type,
            vec!["1".into(), "2".into(), "x".into()],
            (0..datasets)
                .map(|i| Dataset::new(format!("s{}", i), vec![1.0, 2.0, 3.0]))
                .collect(),
        )
    }

    #[test]
    fn test_palette_cycles_modulo_six() {
        let style = ThemeStyle::for_theme(Theme::Light);
        assert_eq!(style.series_color(0), "#36A2EB");
        assert_eq!(style.series_color(6), "#36A2EB");
        assert_eq!(style.series_color(7), "#FF6384");
    }

    #[test]
    fn test_custom_theme_uses_light_colors() {
        assert_eq!(
            ThemeStyle::for_theme(Theme::Custom),
            ThemeStyle::for_theme(Theme::Light)
        );
    }

    #[test]
    fn test_scale_layouts() {
        assert_eq!(ScaleLayout::for_chart(ChartType::Radar), ScaleLayout::Radial);
        assert_eq!(ScaleLayout::for_chart(ChartType::PolarArea), ScaleLayout::Radial);
        assert_eq!(ScaleLayout::for_chart(ChartType::Pie), ScaleLayout::None);
        assert_eq!(ScaleLayout::for_chart(ChartType::Mixed), ScaleLayout::Cartesian);
    }

    #[test]
    fn test_scatter_points_use_numeric_labels_or_index() {
        let config = resolve_chart_config(&spec(ChartType::Scatter, 1), &RenderOptions::default());
        assert_eq!(
            config.data.datasets[0].data,
            vec![
                DataPoint::Point { x: 1.0, y: 1.0 },
                DataPoint::Point { x: 2.0, y: 2.0 },
                DataPoint::Point { x: 2.0, y: 3.0 },
            ]
        );
    }

    #[test]
    fn test_bubble_points_carry_radius() {
        let config = resolve_chart_config(&spec(ChartType::Bubble, 1), &RenderOptions::default());
        assert!(matches!(
            config.data.datasets[0].data[0],
            DataPoint::Bubble { r, .. } if r == DEFAULT_BUBBLE_RADIUS
        ));
    }

    #[test]
    fn test_mixed_chart_defaults_series_to_bar() {
        let mut spec = spec(ChartType::Mixed, 2);
        spec.data.datasets[1].series_type = Some(SeriesType::Line);

        let config = resolve_chart_config(&spec, &RenderOptions::default());
        assert_eq!(config.chart_type, "bar");
        assert_eq!(config.data.datasets[0].series_type, Some("bar"));
        assert_eq!(config.data.datasets[1].series_type, Some("line"));
    }

    #[test]
    fn test_series_type_omitted_outside_mixed() {
        let config = resolve_chart_config(&spec(ChartType::Line, 1), &RenderOptions::default());
        let json = config.to_json().unwrap();
        assert!(!json.contains("\"type\":\"bar\""));
        assert!(json.starts_with("{\"type\":\"line\""));
    }
}
