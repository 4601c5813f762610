//! Declarative chart specification: type, labels and data series.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChartError, ChartResult};

/// Largest border width a dataset may request.
pub const MAX_BORDER_WIDTH: u8 = 10;

/// Longest color string accepted in a spec.
pub const MAX_COLOR_LEN: usize = 64;

/// Supported chart types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Doughnut,
    Radar,
    PolarArea,
    Scatter,
    Bubble,
    Mixed,
}

impl ChartType {
    pub const ALL: [ChartType; 9] = [
        ChartType::Line,
        ChartType::Bar,
        ChartType::Pie,
        ChartType::Doughnut,
        ChartType::Radar,
        ChartType::PolarArea,
        ChartType::Scatter,
        ChartType::Bubble,
        ChartType::Mixed,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Doughnut => "doughnut",
            ChartType::Radar => "radar",
            ChartType::PolarArea => "polarArea",
            ChartType::Scatter => "scatter",
            ChartType::Bubble => "bubble",
            ChartType::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dataset series type, only meaningful for mixed charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    Line,
    Bar,
}

impl SeriesType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesType::Line => "line",
            SeriesType::Bar => "bar",
        }
    }
}

/// A single color or one color per data point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Single(String),
    PerPoint(Vec<String>),
}

impl ColorSpec {
    fn colors(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            ColorSpec::Single(c) => std::slice::from_ref(c),
            ColorSpec::PerPoint(cs) => cs,
        };
        slice.iter().map(String::as_str)
    }

    fn validate(&self, param: &str) -> ChartResult<()> {
        for color in self.colors() {
            if !is_css_safe_color(color) {
                return Err(ChartError::invalid(
                    param,
                    format!("unsupported color value '{}'", color),
                ));
            }
        }
        Ok(())
    }
}

/// One data series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub label: String,

    #[serde(rename = "data", alias = "values")]
    pub values: Vec<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<ColorSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<ColorSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_width: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<bool>,

    #[serde(
        rename = "type",
        alias = "seriesType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub series_type: Option<SeriesType>,
}

impl Dataset {
    pub fn new(label: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            values,
            background_color: None,
            border_color: None,
            border_width: None,
            fill: None,
            series_type: None,
        }
    }

    pub fn validate(&self, index: usize) -> ChartResult<()> {
        if let Some(width) = self.border_width {
            if width > MAX_BORDER_WIDTH {
                return Err(ChartError::invalid(
                    format!("datasets[{}].borderWidth", index),
                    format!("must be between 0 and {}", MAX_BORDER_WIDTH),
                ));
            }
        }

        if let Some(pos) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(ChartError::invalid(
                format!("datasets[{}].data[{}]", index, pos),
                "values must be finite numbers",
            ));
        }

        if let Some(color) = &self.background_color {
            color.validate(&format!("datasets[{}].backgroundColor", index))?;
        }
        if let Some(color) = &self.border_color {
            color.validate(&format!("datasets[{}].borderColor", index))?;
        }

        Ok(())
    }
}

/// Labels and datasets of a chart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

impl ChartData {
    pub fn validate(&self) -> ChartResult<()> {
        if self.datasets.is_empty() {
            return Err(ChartError::invalid(
                "datasets",
                "at least one dataset is required",
            ));
        }
        for (i, dataset) in self.datasets.iter().enumerate() {
            dataset.validate(i)?;
        }
        Ok(())
    }
}

/// What to draw. Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub chart_type: ChartType,
    #[serde(flatten)]
    pub data: ChartData,
}

impl ChartSpec {
    pub fn new(chart_type: ChartType, labels: Vec<String>, datasets: Vec<Dataset>) -> Self {
        Self {
            chart_type,
            data: ChartData { labels, datasets },
        }
    }

    pub fn validate(&self) -> ChartResult<()> {
        self.data.validate()
    }
}

/// Whether a color string is limited to characters that cannot escape a
/// CSS declaration or a script literal.
pub fn is_css_safe_color(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_COLOR_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "#(),.% -".contains(c))
}
