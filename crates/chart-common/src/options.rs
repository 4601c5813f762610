//! Presentation parameters for a render request.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chart::is_css_safe_color;
use crate::error::{ChartError, ChartResult};

pub const MIN_DIMENSION: u32 = 100;
pub const MAX_DIMENSION: u32 = 4000;
pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Visual theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Custom,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "custom" => Some(Theme::Custom),
            _ => None,
        }
    }

    /// Page background used when the caller does not supply one.
    pub fn default_background(&self) -> &'static str {
        match self {
            Theme::Light | Theme::Custom => "#ffffff",
            Theme::Dark => "#1a1a1a",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

/// Size, theme, title and background of a rendered chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub theme: Theme,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            theme: Theme::default(),
            title: None,
            background_color: None,
        }
    }
}

impl RenderOptions {
    pub fn new(width: u32, height: u32, theme: Theme) -> Self {
        Self {
            width,
            height,
            theme,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    /// Background color after theme defaulting.
    pub fn resolved_background(&self) -> &str {
        self.background_color
            .as_deref()
            .unwrap_or_else(|| self.theme.default_background())
    }

    /// Title to display, if any. Blank titles count as absent.
    pub fn display_title(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Copy with every defaultable field made explicit, so that an explicit
    /// default and an omitted field describe the same render.
    pub fn normalized(&self) -> RenderOptions {
        RenderOptions {
            width: self.width,
            height: self.height,
            theme: self.theme,
            title: self.display_title().map(str::to_string),
            background_color: Some(self.resolved_background().to_string()),
        }
    }

    pub fn validate(&self) -> ChartResult<()> {
        for (param, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(ChartError::invalid(
                    param,
                    format!(
                        "{} is outside the allowed range {}-{}",
                        value, MIN_DIMENSION, MAX_DIMENSION
                    ),
                ));
            }
        }

        if let Some(color) = &self.background_color {
            if !is_css_safe_color(color) {
                return Err(ChartError::invalid(
                    "backgroundColor",
                    format!("unsupported color value '{}'", color),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let opts: RenderOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, RenderOptions::default());
        assert_eq!(opts.width, 800);
        assert_eq!(opts.height, 600);
        assert_eq!(opts.theme, Theme::Light);
    }

    #[test]
    fn test_background_defaults_per_theme() {
        assert_eq!(RenderOptions::default().resolved_background(), "#ffffff");
        let dark = RenderOptions::new(800, 600, Theme::Dark);
        assert_eq!(dark.resolved_background(), "#1a1a1a");
        let custom = dark.with_background("#123456");
        assert_eq!(custom.resolved_background(), "#123456");
    }

    #[test]
    fn test_blank_title_is_absent() {
        let opts = RenderOptions::default().with_title("   ");
        assert_eq!(opts.display_title(), None);
        let opts = RenderOptions::default().with_title(" Revenue ");
        assert_eq!(opts.display_title(), Some("Revenue"));
    }

    #[test]
    fn test_normalized_makes_defaults_explicit() {
        let implicit = RenderOptions::default();
        let explicit = RenderOptions::default().with_background("#ffffff");
        assert_eq!(implicit.normalized(), explicit.normalized());
    }

    #[test]
    fn test_dimension_bounds() {
        assert!(RenderOptions::new(100, 4000, Theme::Light).validate().is_ok());
        assert!(RenderOptions::new(99, 600, Theme::Light).validate().is_err());
        assert!(RenderOptions::new(800, 4001, Theme::Light).validate().is_err());
    }

    #[test]
    fn test_theme_parse() {
        assert_eq!(Theme::parse("DARK"), Some(Theme::Dark));
        assert_eq!(Theme::parse("sepia"), None);
    }
}
