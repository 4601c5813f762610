//! Self-contained HTML document that draws one chart.
//!
//! The page declares a canvas of exactly the requested size, paints the
//! resolved background, loads the drawing library and inlines the resolved
//! configuration. A tiny plugin flags the canvas once the first frame has
//! been drawn; [`RENDER_MARKER`] matches that flag.

use chart_common::{ChartSpec, RenderOptions};

use crate::style::resolve_chart_config;

/// Selector that matches once the chart has been drawn.
pub const RENDER_MARKER: &str = "canvas#chart[data-rendered=\"true\"]";

/// Generated page plus the numbers the engine needs afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartDocument {
    pub html: String,
    pub width: u32,
    pub height: u32,
}

/// Build the document for a spec.
pub fn build_document(
    spec: &ChartSpec,
    options: &RenderOptions,
    chart_js_url: &str,
) -> Result<ChartDocument, serde_json::Error> {
    let config = resolve_chart_config(spec, options).to_json()?;
    let background = options.resolved_background();
    let (width, height) = (options.width, options.height);

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
html, body {{ margin: 0; padding: 0; background: {background}; overflow: hidden; }}
canvas {{ display: block; }}
</style>
<script src="{script}"></script>
</head>
<body>
<canvas id="chart" width="{width}" height="{height}"></canvas>
<script>
(function () {{
  var config = {config};
  config.plugins = [{{
    id: "renderMarker",
    afterRender: function (chart) {{ chart.canvas.setAttribute("data-rendered", "true"); }}
  }}];
  new Chart(document.getElementById("chart").getContext("2d"), config);
}})();
</script>
</body>
</html>
"#,
        background = background,
        script = escape_attribute(chart_js_url),
        width = width,
        height = height,
        config = escape_script(&config),
    );

    Ok(ChartDocument {
        html,
        width,
        height,
    })
}

/// Keep inline JSON from closing the surrounding script element.
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/").replace("<!--", "<\\!--")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chart_common::{ChartType, Dataset, Theme};

    const URL: &str = "https://cdn.example.test/chart.js";

    fn spec(label: &str) -> ChartSpec {
        ChartSpec::new(
            ChartType::Bar,
            vec!["Jan".into()],
            vec![Dataset::new(label, vec![1.0])],
        )
    }

    #[test]
    fn test_document_declares_surface_and_background() {
        let options = RenderOptions::new(640, 480, Theme::Dark);
        let doc = build_document(&spec("Sales"), &options, URL).unwrap();

        assert_eq!((doc.width, doc.height), (640, 480));
        assert!(doc.html.contains(r#"<canvas id="chart" width="640" height="480">"#));
        assert!(doc.html.contains("background: #1a1a1a;"));
        assert!(doc.html.contains(r#"<script src="https://cdn.example.test/chart.js">"#));
        assert!(doc.html.contains("data-rendered"));
    }

    #[test]
    fn test_labels_cannot_break_out_of_script() {
        let doc = build_document(&spec("</script><b>x"), &RenderOptions::default(), URL).unwrap();
        assert_eq!(doc.html.matches("</script>").count(), 2);
        assert!(doc.html.contains(r#"<\/script><b>x"#));
    }

    #[test]
    fn test_script_url_is_attribute_escaped() {
        let doc = build_document(&spec("a"), &RenderOptions::default(), "x\"><img").unwrap();
        assert!(doc.html.contains("x&quot;&gt;&lt;img"));
    }
}
