//! Common chart fixtures.

use chrono::{TimeZone, Utc};

use chart_common::{ChartData, ChartHash, ChartSpec, ChartType, Dataset, RenderOptions, Theme};
use storage::ChartRecord;

/// Monthly sales bar chart at the default 800x600 light render.
pub fn sales_bar_chart() -> (ChartSpec, RenderOptions) {
    let spec = ChartSpec::new(
        ChartType::Bar,
        vec!["Jan".into(), "Feb".into()],
        vec![Dataset::new("Sales", vec![10.0, 20.0])],
    );
    (spec, RenderOptions::new(800, 600, Theme::Light))
}

/// Two series without colors, so palette defaults apply.
pub fn two_series_line_chart() -> ChartSpec {
    ChartSpec::new(
        ChartType::Line,
        vec!["Q1".into(), "Q2".into(), "Q3".into()],
        vec![
            Dataset::new("Revenue", vec![120.0, 150.0, 170.0]),
            Dataset::new("Cost", vec![80.0, 95.0, 110.0]),
        ],
    )
}

/// The JSON body a caller would send for [`sales_bar_chart`].
pub const SALES_BAR_JSON: &str = r#"{
    "chartType": "bar",
    "data": {
        "labels": ["Jan", "Feb"],
        "datasets": [{"label": "Sales", "data": [10, 20]}]
    },
    "width": 800,
    "height": 600,
    "theme": "light"
}"#;

/// A stored chart with the given hash and data.
pub fn chart_record(hash: &str, chart_type: ChartType, data: ChartData) -> ChartRecord {
    ChartRecord {
        hash: ChartHash::parse(hash).unwrap(),
        chart_type,
        chart_data: data,
        width: 800,
        height: 600,
        theme: Theme::Light,
        title: None,
        background_color: None,
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// A stored copy of [`sales_bar_chart`].
pub fn stored_sales_chart(hash: &str) -> ChartRecord {
    let (spec, _) = sales_bar_chart();
    chart_record(hash, spec.chart_type, spec.data)
}
