//! Parsing and validation tests for chart requests.

use chart_common::{ChartError, ChartSpec, ChartType, RenderOptions, SeriesType, Theme};

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_sales_bar_request() {
    let spec: ChartSpec = serde_json::from_str(
        r#"{
            "chartType": "bar",
            "labels": ["Jan", "Feb"],
            "datasets": [{"label": "Sales", "data": [10, 20]}]
        }"#,
    )
    .unwrap();
    let opts: RenderOptions =
        serde_json::from_str(r#"{"width": 800, "height": 600, "theme": "light"}"#).unwrap();

    assert_eq!(spec.chart_type, ChartType::Bar);
    assert_eq!(spec.data.datasets.len(), 1);
    assert_eq!(spec.data.datasets[0].values, vec![10.0, 20.0]);
    assert_eq!(opts, RenderOptions::default());
}

#[test]
fn test_parse_mixed_series_types() {
    let spec: ChartSpec = serde_json::from_str(
        r#"{
            "chartType": "mixed",
            "labels": ["Q1", "Q2"],
            "datasets": [
                {"label": "Revenue", "data": [5, 7], "type": "bar"},
                {"label": "Trend", "data": [5, 6], "seriesType": "line", "fill": false}
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(spec.data.datasets[0].series_type, Some(SeriesType::Bar));
    assert_eq!(spec.data.datasets[1].series_type, Some(SeriesType::Line));
    assert_eq!(spec.data.datasets[1].fill, Some(false));
}

#[test]
fn test_unknown_chart_type_is_rejected() {
    let result = serde_json::from_str::<ChartSpec>(
        r#"{"chartType": "gantt", "datasets": [{"data": [1]}]}"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_unknown_theme_is_rejected() {
    assert!(serde_json::from_str::<RenderOptions>(r#"{"theme": "sepia"}"#).is_err());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validation_reports_offending_parameter() {
    let spec: ChartSpec = serde_json::from_str(
        r#"{"chartType": "line", "datasets": [{"data": [1]}, {"data": [2], "borderWidth": 12}]}"#,
    )
    .unwrap();

    match spec.validate() {
        Err(ChartError::InvalidParameter { param, .. }) => {
            assert_eq!(param, "datasets[1].borderWidth")
        }
        other => panic!("expected InvalidParameter, got {:?}", other),
    }
}

#[test]
fn test_background_color_is_validated() {
    let opts = RenderOptions::new(800, 600, Theme::Dark).with_background("url(evil)</style>");
    assert!(opts.validate().is_err());
}
