//! Determinism tests for render cache keys.

use chart_common::{ChartHash, ChartSpec, ChartType, RenderOptions, Theme};
use storage::fingerprint::{content_digest, derive_key, derive_scoped_key, CacheKey};

fn parse(spec: &str, options: &str) -> (ChartSpec, RenderOptions) {
    (
        serde_json::from_str(spec).unwrap(),
        serde_json::from_str(options).unwrap(),
    )
}

// ============================================================================
// Stability
// ============================================================================

#[test]
fn test_golden_key_is_stable_across_builds() {
    let (spec, opts) = parse(
        r#"{"chartType":"bar","labels":["Jan","Feb"],"datasets":[{"label":"Sales","data":[10,20]}]}"#,
        r#"{"width":800,"height":600,"theme":"light"}"#,
    );
    let key = derive_key(spec.chart_type, &spec.data, &opts).unwrap();
    assert_eq!(
        key.as_str(),
        "chart:bar:800x600:light:adhoc:3d126cf5031f52905e16244eb4ca0154"
    );
}

#[test]
fn test_repeated_derivation_is_identical() {
    let (spec, opts) = parse(
        r#"{"chartType":"line","labels":["a","b","c"],"datasets":[{"label":"x","data":[1.5,2,3]}]}"#,
        r#"{"theme":"dark","title":"Trend"}"#,
    );
    let first = derive_key(spec.chart_type, &spec.data, &opts).unwrap();
    for _ in 0..10 {
        assert_eq!(derive_key(spec.chart_type, &spec.data, &opts).unwrap(), first);
    }
}

// ============================================================================
// Canonicalization
// ============================================================================

#[test]
fn test_field_order_does_not_matter() {
    let (a_spec, a_opts) = parse(
        r##"{"chartType":"bar","labels":["Jan"],"datasets":[{"label":"S","data":[1],"borderWidth":3,"backgroundColor":"#ff0000"}]}"##,
        r#"{"width":1024,"height":768,"theme":"dark","title":"T"}"#,
    );
    let (b_spec, b_opts) = parse(
        r##"{"datasets":[{"backgroundColor":"#ff0000","borderWidth":3,"data":[1],"label":"S"}],"labels":["Jan"],"chartType":"bar"}"##,
        r#"{"title":"T","theme":"dark","height":768,"width":1024}"#,
    );

    assert_eq!(
        derive_key(a_spec.chart_type, &a_spec.data, &a_opts).unwrap(),
        derive_key(b_spec.chart_type, &b_spec.data, &b_opts).unwrap()
    );
}

#[test]
fn test_defaults_and_explicit_defaults_share_a_key() {
    let (spec, implicit) = parse(
        r#"{"chartType":"pie","labels":["a"],"datasets":[{"data":[1]}]}"#,
        r#"{}"#,
    );
    let explicit: RenderOptions = serde_json::from_str(
        r##"{"width":800,"height":600,"theme":"light","backgroundColor":"#ffffff","title":""}"##,
    )
    .unwrap();

    assert_eq!(
        content_digest(spec.chart_type, &spec.data, &implicit).unwrap(),
        content_digest(spec.chart_type, &spec.data, &explicit).unwrap()
    );
}

#[test]
fn test_data_changes_change_the_digest() {
    let (spec, opts) = parse(
        r#"{"chartType":"bar","labels":["Jan","Feb"],"datasets":[{"label":"Sales","data":[10,20]}]}"#,
        r#"{}"#,
    );
    let mut changed = spec.clone();
    changed.data.datasets[0].values[1] = 21.0;

    assert_ne!(
        derive_key(spec.chart_type, &spec.data, &opts).unwrap(),
        derive_key(changed.chart_type, &changed.data, &opts).unwrap()
    );
}

// ============================================================================
// Scoping
// ============================================================================

#[test]
fn test_scoped_keys_share_digest_with_adhoc_keys() {
    let (spec, opts) = parse(
        r#"{"chartType":"radar","labels":["a","b","c"],"datasets":[{"data":[1,2,3]}]}"#,
        r#"{"width":400,"height":400}"#,
    );
    let hash = ChartHash::parse("team-42").unwrap();
    let adhoc = derive_key(spec.chart_type, &spec.data, &opts).unwrap();
    let scoped = derive_scoped_key(Some(&hash), spec.chart_type, &spec.data, &opts).unwrap();

    assert_ne!(adhoc, scoped);
    assert!(scoped.as_str().starts_with("chart:radar:400x400:light:h.team-42:"));
    assert_eq!(
        adhoc.as_str().rsplit(':').next(),
        scoped.as_str().rsplit(':').next()
    );
}

#[test]
fn test_every_variant_of_a_chart_matches_its_pattern() {
    let (spec, _) = parse(
        r#"{"chartType":"line","labels":["a"],"datasets":[{"data":[1]}]}"#,
        r#"{}"#,
    );
    let hash = ChartHash::parse("abc").unwrap();
    for (w, h, theme) in [(800, 600, Theme::Light), (1200, 900, Theme::Dark)] {
        let key = derive_scoped_key(
            Some(&hash),
            ChartType::Line,
            &spec.data,
            &RenderOptions::new(w, h, theme),
        )
        .unwrap();
        assert!(key.belongs_to(&hash));
        assert!(storage::memory_cache::key_pattern(&CacheKey::chart_pattern(&hash))
            .unwrap()
            .matches(key.as_str()));
    }
}
