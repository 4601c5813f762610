//! Deterministic cache keys for rendered charts.
//!
//! A key looks like
//!
//! ```text
//! chart:bar:800x600:light:adhoc:3f9c0c5e2d7a4b18a6f1e0d2c9b87a51
//! chart:line:1024x768:dark:h.sales_q1:0b4e77d1f2a3c4d5e6f708192a3b4c5d
//! ```
//!
//! The readable prefix carries chart type, size, theme and the chart identity
//! so that bulk invalidation is a plain glob over keys. The trailing digest is
//! the first 128 bits of SHA-256 over a canonical JSON rendering of the chart
//! data and normalized options. Canonical JSON sorts object keys at every
//! level, so field order in the caller's JSON never changes the key.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use chart_common::{ChartData, ChartError, ChartHash, ChartResult, ChartType, RenderOptions};

/// Namespace every render key lives under.
pub const KEY_NAMESPACE: &str = "chart";

/// Identity segment for charts rendered straight from a request body.
pub const ADHOC_SCOPE: &str = "adhoc";

/// Hex characters of the SHA-256 digest kept in the key (128 bits).
const DIGEST_HEX_LEN: usize = 32;

/// Cache key for a rendered chart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Glob matching every key rendered for a stored chart, whatever its size
    /// or theme.
    pub fn chart_pattern(hash: &ChartHash) -> String {
        format!("{}:*:{}:*", KEY_NAMESPACE, scope_segment(Some(hash)))
    }

    /// Glob matching every render key.
    pub fn all_pattern() -> String {
        format!("{}:*", KEY_NAMESPACE)
    }

    /// Whether this key was derived for the given stored chart.
    pub fn belongs_to(&self, hash: &ChartHash) -> bool {
        self.0
            .contains(&format!(":{}:", scope_segment(Some(hash))))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn scope_segment(hash: Option<&ChartHash>) -> String {
    match hash {
        Some(hash) => format!("h.{}", hash),
        None => ADHOC_SCOPE.to_string(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintInput<'a> {
    chart_type: ChartType,
    data: &'a ChartData,
    options: RenderOptions,
}

/// Derive the key for an ad-hoc chart.
pub fn derive_key(
    chart_type: ChartType,
    data: &ChartData,
    options: &RenderOptions,
) -> ChartResult<CacheKey> {
    derive_scoped_key(None, chart_type, data, options)
}

/// Derive the key for a chart, optionally tied to a stored chart identity.
pub fn derive_scoped_key(
    chart: Option<&ChartHash>,
    chart_type: ChartType,
    data: &ChartData,
    options: &RenderOptions,
) -> ChartResult<CacheKey> {
    let digest = content_digest(chart_type, data, options)?;

    Ok(CacheKey(format!(
        "{}:{}:{}x{}:{}:{}:{}",
        KEY_NAMESPACE,
        chart_type.as_str(),
        options.width,
        options.height,
        options.theme.as_str(),
        scope_segment(chart),
        digest
    )))
}

/// Truncated hex SHA-256 of the canonical (type, data, options) document.
pub fn content_digest(
    chart_type: ChartType,
    data: &ChartData,
    options: &RenderOptions,
) -> ChartResult<String> {
    let input = FingerprintInput {
        chart_type,
        data,
        options: options.normalized(),
    };
    let value = serde_json::to_value(&input)
        .map_err(|e| ChartError::InternalError(format!("fingerprint serialization: {}", e)))?;

    let canonical = canonical_json(&value);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(DIGEST_HEX_LEN);
    Ok(hex)
}

/// Serialize a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
