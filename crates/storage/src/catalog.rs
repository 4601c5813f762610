//! Chart metadata catalog using PostgreSQL.
//!
//! The render core only reads from it: a stored chart is looked up by hash and
//! turned into a spec plus options. Expected table:
//!
//! ```sql
//! CREATE TABLE charts (
//!     hash             TEXT PRIMARY KEY,
//!     chart_type       TEXT NOT NULL,
//!     chart_data       JSONB NOT NULL,
//!     width            INTEGER NOT NULL DEFAULT 800,
//!     height           INTEGER NOT NULL DEFAULT 600,
//!     theme            TEXT NOT NULL DEFAULT 'light',
//!     title            TEXT,
//!     background_color TEXT,
//!     updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use std::time::Duration;
use tracing::debug;

use chart_common::{
    ChartData, ChartError, ChartHash, ChartResult, ChartSpec, ChartType, RenderOptions, Theme,
};

/// Read access to stored charts.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn get_chart_by_hash(&self, hash: &ChartHash) -> ChartResult<Option<ChartRecord>>;
}

/// A stored chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRecord {
    pub hash: ChartHash,
    pub chart_type: ChartType,
    pub chart_data: ChartData,
    pub width: u32,
    pub height: u32,
    pub theme: Theme,
    pub title: Option<String>,
    pub background_color: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ChartRecord {
    pub fn spec(&self) -> ChartSpec {
        ChartSpec {
            chart_type: self.chart_type,
            data: self.chart_data.clone(),
        }
    }

    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            width: self.width,
            height: self.height,
            theme: self.theme,
            title: self.title.clone(),
            background_color: self.background_color.clone(),
        }
    }
}

/// Database connection pool and chart lookups.
pub struct ChartCatalog {
    pool: PgPool,
}

impl ChartCatalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> ChartResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| ChartError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ChartSource for ChartCatalog {
    async fn get_chart_by_hash(&self, hash: &ChartHash) -> ChartResult<Option<ChartRecord>> {
        let row = sqlx::query_as::<_, ChartRow>(
            "SELECT hash, chart_type, chart_data::text AS chart_data, width, height, \
             theme, title, background_color, updated_at \
             FROM charts WHERE hash = $1",
        )
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChartError::DatabaseError(format!("Chart lookup failed: {}", e)))?;

        debug!(hash = %hash, found = row.is_some(), "Chart lookup");
        row.map(ChartRecord::try_from).transpose()
    }
}

#[derive(FromRow)]
struct ChartRow {
    hash: String,
    chart_type: String,
    chart_data: String,
    width: i32,
    height: i32,
    theme: String,
    title: Option<String>,
    background_color: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChartRow> for ChartRecord {
    type Error = ChartError;

    fn try_from(row: ChartRow) -> Result<Self, Self::Error> {
        let chart_type = ChartType::parse(&row.chart_type).ok_or_else(|| {
            ChartError::DatabaseError(format!(
                "chart {} has unknown type '{}'",
                row.hash, row.chart_type
            ))
        })?;
        let theme = Theme::parse(&row.theme).ok_or_else(|| {
            ChartError::DatabaseError(format!(
                "chart {} has unknown theme '{}'",
                row.hash, row.theme
            ))
        })?;
        let chart_data: ChartData = serde_json::from_str(&row.chart_data).map_err(|e| {
            ChartError::DatabaseError(format!("chart {} has malformed data: {}", row.hash, e))
        })?;
        let dimension = |name: &str, v: i32| {
            u32::try_from(v).map_err(|_| {
                ChartError::DatabaseError(format!("chart {} has negative {}", row.hash, name))
            })
        };

        Ok(ChartRecord {
            width: dimension("width", row.width)?,
            height: dimension("height", row.height)?,
            hash: ChartHash::parse(row.hash.clone())?,
            chart_type,
            chart_data,
            theme,
            title: row.title,
            background_color: row.background_color,
            updated_at: row.updated_at,
        })
    }
}
