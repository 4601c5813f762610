//! Chart render service.
//!
//! Renders chart requests to PNG through the cached render pipeline and
//! manages the render cache.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use chart_common::{ChartHash, RenderError, Theme};
use render_service::{RenderOverrides, RenderRequest, ServiceConfig, ServiceState};

#[derive(Parser, Debug)]
#[command(name = "render-service")]
#[command(about = "Render charts to PNG with a shared render cache")]
struct Args {
    /// Path to a YAML config file
    #[arg(short, long, env = "RENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long)]
    worker_threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a chart request read from a JSON file
    Render {
        /// Request JSON: chartType, data and render options
        #[arg(long)]
        spec: PathBuf,

        /// Where to write the PNG
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Render a chart stored in the catalog
    RenderChart {
        #[arg(long)]
        hash: String,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        #[arg(long)]
        theme: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Drop every cached render of a stored chart
    Invalidate {
        #[arg(long)]
        hash: String,
    },

    /// Drop every cached render
    Flush,

    /// Check that the cache answers
    Ping,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    } else if let Ok(threads_str) = env::var("TOKIO_WORKER_THREADS") {
        if let Ok(threads) = threads_str.parse::<usize>() {
            runtime_builder.worker_threads(threads);
        }
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServiceConfig::load(args.config.as_deref())?;
    info!(
        cache = if config.cache.redis_url.is_some() { "redis" } else { "memory" },
        single_flight = config.engine.single_flight,
        "Starting chart render service"
    );

    let state = ServiceState::new(config).await?;
    let outcome = run(&state, args.command).await;

    let snapshot = state.metrics.snapshot().await;
    info!(
        cache_hits = snapshot.cache_hits,
        cache_misses = snapshot.cache_misses,
        renders = snapshot.renders_total,
        render_errors = snapshot.render_errors,
        "Metrics at exit"
    );
    state.shutdown().await;
    outcome
}

async fn run(state: &ServiceState, command: Command) -> Result<()> {
    let pipeline = &state.pipeline;

    match command {
        Command::Render { spec, out } => {
            let body = tokio::fs::read_to_string(&spec)
                .await
                .with_context(|| format!("Failed to read request: {:?}", spec))?;
            let (spec, options) = RenderRequest::from_json(&body)
                .map_err(report)?
                .into_parts();

            let png = pipeline.render(&spec, &options).await.map_err(report)?;
            write_png(&out, &png).await
        }
        Command::RenderChart {
            hash,
            width,
            height,
            theme,
            title,
            out,
        } => {
            let hash = ChartHash::parse(hash)?;
            let theme = theme
                .map(|t| Theme::parse(&t).with_context(|| format!("Unknown theme: {}", t)))
                .transpose()?;
            let overrides = RenderOverrides {
                width,
                height,
                theme,
                title,
            };

            let png = pipeline
                .render_stored(&hash, &overrides)
                .await
                .map_err(report)?;
            write_png(&out, &png).await
        }
        Command::Invalidate { hash } => {
            let hash = ChartHash::parse(hash)?;
            let removed = pipeline.invalidate_for_chart(&hash).await;
            println!("{}", removed);
            Ok(())
        }
        Command::Flush => {
            let removed = pipeline.invalidate_all().await;
            println!("{}", removed);
            Ok(())
        }
        Command::Ping => {
            if pipeline.cache().probe().await {
                println!("ok");
                Ok(())
            } else {
                anyhow::bail!("cache unavailable")
            }
        }
    }
}

/// Log the failure; the error itself only carries the safe reason.
fn report(err: RenderError) -> anyhow::Error {
    error!(kind = err.kind.as_str(), reason = %err.reason, "Render failed");
    anyhow::Error::new(err)
}

async fn write_png(path: &PathBuf, png: &[u8]) -> Result<()> {
    tokio::fs::write(path, png)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!(path = ?path, size = png.len(), "Wrote chart");
    Ok(())
}
