//! Service configuration: defaults, then an optional YAML file, then
//! environment variables.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use renderer::{ChromiumConfig, EngineConfig, PollSchedule, DEFAULT_CHART_JS_URL};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheSettings,
    pub engine: EngineSettings,
    pub browser: BrowserSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Redis URL. Without one an in-process memory cache is used.
    pub redis_url: Option<String>,
    pub ttl_secs: u64,
    pub connect_timeout_secs: u64,
    /// Size bound of the in-process fallback cache.
    pub memory_max_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: 3600,
            connect_timeout_secs: 5,
            memory_max_mb: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub launch_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub network_idle_timeout_secs: u64,
    pub dom_content_timeout_secs: u64,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub poll_check_timeout_secs: u64,
    pub capture_timeout_secs: u64,
    pub close_timeout_secs: u64,
    pub chart_js_url: String,
    /// Collapse concurrent identical cache misses into one render.
    pub single_flight: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            launch_timeout_secs: 30,
            page_timeout_secs: 10,
            network_idle_timeout_secs: 15,
            dom_content_timeout_secs: 10,
            poll_attempts: 3,
            poll_interval_ms: 1000,
            poll_check_timeout_secs: 5,
            capture_timeout_secs: 15,
            close_timeout_secs: 10,
            chart_js_url: DEFAULT_CHART_JS_URL.to_string(),
            single_flight: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
    pub request_timeout_secs: u64,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: true,
            request_timeout_secs: 30,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// PostgreSQL URL. Stored-chart rendering is unavailable without one.
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config: {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override fields from environment-style variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Some(url) = var("DATABASE_URL") {
            self.catalog.database_url = Some(url);
        }
        if let Some(path) = var("CHROME_EXECUTABLE") {
            self.browser.executable = Some(PathBuf::from(path));
        }
        if let Some(url) = var("CHART_JS_URL") {
            self.engine.chart_js_url = url;
        }

        parse_into(&var, "CACHE_TTL_SECS", &mut self.cache.ttl_secs)?;
        parse_into(&var, "BROWSER_NO_SANDBOX", &mut self.browser.no_sandbox)?;
        parse_into(&var, "RENDER_LAUNCH_TIMEOUT_SECS", &mut self.engine.launch_timeout_secs)?;
        parse_into(
            &var,
            "RENDER_NETWORK_IDLE_TIMEOUT_SECS",
            &mut self.engine.network_idle_timeout_secs,
        )?;
        parse_into(
            &var,
            "RENDER_DOM_CONTENT_TIMEOUT_SECS",
            &mut self.engine.dom_content_timeout_secs,
        )?;
        parse_into(&var, "RENDER_POLL_ATTEMPTS", &mut self.engine.poll_attempts)?;
        parse_into(&var, "RENDER_POLL_INTERVAL_MS", &mut self.engine.poll_interval_ms)?;
        parse_into(&var, "RENDER_CAPTURE_TIMEOUT_SECS", &mut self.engine.capture_timeout_secs)?;
        parse_into(&var, "RENDER_SINGLE_FLIGHT", &mut self.engine.single_flight)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be greater than zero");
        }
        if self.engine.poll_attempts == 0 {
            bail!("engine.poll_attempts must be at least 1");
        }
        let timeouts = [
            ("engine.launch_timeout_secs", self.engine.launch_timeout_secs),
            ("engine.page_timeout_secs", self.engine.page_timeout_secs),
            ("engine.network_idle_timeout_secs", self.engine.network_idle_timeout_secs),
            ("engine.dom_content_timeout_secs", self.engine.dom_content_timeout_secs),
            ("engine.poll_check_timeout_secs", self.engine.poll_check_timeout_secs),
            ("engine.capture_timeout_secs", self.engine.capture_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            bail!("{} must be greater than zero", name);
        }
        if self.engine.chart_js_url.trim().is_empty() {
            bail!("engine.chart_js_url must not be empty");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        EngineConfig {
            launch_timeout: Duration::from_secs(e.launch_timeout_secs),
            page_timeout: Duration::from_secs(e.page_timeout_secs),
            network_idle_timeout: Duration::from_secs(e.network_idle_timeout_secs),
            dom_content_timeout: Duration::from_secs(e.dom_content_timeout_secs),
            poll: PollSchedule {
                max_attempts: e.poll_attempts,
                interval: Duration::from_millis(e.poll_interval_ms),
            },
            poll_check_timeout: Duration::from_secs(e.poll_check_timeout_secs),
            capture_timeout: Duration::from_secs(e.capture_timeout_secs),
            close_timeout: Duration::from_secs(e.close_timeout_secs),
            chart_js_url: e.chart_js_url.clone(),
        }
    }

    pub fn chromium_config(&self) -> ChromiumConfig {
        ChromiumConfig {
            executable: self.browser.executable.clone(),
            no_sandbox: self.browser.no_sandbox,
            request_timeout: Duration::from_secs(self.browser.request_timeout_secs),
            extra_args: self.browser.extra_args.clone(),
        }
    }
}

fn parse_into<T, F>(var: &F, name: &str, target: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", name, raw, e))?;
    }
    Ok(())
}
