use anyhow::{Context, anyhow, bail};
use basic_core::{DEFAULT_TICK_INTERVAL, SubServiceDescriptor};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Server configuration loaded via environment variables (and optionally a
/// background job config file).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // CORS settings
    pub cors_allowed_origins: Vec<String>,

    // TLS settings
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,

    /// Fan-out and streaming settings for background jobs.
    #[serde(default)]
    pub background: BackgroundConfig,

    #[serde(skip)]
    pub env_file_loaded: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            cors_allowed_origins: Vec::new(),
            tls_cert_path: None,
            tls_key_path: None,
            background: BackgroundConfig::default(),
            env_file_loaded: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        let env_file_loaded = dotenvy::dotenv().is_ok();

        let background = BackgroundConfig::load_from_env()?;

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| parse_origins(&raw))
                .unwrap_or_default(),

            tls_cert_path: env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            tls_key_path: env::var("TLS_KEY_PATH").ok().map(PathBuf::from),

            background,
            env_file_loaded,
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Background job settings. Use these to tune how often progress is reported,
/// how slow the simulated upstreams are, and how long finished jobs stay
/// queryable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Period between progress reports on a stream. The first report goes out
    /// one period after the request arrives.
    pub tick_interval_ms: u64,
    /// Upper bound of the random latency of each simulated upstream call.
    pub max_latency_ms: u64,
    /// Share of simulated calls that fail, in `[0, 1]`.
    pub failure_ratio: f64,
    /// How long a finished job stays in the registry before the sweeper
    /// evicts it.
    pub retention_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,
    /// Upstreams each job fans out to.
    pub services: Vec<SubServiceDescriptor>,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            max_latency_ms: 9_000,
            failure_ratio: 0.0,
            retention_secs: 300,
            sweep_interval_secs: 60,
            services: SubServiceDescriptor::defaults(),
        }
    }
}

impl BackgroundConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Load background overrides. Evaluation order:
    /// 1) `$BACKGROUND_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$BACKGROUND_CONFIG_JSON` (inline JSON),
    /// 3) the first default file that exists,
    /// 4) defaults.
    ///
    /// `$BACKGROUND_TICK_INTERVAL` (e.g. `500ms`) is applied on top.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let mut config = if let Ok(path) = env::var("BACKGROUND_CONFIG_PATH") {
            Self::load_from_file(Path::new(&path))?
        } else if let Ok(raw) = env::var("BACKGROUND_CONFIG_JSON") {
            Self::parse_json(&raw).context("failed to parse BACKGROUND_CONFIG_JSON")?
        } else if let Some(path) = Self::find_default_file() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(raw) = env::var("BACKGROUND_TICK_INTERVAL") {
            config
                .apply_tick_override(&raw)
                .context("invalid BACKGROUND_TICK_INTERVAL")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read background config from {}", path.display())
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid background config {}", path.display()))?,
            Some("toml") | Some("tml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid background config {}: {}", path.display(), err)
            })?,
            _ => Self::parse_from_str(&contents, &path.display().to_string())?,
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON for convenience.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse background config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid background config json: {err}"))
    }

    /// Human readable tick override, e.g. `500ms` or `2s`.
    pub fn apply_tick_override(&mut self, raw: &str) -> anyhow::Result<()> {
        let interval = humantime::parse_duration(raw.trim())
            .with_context(|| format!("cannot parse duration {raw:?}"))?;
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.failure_ratio) {
            bail!(
                "failure_ratio must be within [0, 1], got {}",
                self.failure_ratio
            );
        }
        if self.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be greater than zero");
        }
        if self.retention_secs.saturating_mul(1_000) < self.tick_interval_ms {
            bail!(
                "retention_secs ({}s) must cover at least one tick_interval_ms ({}ms)",
                self.retention_secs,
                self.tick_interval_ms
            );
        }
        Ok(())
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "background.toml",
            "background.json",
            "config/background.toml",
            "config/background.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}
