//! Environment-driven configuration.
//! `Config::from_env()` loads `.env` (if present) and reads the process
//! environment; `Config::from_lookup` takes any key lookup for tests.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::SchedulerConfig;
use crate::translate::cache::DEFAULT_TTL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub translator: TranslatorConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    /// Fallback when a request names no target language.
    pub default_target_lang: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
    None,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            "none" | "off" | "disabled" => Ok(CacheBackend::None),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub host: String,
    pub port: u16,
    pub db: i64,
    /// Warm-up attempts at startup before caching is disabled.
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    /// Connect and per-command response timeout.
    pub timeout: Duration,
    pub ttl: Duration,
    pub memory_capacity: usize,
}

impl CacheConfig {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            host: "127.0.0.1".into(),
            port: 6379,
            db: 0,
            connect_attempts: 5,
            connect_backoff: Duration::from_millis(500),
            timeout: Duration::from_millis(250),
            ttl: DEFAULT_TTL,
            memory_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "llama-3.1-8b-instant".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Where telemetry runs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryTarget {
    Disabled,
    Mlflow(String),
    Sqlite(PathBuf),
}

impl TelemetryTarget {
    /// `http(s)://…` → MLflow, `sqlite://path` or `*.db` → SQLite.
    pub fn parse(endpoint: &str) -> Result<Self, String> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Ok(TelemetryTarget::Disabled);
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(TelemetryTarget::Mlflow(endpoint.to_string()));
        }
        if let Some(path) = endpoint.strip_prefix("sqlite://") {
            return Ok(TelemetryTarget::Sqlite(PathBuf::from(path)));
        }
        if endpoint.ends_with(".db") || endpoint.ends_with(".sqlite") {
            return Ok(TelemetryTarget::Sqlite(PathBuf::from(endpoint)));
        }
        Err("expected http(s)://, sqlite:// or a .db path".into())
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub target: TelemetryTarget,
    pub experiment: String,
    pub timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            target: TelemetryTarget::Disabled,
            experiment: "LinguaFlow-Live-Translations".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0".into(),
                port: 8000,
            },
            cache: CacheConfig::default(),
            translator: TranslatorConfig::default(),
            telemetry: TelemetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            default_target_lang: "English".into(),
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Config::default();

        let server = ServerConfig {
            bind_addr: env.string("BIND_ADDR").unwrap_or(defaults.server.bind_addr),
            port: env.parse("PORT")?.unwrap_or(defaults.server.port),
        };

        let cache_defaults = defaults.cache;
        let cache = CacheConfig {
            backend: env.parse("CACHE_BACKEND")?.unwrap_or(cache_defaults.backend),
            host: env.string("REDIS_HOST").unwrap_or(cache_defaults.host),
            port: env.parse("REDIS_PORT")?.unwrap_or(cache_defaults.port),
            db: env.parse("REDIS_DB")?.unwrap_or(cache_defaults.db),
            connect_attempts: env
                .parse("REDIS_CONNECT_ATTEMPTS")?
                .unwrap_or(cache_defaults.connect_attempts),
            connect_backoff: env
                .millis("REDIS_CONNECT_BACKOFF_MS")?
                .unwrap_or(cache_defaults.connect_backoff),
            timeout: env
                .millis("REDIS_TIMEOUT_MS")?
                .unwrap_or(cache_defaults.timeout),
            ttl: env
                .parse::<u64>("CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(cache_defaults.ttl),
            memory_capacity: env
                .parse("CACHE_MEMORY_CAPACITY")?
                .unwrap_or(cache_defaults.memory_capacity),
        };

        let translator_defaults = defaults.translator;
        let translator = TranslatorConfig {
            api_key: env
                .string("TRANSLATOR_API_KEY")
                .or_else(|| env.string("GROQ_API_KEY")),
            model: env
                .string("TRANSLATOR_MODEL")
                .or_else(|| env.string("GROQ_MODEL"))
                .unwrap_or(translator_defaults.model),
            base_url: env
                .string("TRANSLATOR_BASE_URL")
                .unwrap_or(translator_defaults.base_url),
            timeout: env
                .parse::<u64>("TRANSLATOR_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(translator_defaults.timeout),
        };

        let telemetry_defaults = defaults.telemetry;
        let endpoint = env
            .string("TELEMETRY_ENDPOINT")
            .or_else(|| env.string("MLFLOW_TRACKING_URI"));
        let target = match endpoint {
            Some(endpoint) => {
                TelemetryTarget::parse(&endpoint).map_err(|reason| ConfigError::Invalid {
                    key: "TELEMETRY_ENDPOINT",
                    value: endpoint.clone(),
                    reason,
                })?
            }
            None => TelemetryTarget::Disabled,
        };
        let telemetry = TelemetryConfig {
            target,
            experiment: env
                .string("TELEMETRY_EXPERIMENT")
                .unwrap_or(telemetry_defaults.experiment),
            timeout: telemetry_defaults.timeout,
        };

        let scheduler_defaults = defaults.scheduler;
        let scheduler = SchedulerConfig {
            worker_threads: env
                .parse("TELEMETRY_WORKERS")?
                .unwrap_or(scheduler_defaults.worker_threads),
            max_in_flight: env
                .parse("TELEMETRY_MAX_IN_FLIGHT")?
                .unwrap_or(scheduler_defaults.max_in_flight),
            shutdown_grace: env
                .millis("TELEMETRY_SHUTDOWN_GRACE_MS")?
                .unwrap_or(scheduler_defaults.shutdown_grace),
        };

        Ok(Self {
            server,
            cache,
            translator,
            telemetry,
            scheduler,
            default_target_lang: env
                .string("TARGET_LANG")
                .unwrap_or(defaults.default_target_lang),
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}
