//! Startup wiring: pick and connect the cache backend, build the translator,
//! select the telemetry backend and start the deferred scheduler.
//! Cache and telemetry failures degrade to their no-op variants; only a
//! missing translator key or a scheduler that cannot start aborts startup.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{CacheBackend, CacheConfig, Config, TelemetryConfig, TelemetryTarget};
use crate::metrics::MetricsRegistry;
use crate::scheduler::{DeferredScheduler, SchedulerError};
use crate::telemetry::{MlflowBackend, NoopTelemetry, SessionSink, SqliteTraceStore, TelemetrySink};
use crate::translate::cache::{CacheStore, MemoryCache, NoopCache};
use crate::translate::chat::ChatTranslator;
use crate::translate::redis_cache::RedisCache;
use crate::translate::{TranslationService, UpstreamError};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("translator API key missing (set TRANSLATOR_API_KEY or GROQ_API_KEY)")]
    MissingApiKey,

    #[error("failed to build translator client: {0}")]
    Translator(#[from] UpstreamError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Everything the server needs, already wired.
pub struct Components {
    pub service: Arc<TranslationService>,
    pub scheduler: Arc<DeferredScheduler>,
}

pub async fn build(config: &Config) -> Result<Components, BootstrapError> {
    let api_key = config
        .translator
        .api_key
        .clone()
        .ok_or(BootstrapError::MissingApiKey)?;
    let translator = Arc::new(ChatTranslator::new(&config.translator, api_key)?);
    info!(
        model = translator.model(),
        base_url = %config.translator.base_url,
        "translator configured"
    );

    let metrics = Arc::new(MetricsRegistry::new());
    let scheduler = Arc::new(DeferredScheduler::start(
        config.scheduler.clone(),
        Arc::clone(&metrics),
    )?);

    let cache = connect_cache(&config.cache).await;
    let telemetry = select_telemetry(&config.telemetry);

    let service = TranslationService::builder(translator, scheduler.clone())
        .cache(cache)
        .telemetry(telemetry)
        .metrics(Arc::clone(&metrics))
        .default_target_lang(config.default_target_lang.clone())
        .cache_ttl(config.cache.ttl)
        .build();

    info!(
        cache = service.cache_backend(),
        telemetry = service.telemetry_backend(),
        default_target_lang = service.default_target_lang(),
        "translation service ready"
    );

    Ok(Components {
        service: Arc::new(service),
        scheduler,
    })
}

/// Connect the configured cache. Redis gets a bounded warm-up with linear
/// backoff; if it never answers, caching is disabled for this process.
pub async fn connect_cache(config: &CacheConfig) -> Arc<dyn CacheStore> {
    match config.backend {
        CacheBackend::None => {
            info!("cache disabled by configuration");
            Arc::new(NoopCache)
        }
        CacheBackend::Memory => {
            info!(capacity = config.memory_capacity, "using in-process cache");
            Arc::new(MemoryCache::new(config.memory_capacity))
        }
        CacheBackend::Redis => {
            let attempts = config.connect_attempts.max(1);
            for attempt in 1..=attempts {
                match RedisCache::connect(config).await {
                    Ok(cache) => {
                        info!(url = cache.url(), attempt, "redis cache connected");
                        return Arc::new(cache);
                    }
                    Err(e) if attempt < attempts => {
                        let wait = config.connect_backoff * attempt;
                        warn!(
                            attempt,
                            attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "redis not ready, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    Err(e) => {
                        warn!(
                            url = %config.redis_url(),
                            attempts,
                            error = %e,
                            "redis unavailable, caching disabled"
                        );
                    }
                }
            }
            Arc::new(NoopCache)
        }
    }
}

/// Build the telemetry sink for the configured endpoint.
pub fn select_telemetry(config: &TelemetryConfig) -> Arc<dyn TelemetrySink> {
    match &config.target {
        TelemetryTarget::Disabled => {
            info!("telemetry disabled");
            Arc::new(NoopTelemetry)
        }
        TelemetryTarget::Mlflow(url) => {
            match MlflowBackend::new(url.clone(), config.experiment.clone(), config.timeout) {
                Ok(backend) => {
                    info!(url = %url, experiment = %config.experiment, "mlflow telemetry enabled");
                    Arc::new(SessionSink::new(backend))
                }
                Err(e) => {
                    warn!(error = %e, "mlflow client unavailable, telemetry disabled");
                    Arc::new(NoopTelemetry)
                }
            }
        }
        TelemetryTarget::Sqlite(path) => {
            match SqliteTraceStore::open(path, config.experiment.clone()) {
                Ok(store) => Arc::new(SessionSink::new(store)),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "sqlite trace store unavailable, telemetry disabled"
                    );
                    Arc::new(NoopTelemetry)
                }
            }
        }
    }
}
