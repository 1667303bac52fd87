//! Request orchestrator: cache-aside lookup, upstream call on miss, cache
//! write-back, then telemetry handed to the deferred scheduler.
//! Only upstream failures reach the caller; cache and telemetry degrade silently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::cache::{CacheError, CacheStore, NoopCache, DEFAULT_TTL};
use super::flow::{RequestFlow, RequestPhase};
use super::normalize::fingerprint;
use super::{round_ms, ResultSource, TranslationRequest, TranslationResult, Translator, UpstreamError};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::scheduler::TaskScheduler;
use crate::telemetry::{self, NoopTelemetry, TelemetryRecord, TelemetrySink};

const FALLBACK_TARGET_LANG: &str = "English";

pub struct TranslationService {
    translator: Arc<dyn Translator>,
    cache: Arc<dyn CacheStore>,
    telemetry: Arc<dyn TelemetrySink>,
    scheduler: Arc<dyn TaskScheduler>,
    metrics: Arc<MetricsRegistry>,
    default_target_lang: String,
    cache_ttl: Duration,
}

pub struct TranslationServiceBuilder {
    translator: Arc<dyn Translator>,
    scheduler: Arc<dyn TaskScheduler>,
    cache: Option<Arc<dyn CacheStore>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    metrics: Option<Arc<MetricsRegistry>>,
    default_target_lang: String,
    cache_ttl: Duration,
}

impl TranslationServiceBuilder {
    /// Cache store; defaults to `NoopCache` (caching disabled).
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Telemetry sink; defaults to `NoopTelemetry`.
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn default_target_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_target_lang = lang.into();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn build(self) -> TranslationService {
        TranslationService {
            translator: self.translator,
            cache: self.cache.unwrap_or_else(|| Arc::new(NoopCache)),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry)),
            scheduler: self.scheduler,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(MetricsRegistry::new())),
            default_target_lang: self.default_target_lang,
            cache_ttl: self.cache_ttl,
        }
    }
}

impl TranslationService {
    pub fn builder(
        translator: Arc<dyn Translator>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> TranslationServiceBuilder {
        TranslationServiceBuilder {
            translator,
            scheduler,
            cache: None,
            telemetry: None,
            metrics: None,
            default_target_lang: FALLBACK_TARGET_LANG.to_string(),
            cache_ttl: DEFAULT_TTL,
        }
    }

    /// Serve one translation request.
    ///
    /// Latency covers cache lookup, the upstream call and the cache write, but
    /// never telemetry, which is only scheduled before returning.
    pub async fn translate(
        &self,
        request: TranslationRequest,
    ) -> Result<TranslationResult, UpstreamError> {
        let started = Instant::now();
        let mut flow = RequestFlow::start();
        let target_lang = self.resolve_target(request.target_lang.as_deref());
        let key = fingerprint(&request.text, &target_lang);

        flow.advance(RequestPhase::CacheCheck);
        let lookup = self.metrics.span(metric_names::CACHE_LOOKUP);
        let cached = self.cache.get(&key).await;
        lookup.finish();

        if let Some(translated) = cached {
            flow.advance(RequestPhase::CacheHit);
            let latency_ms = round_ms(elapsed_ms(started));
            self.metrics.record_ms(metric_names::TRANSLATE_HIT, latency_ms);
            debug!(key = %key, latency_ms, "cache hit");

            let result = TranslationResult {
                original: request.text,
                translated,
                latency_ms,
                source: ResultSource::Cache,
            };
            self.schedule_telemetry(&result, &target_lang);
            flow.advance(RequestPhase::Respond);
            return Ok(result);
        }

        flow.advance(RequestPhase::CacheMiss);
        flow.advance(RequestPhase::Invoke);
        let upstream = self.metrics.span(metric_names::UPSTREAM_OK);
        let translated = match self.translator.translate(&request.text, &target_lang).await {
            Ok(translated) => {
                upstream.finish();
                flow.advance(RequestPhase::InvokeOk);
                translated
            }
            Err(e) => {
                upstream.finish_as(metric_names::UPSTREAM_FAILED);
                flow.advance(RequestPhase::InvokeFail);
                flow.advance(RequestPhase::ErrorRespond);
                return Err(e);
            }
        };

        flow.advance(RequestPhase::Store);
        let store = self.metrics.span(metric_names::CACHE_STORE);
        match self
            .cache
            .set_with_expiry(&key, &translated, self.cache_ttl)
            .await
        {
            Ok(()) => {}
            Err(CacheError::Disabled) => {}
            Err(e) => warn!(key = %key, error = %e, "cache write failed, continuing"),
        }
        store.finish();

        let latency_ms = round_ms(elapsed_ms(started));
        self.metrics.record_ms(metric_names::TRANSLATE_MISS, latency_ms);
        info!(
            target_lang = %target_lang,
            latency_ms,
            chars = request.text.chars().count(),
            "translated via upstream"
        );

        let result = TranslationResult {
            original: request.text,
            translated,
            latency_ms,
            source: ResultSource::Api,
        };
        self.schedule_telemetry(&result, &target_lang);
        flow.advance(RequestPhase::Respond);
        Ok(result)
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend()
    }

    pub fn telemetry_backend(&self) -> &'static str {
        self.telemetry.backend()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn default_target_lang(&self) -> &str {
        &self.default_target_lang
    }

    fn resolve_target(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(self.default_target_lang.as_str())
            .to_string()
    }

    fn schedule_telemetry(&self, result: &TranslationResult, target_lang: &str) {
        let record = TelemetryRecord {
            text: result.original.clone(),
            translation: result.translated.clone(),
            latency_ms: result.latency_ms,
            target_lang: target_lang.to_string(),
            source: result.source,
        };
        let sink = Arc::clone(&self.telemetry);
        let metrics = Arc::clone(&self.metrics);
        self.scheduler.schedule(
            "telemetry",
            Box::pin(telemetry::deliver(sink, record, metrics)),
        );
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
