use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use linguaflow::metrics::MetricsRegistry;
use linguaflow::scheduler::{DeferredScheduler, DeferredTask, SchedulerConfig, TaskScheduler};
use linguaflow::telemetry::{TelemetryError, TelemetryRecord, TelemetrySink};
use linguaflow::translate::cache::{CacheError, CacheStore, MemoryCache, NoopCache};
use linguaflow::translate::normalize::{fingerprint, CacheKey};
use linguaflow::{ResultSource, TranslationRequest, TranslationService, Translator, UpstreamError};

// --- Fakes ---

struct FakeTranslator {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeTranslator {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(UpstreamError::Status {
                status: 503,
                body: "model overloaded".into(),
            });
        }
        Ok(match (text.trim().to_lowercase().as_str(), target_lang) {
            ("hello", "French") => "Bonjour".to_string(),
            (other, lang) => format!("{other} ({lang})"),
        })
    }
}

/// Memory cache that also records every write.
struct RecordingCache {
    inner: MemoryCache,
    writes: Mutex<Vec<(String, String, Duration)>>,
}

impl RecordingCache {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCache::new(64),
            writes: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CacheStore for RecordingCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &CacheKey,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.writes
            .lock()
            .push((key.to_string(), value.to_string(), ttl));
        self.inner.set_with_expiry(key, value, ttl).await
    }

    fn backend(&self) -> &'static str {
        "recording"
    }
}

/// Cache whose every operation fails.
struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &CacheKey) -> Option<String> {
        None
    }

    async fn set_with_expiry(
        &self,
        _key: &CacheKey,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection reset".into()))
    }

    fn backend(&self) -> &'static str {
        "broken"
    }
}

/// Captures scheduled tasks so tests decide when (or whether) they run.
#[derive(Default)]
struct CapturingScheduler {
    tasks: Mutex<Vec<DeferredTask>>,
}

impl CapturingScheduler {
    fn scheduled(&self) -> usize {
        self.tasks.lock().len()
    }

    async fn run_all(&self) {
        let tasks: Vec<DeferredTask> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.await;
        }
    }
}

impl TaskScheduler for CapturingScheduler {
    fn schedule(&self, _label: &'static str, task: DeferredTask) {
        self.tasks.lock().push(task);
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<TelemetryRecord>>,
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        self.records.lock().push(record);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "collecting"
    }
}

/// A sink that never finishes.
struct StuckSink;

#[async_trait]
impl TelemetrySink for StuckSink {
    async fn record(&self, _record: TelemetryRecord) -> Result<(), TelemetryError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "stuck"
    }
}

// --- Scenarios ---

#[tokio::test]
async fn miss_then_hit_for_same_normalized_text() {
    let translator = FakeTranslator::ok();
    let cache = RecordingCache::new();
    let scheduler = Arc::new(CapturingScheduler::default());
    let svc = TranslationService::builder(translator.clone(), scheduler.clone())
        .cache(cache.clone())
        .build();

    let first = svc
        .translate(TranslationRequest::with_target("Hello", "French"))
        .await
        .unwrap();
    assert_eq!(first.source, ResultSource::Api);
    assert_eq!(first.translated, "Bonjour");
    assert_eq!(first.original, "Hello");

    {
        let writes = cache.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "translation:French:5d41402abc4b2a76b9719d911017c592");
        assert_eq!(writes[0].1, "Bonjour");
        assert_eq!(writes[0].2, Duration::from_secs(86_400));
    }

    let second = svc
        .translate(TranslationRequest::with_target("Hello", "French"))
        .await
        .unwrap();
    assert_eq!(second.source, ResultSource::Cache);
    assert_eq!(second.translated, "Bonjour");

    let padded = svc
        .translate(TranslationRequest::with_target("  Hello  ", "French"))
        .await
        .unwrap();
    assert_eq!(padded.source, ResultSource::Cache);
    assert_eq!(padded.original, "  Hello  ", "original echoes the raw input");

    assert_eq!(translator.calls(), 1);
    assert_eq!(cache.writes.lock().len(), 1, "hits never write back");
    assert_eq!(scheduler.scheduled(), 3);
}

#[tokio::test]
async fn disabled_or_down_cache_calls_upstream_every_time() {
    let stores: [Arc<dyn CacheStore>; 2] = [Arc::new(NoopCache), Arc::new(BrokenCache)];
    for store in stores {
        let translator = FakeTranslator::ok();
        let svc = TranslationService::builder(
            translator.clone(),
            Arc::new(CapturingScheduler::default()),
        )
        .cache(store)
        .build();

        for _ in 0..2 {
            let result = svc
                .translate(TranslationRequest::with_target("Hi", "Spanish"))
                .await
                .unwrap();
            assert_eq!(result.source, ResultSource::Api);
            assert_eq!(result.translated, "hi (Spanish)");
        }
        assert_eq!(translator.calls(), 2);
    }
}

#[tokio::test]
async fn upstream_failure_writes_nothing_and_schedules_nothing() {
    let translator = FakeTranslator::failing();
    let cache = RecordingCache::new();
    let scheduler = Arc::new(CapturingScheduler::default());
    let svc = TranslationService::builder(translator.clone(), scheduler.clone())
        .cache(cache.clone())
        .build();

    let err = svc
        .translate(TranslationRequest::with_target("Hello", "French"))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
    assert!(cache.writes.lock().is_empty());
    assert_eq!(scheduler.scheduled(), 0);
    assert!(cache
        .get(&fingerprint("Hello", "French"))
        .await
        .is_none());
}

#[tokio::test]
async fn failing_cache_write_still_returns_translation() {
    let translator = FakeTranslator::ok();
    let svc = TranslationService::builder(translator.clone(), Arc::new(CapturingScheduler::default()))
        .cache(Arc::new(BrokenCache))
        .build();

    let result = svc
        .translate(TranslationRequest::with_target("Hello", "French"))
        .await
        .unwrap();
    assert_eq!(result.source, ResultSource::Api);
    assert_eq!(result.translated, "Bonjour");
}

#[tokio::test]
async fn telemetry_records_what_the_caller_received() {
    let translator = FakeTranslator::ok();
    let scheduler = Arc::new(CapturingScheduler::default());
    let sink = Arc::new(CollectingSink::default());
    let svc = TranslationService::builder(translator, scheduler.clone())
        .cache(Arc::new(MemoryCache::new(8)))
        .telemetry(sink.clone())
        .default_target_lang("French")
        .build();

    let miss = svc.translate(TranslationRequest::new("Hello")).await.unwrap();
    let hit = svc.translate(TranslationRequest::new("hello")).await.unwrap();

    assert!(sink.records.lock().is_empty(), "nothing runs until the scheduler does");
    scheduler.run_all().await;

    let records = sink.records.lock();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text, "Hello");
    assert_eq!(records[0].translation, "Bonjour");
    assert_eq!(records[0].latency_ms, miss.latency_ms);
    assert_eq!(records[0].source, ResultSource::Api);
    assert_eq!(records[0].target_lang, "French");
    assert_eq!(records[1].text, "hello");
    assert_eq!(records[1].source, ResultSource::Cache);
    assert_eq!(records[1].latency_ms, hit.latency_ms);
}

#[tokio::test]
async fn stuck_telemetry_does_not_delay_responses() {
    let metrics = Arc::new(MetricsRegistry::new());
    let scheduler = Arc::new(
        DeferredScheduler::start(
            SchedulerConfig {
                shutdown_grace: Duration::from_millis(50),
                ..SchedulerConfig::default()
            },
            Arc::clone(&metrics),
        )
        .unwrap(),
    );
    let svc = TranslationService::builder(FakeTranslator::ok(), scheduler.clone())
        .cache(Arc::new(MemoryCache::new(8)))
        .telemetry(Arc::new(StuckSink))
        .metrics(metrics)
        .build();

    let started = Instant::now();
    for _ in 0..10 {
        svc.translate(TranslationRequest::with_target("Hello", "French"))
            .await
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    scheduler.shutdown().await;
    let stats = scheduler.stats();
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.abandoned, 10);
    assert_eq!(
        stats.completed + stats.failed + stats.dropped + stats.abandoned,
        stats.submitted
    );
}

#[tokio::test]
async fn concurrent_identical_requests_all_succeed() {
    let translator = FakeTranslator::ok();
    let svc = Arc::new(
        TranslationService::builder(translator.clone(), Arc::new(CapturingScheduler::default()))
            .cache(Arc::new(MemoryCache::new(8)))
            .build(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move {
            svc.translate(TranslationRequest::with_target("Hello", "French"))
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.translated, "Bonjour");
    }
    let calls = translator.calls();
    assert!((1..=8).contains(&calls), "upstream called {calls} times");
}
