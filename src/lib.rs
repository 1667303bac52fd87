//! LinguaFlow: caching translation proxy.
//! Requests are answered from the shared cache or a remote chat model; every
//! successful answer is traced off the response path by the deferred scheduler.

pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub mod translate;

pub use config::Config;
pub use translate::{
    ResultSource, TranslationRequest, TranslationResult, TranslationService, Translator,
    UpstreamError,
};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("linguaflow=info,tower_http=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
