//! Logging setup and propagation counters shared by the coordinator and the CLI.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("otel setup failed: {0}")]
    Otel(String),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize structured logging (JSON) with env filter.
/// Set RUST_LOG, e.g., "info,coordinator=debug". Logs go to stderr so stdout
/// stays free for command output. Later calls are no-ops.
pub fn init_json_logging() {
    let fmt_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(std::io::stderr);
    let subscriber = Registry::default().with(env_filter()).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

#[cfg(feature = "otel")]
pub mod metrics {
    //! OTLP instruments mirroring [`PropagationMetrics`](crate::PropagationMetrics).
    use super::TelemetryError;
    use once_cell::sync::OnceCell;
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};

    static METRICS_INIT: OnceCell<()> = OnceCell::new();
    static INSTRUMENTS: OnceCell<PropagationInstruments> = OnceCell::new();

    fn init_metrics_from_env() -> Result<(), TelemetryError> {
        // Configure OTLP metrics pipeline via env (OTEL_EXPORTER_*).
        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(opentelemetry_sdk::runtime::Tokio)
            .with_exporter(opentelemetry_otlp::new_exporter().http())
            .build()
            .map_err(|e| TelemetryError::Otel(e.to_string()))?;
        global::set_meter_provider(provider);
        Ok(())
    }

    fn ensure_metrics_provider() {
        let _ = METRICS_INIT.get_or_init(|| {
            if let Err(e) = init_metrics_from_env() {
                tracing::warn!(error = %e, "otlp metrics unavailable; instruments are no-ops");
            }
        });
    }

    pub struct PropagationInstruments {
        pub reloads: Counter<u64>,
        pub injections: Counter<u64>,
        pub frames_seeded: Counter<u64>,
        pub failures: Counter<u64>,
        pub skips: Counter<u64>,
    }

    pub fn instruments() -> &'static PropagationInstruments {
        INSTRUMENTS.get_or_init(|| {
            ensure_metrics_provider();
            let meter: Meter = global::meter("fauxtime.propagation");
            PropagationInstruments {
                reloads: meter
                    .u64_counter("fauxtime.tabs.reloads")
                    .with_description("One-time reloads forced on tabs")
                    .init(),
                injections: meter
                    .u64_counter("fauxtime.tabs.injections")
                    .with_description("Bootstrap injections that reached the tab")
                    .init(),
                frames_seeded: meter
                    .u64_counter("fauxtime.frames.seeded")
                    .with_description("Frames whose context storage was seeded")
                    .init(),
                failures: meter
                    .u64_counter("fauxtime.tabs.failures")
                    .with_description("Tab evaluations that failed")
                    .init(),
                skips: meter
                    .u64_counter("fauxtime.tabs.skips")
                    .with_description("Tabs skipped because of restricted URLs")
                    .init(),
            }
        })
    }
}

/// Counters describing how the global configuration reached open tabs.
#[derive(Clone, Default)]
pub struct PropagationMetrics {
    reloads: Arc<AtomicU64>,
    injections: Arc<AtomicU64>,
    frames_seeded: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    skips: Arc<AtomicU64>,
}

/// Point-in-time copy of [`PropagationMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropagationSnapshot {
    pub reloads: u64,
    pub injections: u64,
    pub frames_seeded: u64,
    pub failures: u64,
    pub skips: u64,
}

impl PropagationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reload(&self) {
        let _ = self.reloads.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        metrics::instruments().reloads.add(1, &[]);
    }

    pub fn record_injection(&self, frames: u64) {
        let _ = self.injections.fetch_add(1, Ordering::Relaxed);
        if frames > 0 {
            let _ = self.frames_seeded.fetch_add(frames, Ordering::Relaxed);
        }
        #[cfg(feature = "otel")]
        {
            let inst = metrics::instruments();
            inst.injections.add(1, &[]);
            inst.frames_seeded.add(frames, &[]);
        }
    }

    pub fn record_failure(&self) {
        let _ = self.failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        metrics::instruments().failures.add(1, &[]);
    }

    pub fn record_skip(&self) {
        let _ = self.skips.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        metrics::instruments().skips.add(1, &[]);
    }

    pub fn snapshot(&self) -> PropagationSnapshot {
        PropagationSnapshot {
            reloads: self.reloads.load(Ordering::Relaxed),
            injections: self.injections.load(Ordering::Relaxed),
            frames_seeded: self.frames_seeded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }
}
