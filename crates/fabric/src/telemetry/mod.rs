//! Ambient logging/metrics init (spec §10.1). This crate only ever emits
//! `tracing` events from request-path code; installing a global
//! subscriber is left to whichever binary embeds it, which is why
//! `init` lives here rather than being called automatically.
//!
//! Grounded on `fabric-core::tokio_metrics::TokioCollector`'s
//! `prometheus_client` `Collector` pattern for the metrics half, and on
//! the wider pack's `tracing_subscriber::fmt()...with_env_filter(...)`
//! idiom (e.g. `tobert-hootenanny`'s `holler` binary) for the logging
//! half.

pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber: env-filtered (`RUST_LOG`,
/// defaulting to `info`), either human-readable or JSON formatted.
/// Call once, from the binary's `main`, before anything else logs.
pub fn init(json: bool) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	if json {
		tracing_subscriber::fmt().with_env_filter(filter).json().init();
	} else {
		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}
