use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "quire";
const SUBSYSTEM: &str = "sync";

/// Central registry for the sync store's Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Lifecycle
	pub init_requests_total: IntCounter,
	pub documents_created_total: IntCounter,
	pub documents_deleted_total: IntCounter,
	pub state_replacements_total: IntCounter,

	// Apply path
	pub updates_applied_total: IntCounter,
	pub version_conflicts_total: IntCounter,
	pub lock_timeouts_total: IntCounter,
	pub duplicate_clocks_total: IntCounter,
	pub apply_failures_total: IntCounter,
	pub apply_retries_total: IntCounter,
	pub apply_duration_seconds: Histogram,
}

impl MetricsRegistry {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
			let c = IntCounter::with_opts(
				Opts::new(name, help)
					.namespace(NAMESPACE)
					.subsystem(SUBSYSTEM),
			)?;
			registry.register(Box::new(c.clone()))?;
			Ok(c)
		};

		let init_requests_total = counter(
			"init_requests_total",
			"Total document initialization requests",
		)?;
		let documents_created_total = counter(
			"documents_created_total",
			"Initialization requests that created a new document",
		)?;
		let documents_deleted_total = counter(
			"documents_deleted_total",
			"Documents deleted together with their update log",
		)?;
		let state_replacements_total = counter(
			"state_replacements_total",
			"Unconditional full-state replacements",
		)?;
		let updates_applied_total = counter(
			"updates_applied_total",
			"Updates committed to a document and its update log",
		)?;
		let version_conflicts_total = counter(
			"version_conflicts_total",
			"Apply attempts rejected because the base version moved",
		)?;
		let lock_timeouts_total = counter(
			"lock_timeouts_total",
			"Mutations aborted while waiting for a document row lock",
		)?;
		let duplicate_clocks_total = counter(
			"duplicate_clocks_total",
			"Apply attempts that found their clock already logged",
		)?;
		let apply_failures_total = counter(
			"apply_failures_total",
			"Apply attempts that failed for any other reason",
		)?;
		let apply_retries_total = counter(
			"apply_retries_total",
			"Rebase-and-retry attempts after a retryable failure",
		)?;

		let apply_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"apply_duration_seconds",
				"Duration of apply transactions in seconds",
			)
			.namespace(NAMESPACE)
			.subsystem(SUBSYSTEM)
			.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
		)?;
		registry.register(Box::new(apply_duration_seconds.clone()))?;

		Ok(Self {
			registry,
			init_requests_total,
			documents_created_total,
			documents_deleted_total,
			state_replacements_total,
			updates_applied_total,
			version_conflicts_total,
			lock_timeouts_total,
			duplicate_clocks_total,
			apply_failures_total,
			apply_retries_total,
			apply_duration_seconds,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				tracing::warn!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

/// Build the metrics registry shared by the sync service
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}
