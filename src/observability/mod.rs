pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};

use std::sync::Arc;

use crate::config::Settings;

/// Process-wide observability handles.
pub struct ObservabilityState {
	pub metrics: Arc<MetricsRegistry>,
}

/// Initialize logging and the metrics registry.
pub fn init_observability(settings: &Settings) -> anyhow::Result<ObservabilityState> {
	init_logging(settings.log_level)?;
	let metrics = init_metrics()?;

	tracing::info!(
		component = "observability",
		log_level = %settings.log_level,
		"Observability initialized: structured logging and metrics enabled"
	);

	Ok(ObservabilityState { metrics })
}
