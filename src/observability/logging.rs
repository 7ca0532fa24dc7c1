use log::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging to stdout with contextual fields.
///
/// `RUST_LOG` takes precedence; otherwise everything at `level` and above is
/// emitted.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
	let default_directive = level.as_str().to_ascii_lowercase();
	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(&default_directive))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	// Span fields carry the document id of the store operation in flight
	let json_layer = tracing_subscriber::fmt::layer()
		.json()
		.with_current_span(true)
		.with_span_list(true)
		.with_target(true)
		.with_level(true)
		.with_thread_ids(true)
		.with_file(true)
		.with_line_number(true);

	tracing_subscriber::registry()
		.with(env_filter)
		.with(json_layer)
		.try_init()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
