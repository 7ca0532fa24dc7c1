use std::time::Duration;

use crate::config::Settings;

/// Exponential backoff for the rebase-and-retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries after the first attempt.
	pub max_retries: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from_settings(&Settings::default())
	}
}

impl RetryPolicy {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			max_retries: settings.apply_max_retries,
			initial_backoff: Duration::from_millis(settings.retry_backoff_ms),
			max_backoff: Duration::from_millis(settings.retry_backoff_max_ms),
		}
	}

	/// No waiting between attempts.
	pub fn immediate(max_retries: u32) -> Self {
		Self {
			max_retries,
			initial_backoff: Duration::ZERO,
			max_backoff: Duration::ZERO,
		}
	}

	/// Delay before retry number `retry` (1-based): doubles each time, capped.
	pub fn backoff(&self, retry: u32) -> Duration {
		let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
		self.initial_backoff
			.saturating_mul(factor)
			.min(self.max_backoff)
	}
}
