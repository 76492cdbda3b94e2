//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::mutation::RetryPolicy;

/// Engine settings with sensible defaults; deserializable from the host's
/// config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Group every user falls back to when holding no memberships.
	pub default_group: Box<str>,
	/// Fallback poll interval for the update coordinator, in seconds.
	pub sync_interval_secs: u64,
	/// Deadline for a single store operation, in milliseconds.
	pub store_timeout_ms: u64,
	/// Exponential backoff bounds for store/messaging retries, in
	/// milliseconds.
	pub store_retry_min_ms: u64,
	pub store_retry_max_ms: u64,
	/// Retry attempts after the first failure.
	pub store_retry_times: u16,
	/// Capacity of the username lookup cache.
	pub username_cache_size: usize,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			default_group: "default".into(),
			sync_interval_secs: 60,
			store_timeout_ms: 5000,
			store_retry_min_ms: 50,
			store_retry_max_ms: 2000,
			store_retry_times: 3,
			username_cache_size: 1000,
		}
	}
}

impl Settings {
	pub fn store_timeout(&self) -> Duration {
		Duration::from_millis(self.store_timeout_ms)
	}

	pub fn sync_interval(&self) -> Duration {
		Duration::from_secs(self.sync_interval_secs.max(1))
	}

	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::new((self.store_retry_min_ms, self.store_retry_max_ms), self.store_retry_times)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let settings = Settings::default();
		assert_eq!(settings.default_group.as_ref(), "default");
		assert_eq!(settings.sync_interval(), Duration::from_secs(60));
	}

	#[test]
	fn test_partial_config() {
		let settings: Settings =
			serde_json::from_str(r#"{"default_group":"member","sync_interval_secs":5}"#).unwrap();
		assert_eq!(settings.default_group.as_ref(), "member");
		assert_eq!(settings.sync_interval_secs, 5);
		// untouched fields keep their defaults
		assert_eq!(settings.store_timeout_ms, 5000);
	}

	#[test]
	fn test_sync_interval_floor() {
		let settings = Settings { sync_interval_secs: 0, ..Settings::default() };
		assert_eq!(settings.sync_interval(), Duration::from_secs(1));
	}
}

// vim: ts=4
