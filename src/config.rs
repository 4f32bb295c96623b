//! Dispatcher configuration and validation.

// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	capacity::DEFAULT_COOLDOWN,
	estimate::DEFAULT_ENCODING,
	http::endpoint::Endpoint,
	security,
};

/// Default number of execution attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default timeout applied to each upstream call.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on attempts accepted by validation.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;

/// Quotas and retry settings for one dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
	/// Full URL of the API endpoint, e.g. `https://api.openai.com/v1/chat/completions`.
	pub request_url: Url,
	/// Request quota per minute; fractional values are allowed.
	pub max_requests_per_minute: f64,
	/// Token quota per minute; fractional values are allowed.
	pub max_tokens_per_minute: f64,
	/// tiktoken encoding used to estimate request cost.
	#[serde(default = "default_encoding")]
	pub token_encoding_name: String,
	/// Execution attempts per request, including the first one.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Pause applied to admissions after a throttling signal.
	#[serde(default = "default_cooldown")]
	pub cooldown: Duration,
	/// Timeout applied to each individual call.
	#[serde(default = "default_attempt_timeout")]
	pub attempt_timeout: Duration,
	/// Whether the request URL must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
}
impl DispatchConfig {
	/// Construct a configuration with default retry settings.
	pub fn new(
		request_url: impl AsRef<str>,
		max_requests_per_minute: f64,
		max_tokens_per_minute: f64,
	) -> Result<Self> {
		let request_url = Url::parse(request_url.as_ref())?;

		Ok(Self {
			request_url,
			max_requests_per_minute,
			max_tokens_per_minute,
			token_encoding_name: DEFAULT_ENCODING.into(),
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			cooldown: DEFAULT_COOLDOWN,
			attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
			require_https: true,
		})
	}

	/// Set the attempt budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Set the tiktoken encoding name.
	pub fn with_token_encoding(mut self, encoding: impl Into<String>) -> Self {
		self.token_encoding_name = encoding.into();

		self
	}

	/// Set the post-throttle cooldown.
	pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
		self.cooldown = cooldown;

		self
	}

	/// Set the per-call timeout.
	pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
		self.attempt_timeout = timeout;

		self
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Endpoint category derived from the request URL.
	pub fn endpoint(&self) -> Endpoint {
		Endpoint::from_url(&self.request_url)
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.require_https {
			security::enforce_https(&self.request_url)?;
		}
		if self.request_url.host_str().is_none() {
			return Err(Error::Validation {
				field: "request_url",
				reason: "Must include a host component.".into(),
			});
		}
		if !self.max_requests_per_minute.is_finite() || self.max_requests_per_minute < 1.0 {
			return Err(Error::Validation {
				field: "max_requests_per_minute",
				reason: "Must be a finite value of at least 1.".into(),
			});
		}
		if !self.max_tokens_per_minute.is_finite() || self.max_tokens_per_minute <= 0.0 {
			return Err(Error::Validation {
				field: "max_tokens_per_minute",
				reason: "Must be a finite value greater than zero.".into(),
			});
		}
		if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
			return Err(Error::Validation {
				field: "max_attempts",
				reason: format!("Must be between 1 and {MAX_ATTEMPTS_LIMIT}."),
			});
		}
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.token_encoding_name.trim().is_empty() {
			return Err(Error::Validation {
				field: "token_encoding_name",
				reason: "Must not be empty.".into(),
			});
		}

		Ok(())
	}
}

fn default_encoding() -> String {
	DEFAULT_ENCODING.into()
}

fn default_max_attempts() -> u32 {
	DEFAULT_MAX_ATTEMPTS
}

fn default_cooldown() -> Duration {
	DEFAULT_COOLDOWN
}

fn default_attempt_timeout() -> Duration {
	DEFAULT_ATTEMPT_TIMEOUT
}

fn default_true() -> bool {
	true
}
