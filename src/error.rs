//! Crate-wide error types and `Result` alias.

// crates.io
use serde::{Deserialize, Serialize};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the dispatcher crate.
///
/// These errors only surface while building a dispatcher or priming a run. Failures of individual
/// calls are recorded as [`CallFailure`]s on the affected outcome instead.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[cfg(feature = "prometheus")]
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Tokenizer error: {0}")]
	Tokenizer(String),
	#[error("API endpoint '{endpoint}' is not supported by the token estimator.")]
	UnsupportedEndpoint { endpoint: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
#[cfg(feature = "prometheus")]
impl From<metrics_exporter_prometheus::BuildError> for Error {
	fn from(value: metrics_exporter_prometheus::BuildError) -> Self {
		Self::Metrics(value.to_string())
	}
}

/// Failure descriptor captured for a single execution attempt.
///
/// Every variant is retryable; a record only fails terminally once its attempts run out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallFailure {
	/// The provider signalled that a rate limit was exceeded.
	#[error("Rate limited by provider (status {status}): {message}")]
	Throttled {
		/// HTTP status returned with the rejection.
		status: u16,
		/// Provider supplied error message.
		message: String,
	},
	/// The provider returned a structured, non-throttling error.
	#[error("Provider error (status {status}): {message}")]
	Api {
		/// HTTP status returned with the error.
		status: u16,
		/// Provider supplied error message.
		message: String,
	},
	/// The exchange itself failed or produced an unreadable response.
	#[error("Transport error: {message}")]
	Transport {
		/// Description of what went wrong.
		message: String,
	},
}
impl CallFailure {
	/// Whether this failure should start the post-throttle cooldown.
	pub fn is_throttle(&self) -> bool {
		matches!(self, Self::Throttled { .. })
	}
}
impl From<reqwest::Error> for CallFailure {
	fn from(value: reqwest::Error) -> Self {
		Self::Transport { message: value.to_string() }
	}
}
