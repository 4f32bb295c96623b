//! Response classification and throttling detection.

// crates.io
use http::StatusCode;
use serde_json::Value;
// self
use crate::{error::CallFailure, http::endpoint::Endpoint};

/// Marker used by OpenAI-style providers when a rate limit rejects a call.
pub const DEFAULT_THROTTLE_MARKER: &str = "Rate limit";

const MAX_RAW_BODY_CHARS: usize = 256;

/// Predicate deciding whether a provider error is a throttling signal.
///
/// The wording of rate-limit errors belongs to the provider, so dispatchers take the predicate as
/// configuration. Closures of the same shape implement the trait.
pub trait ThrottleDetector
where
	Self: Send + Sync,
{
	/// Inspect the response status and provider error message.
	fn is_throttled(&self, status: StatusCode, message: &str) -> bool;
}
impl<F> ThrottleDetector for F
where
	F: Fn(StatusCode, &str) -> bool + Send + Sync,
{
	fn is_throttled(&self, status: StatusCode, message: &str) -> bool {
		self(status, message)
	}
}

/// Substring-based detector, optionally treating `429 Too Many Requests` as throttling.
#[derive(Clone, Debug)]
pub struct MarkerThrottleDetector {
	markers: Vec<String>,
	too_many_requests: bool,
}
impl MarkerThrottleDetector {
	/// Match any of the given case-sensitive substrings; status 429 also counts.
	pub fn new<I, S>(markers: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			markers: markers.into_iter().map(Into::into).filter(|m: &String| !m.is_empty()).collect(),
			too_many_requests: true,
		}
	}

	/// Toggle whether status 429 alone is treated as throttling.
	pub fn with_too_many_requests(mut self, enabled: bool) -> Self {
		self.too_many_requests = enabled;

		self
	}
}
impl Default for MarkerThrottleDetector {
	fn default() -> Self {
		Self::new([DEFAULT_THROTTLE_MARKER])
	}
}
impl ThrottleDetector for MarkerThrottleDetector {
	fn is_throttled(&self, status: StatusCode, message: &str) -> bool {
		(self.too_many_requests && status == StatusCode::TOO_MANY_REQUESTS)
			|| self.markers.iter().any(|marker| message.contains(marker.as_str()))
	}
}

/// Outcome of a single exchange after classification.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
	/// Canonical payload extracted from a successful response.
	Success(Value),
	/// Retryable failure together with the raw body the provider returned.
	Failure {
		/// Classified failure descriptor.
		failure: CallFailure,
		/// Decoded response body, or `Null` when none was readable.
		body: Value,
	},
}

/// Classify a completed HTTP exchange.
pub fn classify_response(
	endpoint: &Endpoint,
	status: StatusCode,
	body: &[u8],
	detector: &dyn ThrottleDetector,
) -> Classification {
	let value = match serde_json::from_slice::<Value>(body) {
		Ok(value) => value,
		Err(err) if status.is_success() => {
			return Classification::Failure {
				failure: CallFailure::Transport {
					message: format!("Undecodable response body: {err}."),
				},
				body: Value::Null,
			};
		},
		Err(_) => {
			let message = truncated_text(body);

			return Classification::Failure {
				failure: failure_for(status, message, detector),
				body: Value::Null,
			};
		},
	};

	if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
		let message = error
			.get("message")
			.and_then(Value::as_str)
			.map(str::to_owned)
			.or_else(|| error.as_str().map(str::to_owned))
			.unwrap_or_else(|| error.to_string());

		return Classification::Failure { failure: failure_for(status, message, detector), body: value };
	}
	if !status.is_success() {
		let message = format!("Unexpected status {status} without an error object.");

		return Classification::Failure { failure: failure_for(status, message, detector), body: value };
	}

	Classification::Success(extract_payload(endpoint, value))
}

/// Reduce a successful response to the canonical payload for its endpoint.
pub fn extract_payload(endpoint: &Endpoint, response: Value) -> Value {
	let pointer = match endpoint {
		Endpoint::ChatCompletions => "/choices/0/message/content",
		Endpoint::Completions => "/choices/0/text",
		Endpoint::Embeddings | Endpoint::Other(_) => return response,
	};

	response.pointer(pointer).cloned().unwrap_or(Value::Null)
}

fn failure_for(status: StatusCode, message: String, detector: &dyn ThrottleDetector) -> CallFailure {
	if detector.is_throttled(status, &message) {
		CallFailure::Throttled { status: status.as_u16(), message }
	} else {
		CallFailure::Api { status: status.as_u16(), message }
	}
}

fn truncated_text(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);
	let mut truncated: String = text.chars().take(MAX_RAW_BODY_CHARS).collect();

	if text.chars().count() > MAX_RAW_BODY_CHARS {
		truncated.push('…');
	}

	truncated
}
