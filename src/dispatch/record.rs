//! Request records tracked through admission, execution and retry.

// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::{_prelude::*, dispatch::store::DispatchOutcome, error::CallFailure};

/// Payload key holding caller metadata that must not be sent upstream.
pub const METADATA_KEY: &str = "metadata";

/// A logical API call submitted to a dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
	/// Result Store key; generated when absent.
	#[serde(default)]
	pub identity: Option<String>,
	/// JSON body sent to the endpoint.
	pub payload: Value,
	/// Opaque passthrough attached to the terminal outcome.
	#[serde(default)]
	pub metadata: Option<Value>,
}
impl DispatchRequest {
	/// Create a request with a generated identity.
	pub fn new(payload: Value) -> Self {
		Self { identity: None, payload, metadata: None }
	}

	/// Set the identity used as the Result Store key.
	pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
		self.identity = Some(identity.into());

		self
	}

	/// Attach caller metadata.
	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);

		self
	}
}

/// Generate a random 128-bit hex identity.
pub fn generate_identity() -> String {
	format!("{:032x}", rand::random::<u128>())
}

/// Unit of work moving through the dispatcher.
///
/// A record is owned by exactly one place at a time: the pending queue, the retry channel, or an
/// executing task. It is consumed when its terminal outcome is produced.
#[derive(Debug)]
pub struct RequestRecord {
	identity: Arc<str>,
	payload: Arc<Value>,
	metadata: Option<Value>,
	estimated_cost: u64,
	max_attempts: u32,
	attempts_remaining: u32,
	errors: Vec<CallFailure>,
	last_response: Value,
}
impl RequestRecord {
	/// Seed a record, stripping inline metadata from the payload and estimating its cost once.
	pub fn seed<F>(request: DispatchRequest, max_attempts: u32, estimate: F) -> Result<Self>
	where
		F: FnOnce(&Value) -> Result<u64>,
	{
		let DispatchRequest { identity, mut payload, metadata } = request;
		let inline_metadata = payload.as_object_mut().and_then(|body| body.remove(METADATA_KEY));
		let metadata = metadata.or(inline_metadata);
		let estimated_cost = estimate(&payload)?;
		let identity = identity.unwrap_or_else(generate_identity);

		Ok(Self {
			identity: Arc::from(identity),
			payload: Arc::new(payload),
			metadata,
			estimated_cost,
			max_attempts,
			attempts_remaining: max_attempts,
			errors: Vec::new(),
			last_response: Value::Null,
		})
	}

	/// Result Store key.
	pub fn identity(&self) -> &str {
		&self.identity
	}

	/// Body sent upstream.
	pub fn payload(&self) -> &Value {
		&self.payload
	}

	/// Token cost charged on every admission.
	pub fn estimated_cost(&self) -> u64 {
		self.estimated_cost
	}

	/// Attempts left before the record fails terminally.
	pub fn attempts_remaining(&self) -> u32 {
		self.attempts_remaining
	}

	/// Attempts consumed so far.
	pub fn attempts_used(&self) -> u32 {
		self.max_attempts - self.attempts_remaining
	}

	/// Failures accumulated across attempts, oldest first.
	pub fn errors(&self) -> &[CallFailure] {
		&self.errors
	}

	/// Consume one attempt at admission; returns the 1-based attempt number.
	pub fn begin_attempt(&mut self) -> u32 {
		self.attempts_remaining = self.attempts_remaining.saturating_sub(1);

		self.attempts_used()
	}

	/// Append a failed attempt and remember the body that came with it.
	pub fn record_failure(&mut self, failure: CallFailure, body: Value) {
		self.errors.push(failure);
		self.last_response = body;
	}

	/// Whether another attempt is permitted.
	pub fn can_retry(&self) -> bool {
		self.attempts_remaining > 0
	}

	/// Identity, payload and metadata retained while the record executes.
	pub fn in_flight(&self) -> InFlight {
		InFlight {
			identity: self.identity.clone(),
			payload: self.payload.clone(),
			metadata: self.metadata.clone(),
		}
	}

	/// Produce the successful terminal outcome.
	pub fn into_success(self, response: Value) -> (Arc<str>, DispatchOutcome) {
		let outcome = DispatchOutcome {
			request: Arc::unwrap_or_clone(self.payload),
			response,
			failed: false,
			errors: self.errors,
			metadata: self.metadata,
			completed_at: Utc::now(),
		};

		(self.identity, outcome)
	}

	/// Produce the failed terminal outcome carrying the full error trail.
	pub fn into_failure(self) -> (Arc<str>, DispatchOutcome) {
		let outcome = DispatchOutcome {
			request: Arc::unwrap_or_clone(self.payload),
			response: self.last_response,
			failed: true,
			errors: self.errors,
			metadata: self.metadata,
			completed_at: Utc::now(),
		};

		(self.identity, outcome)
	}
}

/// Parts of a record kept by the dispatch loop while an executor owns it.
#[derive(Clone, Debug)]
pub struct InFlight {
	/// Result Store key.
	pub identity: Arc<str>,
	/// Body sent upstream.
	pub payload: Arc<Value>,
	/// Caller metadata.
	pub metadata: Option<Value>,
}
impl InFlight {
	/// Failed outcome for an execution that ended without reporting back.
	pub fn into_failure(self, failure: CallFailure) -> (Arc<str>, DispatchOutcome) {
		let outcome = DispatchOutcome {
			request: Arc::unwrap_or_clone(self.payload),
			response: Value::Null,
			failed: true,
			errors: vec![failure],
			metadata: self.metadata,
			completed_at: Utc::now(),
		};

		(self.identity, outcome)
	}
}
