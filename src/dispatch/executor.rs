//! Execution of one admitted attempt: call, classify, then finish or re-enqueue.

// crates.io
use http::HeaderValue;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc::UnboundedSender};
use url::Url;
// self
use crate::{
	_prelude::*,
	capacity::CapacityTracker,
	dispatch::{
		record::RequestRecord,
		store::{DispatchOutcome, ResultStore},
	},
	error::CallFailure,
	http::{
		classify::{Classification, ThrottleDetector, classify_response},
		client::post_json,
		endpoint::Endpoint,
	},
	metrics::{self, StatusTracker},
};

/// State shared by every executor of one run.
pub(crate) struct CallContext {
	pub client: Client,
	pub url: Url,
	pub endpoint: Endpoint,
	pub authorization: HeaderValue,
	pub attempt_timeout: Duration,
	pub detector: Arc<dyn ThrottleDetector>,
	pub capacity: Arc<Mutex<CapacityTracker>>,
	pub status: Arc<StatusTracker>,
	pub results: Arc<Mutex<ResultStore>>,
	pub retry_tx: UnboundedSender<RequestRecord>,
}
impl CallContext {
	/// Write a terminal outcome and release the record's in-flight slot.
	pub async fn commit(&self, identity: &str, outcome: DispatchOutcome) {
		let failed = outcome.failed;
		let inserted = { self.results.lock().await.insert(identity, outcome) };

		if !inserted {
			tracing::warn!(identity, "identity already has a terminal outcome; keeping the first");
		}
		if failed {
			self.status.record_failed();
		} else {
			self.status.record_succeeded();
		}

		metrics::record_outcome(self.endpoint.as_str(), failed);
	}
}

/// Perform one attempt for a record whose capacity has already been reserved.
#[tracing::instrument(
	skip(context, record),
	fields(identity = %record.identity(), attempt = record.attempts_used(), cost = record.estimated_cost())
)]
pub(crate) async fn execute(context: Arc<CallContext>, mut record: RequestRecord) {
	let endpoint = context.endpoint.as_str();

	tracing::debug!("starting request");
	metrics::record_attempt(endpoint);

	let classification = match post_json(
		&context.client,
		&context.url,
		&context.authorization,
		record.payload(),
		context.attempt_timeout,
	)
	.await
	{
		Ok(exchange) => {
			metrics::record_call_duration(endpoint, exchange.elapsed);

			classify_response(&context.endpoint, exchange.status, &exchange.body, &*context.detector)
		},
		Err(err) => Classification::Failure { failure: CallFailure::from(err), body: Value::Null },
	};

	match classification {
		Classification::Success(response) => {
			let (identity, outcome) = record.into_success(response);

			context.commit(&identity, outcome).await;

			tracing::debug!("request done");
		},
		Classification::Failure { failure, body } => {
			tracing::warn!(error = %failure, "request attempt failed");

			context.status.record_call_error(&failure);
			metrics::record_call_error(endpoint, &failure);

			if failure.is_throttle() {
				context.capacity.lock().await.note_throttle(Instant::now());
			}

			record.record_failure(failure, body);

			if record.can_retry() {
				match context.retry_tx.send(record) {
					Ok(()) => return,
					Err(returned) => record = returned.0,
				}
			}

			tracing::error!(
				attempts = record.attempts_used(),
				errors = ?record.errors(),
				"request failed after all attempts"
			);

			let (identity, outcome) = record.into_failure();

			context.commit(&identity, outcome).await;
		},
	}
}
