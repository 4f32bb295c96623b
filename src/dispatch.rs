//! Admission-controlled dispatch of API calls under request and token quotas.
//!
//! A run seeds one [`RequestRecord`](record::RequestRecord) per submitted request, admits records
//! against a [`CapacityTracker`], executes admitted calls concurrently, and returns once every
//! record has a terminal outcome in the [`ResultStore`](store::ResultStore).

pub mod record;
pub mod store;

mod executor;

// std
use std::{
	collections::{HashMap, VecDeque},
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use http::HeaderValue;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::{
	sync::{Mutex, mpsc},
	task::{self, JoinError, JoinSet},
	time,
};
// self
use crate::{
	_prelude::*,
	capacity::{CapacitySnapshot, CapacityTracker},
	config::DispatchConfig,
	dispatch::{
		executor::CallContext,
		record::{DispatchRequest, InFlight, RequestRecord},
		store::ResultStore,
	},
	error::CallFailure,
	estimate::TokenEstimator,
	http::{
		classify::{MarkerThrottleDetector, ThrottleDetector},
		client,
		endpoint::Endpoint,
	},
	metrics::{self, StatusSnapshot, StatusTracker},
	security::ApiKey,
};

/// Shortest pause taken while waiting for capacity to refill.
pub const MIN_ADMISSION_WAIT: Duration = Duration::from_millis(1);

/// Everything a finished run produced.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchReport {
	/// Terminal outcome per identity.
	pub results: ResultStore,
	/// Progress counters at the end of the run.
	pub status: StatusSnapshot,
	/// Budgets left at the end of the run.
	pub capacity: CapacitySnapshot,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
	config: DispatchConfig,
	api_key: Option<ApiKey>,
	client: Option<Client>,
	detector: Option<Arc<dyn ThrottleDetector>>,
}
impl DispatcherBuilder {
	/// Start from a configuration.
	pub fn new(config: DispatchConfig) -> Self {
		Self { config, api_key: None, client: None, detector: None }
	}

	/// Credential sent as a bearer token on every call.
	pub fn api_key(mut self, api_key: ApiKey) -> Self {
		self.api_key = Some(api_key);

		self
	}

	/// Use the supplied HTTP client instead of the default one.
	pub fn client(mut self, client: Client) -> Self {
		self.client = Some(client);

		self
	}

	/// Replace the default `Rate limit` / 429 throttling predicate.
	pub fn throttle_detector(mut self, detector: impl ThrottleDetector + 'static) -> Self {
		self.detector = Some(Arc::new(detector));

		self
	}

	/// Validate the configuration, load the token encoding and construct the [`Dispatcher`].
	pub fn build(self) -> Result<Dispatcher> {
		self.config.validate()?;

		let api_key = self.api_key.ok_or_else(|| Error::Validation {
			field: "api_key",
			reason: "An API key is required.".into(),
		})?;
		let authorization = api_key.bearer_header()?;
		let estimator = TokenEstimator::new(&self.config.token_encoding_name)?;
		let endpoint = self.config.endpoint();
		let client = match self.client {
			Some(client) => client,
			None => client::default_client()?,
		};
		let detector =
			self.detector.unwrap_or_else(|| Arc::new(MarkerThrottleDetector::default()));

		Ok(Dispatcher {
			config: Arc::new(self.config),
			endpoint,
			estimator,
			client,
			authorization,
			detector,
		})
	}
}
impl Debug for DispatcherBuilder {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("DispatcherBuilder")
			.field("config", &self.config)
			.field("api_key", &self.api_key)
			.finish_non_exhaustive()
	}
}

/// Rate-limited dispatcher for one API endpoint.
///
/// Every run owns its own capacity budgets and result store, so runs never leak into each other.
#[derive(Clone)]
pub struct Dispatcher {
	config: Arc<DispatchConfig>,
	endpoint: Endpoint,
	estimator: TokenEstimator,
	client: Client,
	authorization: HeaderValue,
	detector: Arc<dyn ThrottleDetector>,
}
impl Dispatcher {
	/// Create a [`DispatcherBuilder`] for the given configuration.
	pub fn builder(config: DispatchConfig) -> DispatcherBuilder {
		DispatcherBuilder::new(config)
	}

	/// Active configuration.
	pub fn config(&self) -> &DispatchConfig {
		&self.config
	}

	/// Endpoint category derived from the request URL.
	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	/// Estimator used to price requests.
	pub fn estimator(&self) -> &TokenEstimator {
		&self.estimator
	}

	/// Dispatch a single request and return its one-entry result store.
	pub async fn dispatch(&self, identity: impl Into<String>, payload: Value) -> Result<ResultStore> {
		let request = DispatchRequest::new(payload).with_identity(identity);

		Ok(self.run(vec![request]).await?.results)
	}

	/// Dispatch a batch until every request has reached a terminal outcome.
	///
	/// Errors are only returned while seeding: an unsupported endpoint, a malformed payload, or a
	/// request whose cost can never fit the token quota. Call failures end up in the report.
	///
	/// Queued retries take priority over fresh requests whenever a new candidate is picked. A
	/// candidate already waiting for capacity keeps its place until it is admitted.
	#[tracing::instrument(
		skip(self, requests),
		fields(endpoint = %self.endpoint, requests = requests.len())
	)]
	pub async fn run(&self, requests: Vec<DispatchRequest>) -> Result<DispatchReport> {
		let mut pending = self.seed(requests)?;
		let status = StatusTracker::new();

		for _ in &pending {
			status.record_started();
		}

		let capacity = Arc::new(Mutex::new(CapacityTracker::new(
			self.config.max_requests_per_minute,
			self.config.max_tokens_per_minute,
			self.config.cooldown,
			Instant::now(),
		)));
		let results = Arc::new(Mutex::new(ResultStore::new()));
		let (retry_tx, mut retry_rx) = mpsc::unbounded_channel();
		let context = Arc::new(CallContext {
			client: self.client.clone(),
			url: self.config.request_url.clone(),
			endpoint: self.endpoint.clone(),
			authorization: self.authorization.clone(),
			attempt_timeout: self.config.attempt_timeout,
			detector: self.detector.clone(),
			capacity: capacity.clone(),
			status: status.clone(),
			results: results.clone(),
			retry_tx,
		});
		let mut tasks = JoinSet::new();
		let mut executing = HashMap::new();
		let mut next: Option<RequestRecord> = None;

		tracing::debug!(records = pending.len(), "initialization complete");

		loop {
			while let Some(joined) = tasks.try_join_next_with_id() {
				reap(joined, &mut executing, &context).await;
			}

			if next.is_none() {
				next = retry_rx.try_recv().ok().or_else(|| pending.pop_front());
			}
			if status.in_progress() == 0 {
				break;
			}

			let now = Instant::now();
			let cooldown = { capacity.lock().await.cooldown_remaining(now) };

			if !cooldown.is_zero() {
				let resume_at =
					Utc::now() + TimeDelta::from_std(cooldown).unwrap_or_else(|_| TimeDelta::zero());

				tracing::warn!(?cooldown, %resume_at, "pausing to cool down after rate limit");
				metrics::record_cooldown(self.endpoint.as_str());
				time::sleep(cooldown).await;

				continue;
			}

			let Some(mut record) = next.take() else {
				tokio::select! {
					Some(record) = retry_rx.recv() => next = Some(record),
					Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() =>
						reap(joined, &mut executing, &context).await,
				}

				continue;
			};
			let admission = {
				let mut capacity = capacity.lock().await;

				capacity.refill(now);

				if capacity.try_reserve(record.estimated_cost()) {
					None
				} else {
					Some(capacity.wait_for(record.estimated_cost()))
				}
			};

			match admission {
				None => {
					let attempt = record.begin_attempt();

					tracing::debug!(
						identity = record.identity(),
						attempt,
						cost = record.estimated_cost(),
						"admitted request"
					);

					let in_flight = record.in_flight();
					let handle = tasks.spawn(executor::execute(context.clone(), record));

					executing.insert(handle.id(), in_flight);
				},
				Some(wait) => {
					let wait = wait.unwrap_or(MIN_ADMISSION_WAIT).max(MIN_ADMISSION_WAIT);

					tracing::trace!(identity = record.identity(), ?wait, "waiting for capacity");

					next = Some(record);

					time::sleep(wait).await;
				},
			}
		}

		while let Some(joined) = tasks.join_next_with_id().await {
			reap(joined, &mut executing, &context).await;
		}

		let status = status.snapshot();
		let capacity = {
			let mut capacity = capacity.lock().await;

			capacity.refill(Instant::now());
			capacity.snapshot()
		};
		let results = std::mem::take(&mut *results.lock().await);

		log_summary(&status);

		Ok(DispatchReport { results, status, capacity })
	}

	fn seed(&self, requests: Vec<DispatchRequest>) -> Result<VecDeque<RequestRecord>> {
		let mut pending = VecDeque::with_capacity(requests.len());

		for request in requests {
			let record = RequestRecord::seed(request, self.config.max_attempts, |payload| {
				self.estimator.estimate(payload, &self.endpoint)
			})?;

			if record.estimated_cost() as f64 > self.config.max_tokens_per_minute {
				return Err(Error::Validation {
					field: "max_tokens_per_minute",
					reason: format!(
						"Request '{}' needs {} tokens, more than the per-minute quota of {}.",
						record.identity(),
						record.estimated_cost(),
						self.config.max_tokens_per_minute
					),
				});
			}

			tracing::trace!(identity = record.identity(), cost = record.estimated_cost(), "seeded request");

			pending.push_back(record);
		}

		Ok(pending)
	}
}
impl Debug for Dispatcher {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Dispatcher")
			.field("config", &self.config)
			.field("endpoint", &self.endpoint)
			.field("estimator", &self.estimator)
			.finish_non_exhaustive()
	}
}

/// Settle a finished executor task; a task that died without reporting fails its record.
async fn reap(
	joined: std::result::Result<(task::Id, ()), JoinError>,
	executing: &mut HashMap<task::Id, InFlight>,
	context: &CallContext,
) {
	match joined {
		Ok((id, ())) => {
			executing.remove(&id);
		},
		Err(err) => {
			let Some(in_flight) = executing.remove(&err.id()) else {
				return;
			};

			tracing::error!(identity = %in_flight.identity, error = %err, "executor task ended abnormally");

			let failure = CallFailure::Transport {
				message: format!("Executor task ended abnormally: {err}."),
			};
			let (identity, outcome) = in_flight.into_failure(failure);

			context.commit(&identity, outcome).await;
		},
	}
}

fn log_summary(status: &StatusSnapshot) {
	tracing::info!(
		succeeded = status.tasks_succeeded,
		failed = status.tasks_failed,
		"parallel processing complete"
	);

	if status.tasks_failed > 0 {
		tracing::warn!(
			"{} / {} requests failed.",
			status.tasks_failed,
			status.tasks_started
		);
	}
	if status.rate_limit_errors > 0 {
		tracing::warn!(
			"{} rate limit errors received; consider running at a lower rate.",
			status.rate_limit_errors
		);
	}
}
