//! Metrics helpers and per-run progress bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::{_prelude::*, error::CallFailure};

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 4]>;

#[cfg(feature = "metrics")]
const METRIC_ATTEMPTS_TOTAL: &str = "quota_dispatch_attempts_total";
#[cfg(feature = "metrics")]
const METRIC_OUTCOMES_TOTAL: &str = "quota_dispatch_outcomes_total";
#[cfg(feature = "metrics")]
const METRIC_CALL_ERRORS_TOTAL: &str = "quota_dispatch_call_errors_total";
#[cfg(feature = "metrics")]
const METRIC_CALL_DURATION: &str = "quota_dispatch_call_duration_seconds";
#[cfg(feature = "metrics")]
const METRIC_COOLDOWNS_TOTAL: &str = "quota_dispatch_cooldowns_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe progress counters for a single dispatch run.
///
/// The run ends once `tasks_in_progress` returns to zero.
#[derive(Debug, Default)]
pub struct StatusTracker {
	tasks_started: AtomicU64,
	tasks_in_progress: AtomicU64,
	tasks_succeeded: AtomicU64,
	tasks_failed: AtomicU64,
	rate_limit_errors: AtomicU64,
	api_errors: AtomicU64,
	other_errors: AtomicU64,
}
impl StatusTracker {
	/// Create a new tracker.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a newly seeded request.
	pub fn record_started(&self) {
		self.tasks_started.fetch_add(1, Ordering::Relaxed);
		self.tasks_in_progress.fetch_add(1, Ordering::AcqRel);
	}

	/// Record a terminal success.
	pub fn record_succeeded(&self) {
		self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
		self.tasks_in_progress.fetch_sub(1, Ordering::AcqRel);
	}

	/// Record a terminal failure.
	pub fn record_failed(&self) {
		self.tasks_failed.fetch_add(1, Ordering::Relaxed);
		self.tasks_in_progress.fetch_sub(1, Ordering::AcqRel);
	}

	/// Count a failed attempt under its error class.
	pub fn record_call_error(&self, failure: &CallFailure) {
		let counter = match failure {
			CallFailure::Throttled { .. } => &self.rate_limit_errors,
			CallFailure::Api { .. } => &self.api_errors,
			CallFailure::Transport { .. } => &self.other_errors,
		};

		counter.fetch_add(1, Ordering::Relaxed);
	}

	/// Records not yet terminal.
	pub fn in_progress(&self) -> u64 {
		self.tasks_in_progress.load(Ordering::Acquire)
	}

	/// Take a point-in-time snapshot for reporting.
	pub fn snapshot(&self) -> StatusSnapshot {
		StatusSnapshot {
			tasks_started: self.tasks_started.load(Ordering::Relaxed),
			tasks_in_progress: self.tasks_in_progress.load(Ordering::Acquire),
			tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
			tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
			rate_limit_errors: self.rate_limit_errors.load(Ordering::Relaxed),
			api_errors: self.api_errors.load(Ordering::Relaxed),
			other_errors: self.other_errors.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of run progress counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
	/// Requests seeded into the run.
	pub tasks_started: u64,
	/// Requests that have not reached a terminal outcome.
	pub tasks_in_progress: u64,
	/// Requests that finished successfully.
	pub tasks_succeeded: u64,
	/// Requests that exhausted their attempts.
	pub tasks_failed: u64,
	/// Attempts rejected by provider throttling.
	pub rate_limit_errors: u64,
	/// Attempts rejected with other provider errors.
	pub api_errors: u64,
	/// Attempts that failed in transport or decoding.
	pub other_errors: u64,
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder()?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record an admitted execution attempt.
#[cfg(feature = "metrics")]
pub fn record_attempt(endpoint: &str) {
	metrics::counter!(METRIC_ATTEMPTS_TOTAL, base_labels(endpoint).iter()).increment(1);
}

/// Record the latency of a completed exchange.
#[cfg(feature = "metrics")]
pub fn record_call_duration(endpoint: &str, duration: Duration) {
	metrics::histogram!(METRIC_CALL_DURATION, base_labels(endpoint).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed attempt tagged with its error class.
#[cfg(feature = "metrics")]
pub fn record_call_error(endpoint: &str, failure: &CallFailure) {
	metrics::counter!(
		METRIC_CALL_ERRORS_TOTAL,
		tagged_labels(endpoint, "kind", failure_kind(failure)).iter()
	)
	.increment(1);
}

/// Record a terminal outcome.
#[cfg(feature = "metrics")]
pub fn record_outcome(endpoint: &str, failed: bool) {
	let status = if failed { "failed" } else { "success" };

	metrics::counter!(METRIC_OUTCOMES_TOTAL, tagged_labels(endpoint, "status", status).iter())
		.increment(1);
}

/// Record an admission pause caused by a throttling cooldown.
#[cfg(feature = "metrics")]
pub fn record_cooldown(endpoint: &str) {
	metrics::counter!(METRIC_COOLDOWNS_TOTAL, base_labels(endpoint).iter()).increment(1);
}

/// Record an admitted execution attempt.
#[cfg(not(feature = "metrics"))]
pub fn record_attempt(_endpoint: &str) {}

/// Record the latency of a completed exchange.
#[cfg(not(feature = "metrics"))]
pub fn record_call_duration(_endpoint: &str, _duration: Duration) {}

/// Record a failed attempt tagged with its error class.
#[cfg(not(feature = "metrics"))]
pub fn record_call_error(_endpoint: &str, _failure: &CallFailure) {}

/// Record a terminal outcome.
#[cfg(not(feature = "metrics"))]
pub fn record_outcome(_endpoint: &str, _failed: bool) {}

/// Record an admission pause caused by a throttling cooldown.
#[cfg(not(feature = "metrics"))]
pub fn record_cooldown(_endpoint: &str) {}

/// Label value used for a failure's error class.
pub fn failure_kind(failure: &CallFailure) -> &'static str {
	match failure {
		CallFailure::Throttled { .. } => "throttled",
		CallFailure::Api { .. } => "api",
		CallFailure::Transport { .. } => "transport",
	}
}

#[cfg(feature = "metrics")]
fn base_labels(endpoint: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("endpoint", endpoint.to_owned()));

	labels
}

#[cfg(feature = "metrics")]
fn tagged_labels(endpoint: &str, key: &'static str, value: &'static str) -> LabelSet {
	let mut labels = base_labels(endpoint);

	labels.push(Label::new(key, value));

	labels
}
