//! Async request dispatcher that keeps OpenAI-style API calls inside per-minute request and token
//! quotas, pausing after provider throttling and retrying recoverable failures.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod capacity;
pub mod config;
pub mod dispatch;
pub mod estimate;
pub mod http;
pub mod metrics;
pub mod security;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	capacity::{CapacitySnapshot, CapacityTracker, DEFAULT_COOLDOWN},
	config::DispatchConfig,
	dispatch::{
		DispatchReport, Dispatcher, DispatcherBuilder,
		record::{DispatchRequest, RequestRecord},
		store::{DispatchOutcome, ResultStore},
	},
	error::{CallFailure, Error, Result},
	estimate::TokenEstimator,
	http::{
		classify::{MarkerThrottleDetector, ThrottleDetector},
		endpoint::Endpoint,
	},
	metrics::{StatusSnapshot, StatusTracker},
	security::ApiKey,
};
