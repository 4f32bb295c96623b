//! Terminal outcomes of a dispatch run, keyed by request identity.

// std
use std::collections::{HashMap, hash_map::Entry};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::{_prelude::*, error::CallFailure};

/// Final result for one request identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
	/// Payload that was sent upstream.
	pub request: Value,
	/// Canonical response on success; the last raw error body (or `null`) on failure.
	pub response: Value,
	/// Whether the request exhausted its attempts.
	#[serde(rename = "errors_flag")]
	pub failed: bool,
	/// Failures observed across attempts, oldest first.
	#[serde(default)]
	pub errors: Vec<CallFailure>,
	/// Caller metadata, passed through verbatim.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
	/// When the outcome became terminal.
	pub completed_at: DateTime<Utc>,
}

/// Write-once map from request identity to terminal outcome.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultStore {
	entries: HashMap<String, DispatchOutcome>,
}
impl ResultStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a terminal outcome unless the identity already has one.
	///
	/// Returns `false` and leaves the existing entry untouched on a repeated identity.
	pub fn insert(&mut self, identity: impl Into<String>, outcome: DispatchOutcome) -> bool {
		match self.entries.entry(identity.into()) {
			Entry::Occupied(_) => false,
			Entry::Vacant(slot) => {
				slot.insert(outcome);

				true
			},
		}
	}

	/// Outcome recorded for an identity.
	pub fn get(&self, identity: &str) -> Option<&DispatchOutcome> {
		self.entries.get(identity)
	}

	/// Whether the identity has reached a terminal outcome.
	pub fn contains(&self, identity: &str) -> bool {
		self.entries.contains_key(identity)
	}

	/// Number of terminal outcomes.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether no outcome has been recorded.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Iterate over identities and outcomes in arbitrary order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &DispatchOutcome)> {
		self.entries.iter().map(|(identity, outcome)| (identity.as_str(), outcome))
	}

	/// Count outcomes flagged as failed.
	pub fn failed_count(&self) -> usize {
		self.entries.values().filter(|outcome| outcome.failed).count()
	}

	/// Consume the store into its underlying map.
	pub fn into_inner(self) -> HashMap<String, DispatchOutcome> {
		self.entries
	}
}
