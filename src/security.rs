//! Security utilities covering HTTPS enforcement and API credential handling.
//!
//! # Threat Model
//! Bearer credentials travel with every dispatched call. These helpers keep them off plaintext
//! transports and out of logs; they do not attempt to manage or rotate secrets.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use http::HeaderValue;
use serde::Deserialize;
use url::Url;
// self
use crate::_prelude::*;

/// Bearer credential attached to every upstream call.
///
/// `Debug` output is redacted so the key never lands in traces.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ApiKey {
	secret: Arc<str>,
}
impl ApiKey {
	/// Wrap a raw key after checking that it can be carried in an HTTP header.
	pub fn new(value: impl AsRef<str>) -> Result<Self> {
		let trimmed = value.as_ref().trim();

		if trimmed.is_empty() {
			return Err(Error::Validation { field: "api_key", reason: "Must not be empty.".into() });
		}
		if !trimmed.bytes().all(|b| b.is_ascii_graphic()) {
			return Err(Error::Validation {
				field: "api_key",
				reason: "May only contain visible ASCII characters.".into(),
			});
		}

		Ok(Self { secret: Arc::from(trimmed) })
	}

	/// Build the `Authorization` header value, flagged as sensitive.
	pub fn bearer_header(&self) -> Result<HeaderValue> {
		let mut value = HeaderValue::from_str(&format!("Bearer {}", self.secret)).map_err(|err| {
			Error::Validation { field: "api_key", reason: format!("Invalid header value: {err}.") }
		})?;

		value.set_sensitive(true);

		Ok(value)
	}

	/// Expose the raw secret.
	pub fn expose(&self) -> &str {
		&self.secret
	}
}
impl Debug for ApiKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		// Keys are ASCII-only, so byte slicing stays on char boundaries.
		if self.secret.len() > 8 {
			write!(f, "ApiKey(***{})", &self.secret[self.secret.len() - 4..])
		} else {
			f.write_str("ApiKey(***)")
		}
	}
}
impl TryFrom<String> for ApiKey {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		Self::new(value)
	}
}

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Upstream URL {url} must use HTTPS.")))
	}
}
