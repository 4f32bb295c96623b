//! HTTP client integration for dispatched API calls.

// crates.io
use http::{
	HeaderValue, StatusCode,
	header::{ACCEPT, AUTHORIZATION},
};
use reqwest::Client;
use serde_json::Value;
use url::Url;
// self
use crate::_prelude::*;

/// Raw result of one upstream exchange, before classification.
#[derive(Clone, Debug)]
pub struct HttpExchange {
	/// Status returned by the upstream.
	pub status: StatusCode,
	/// Undecoded response body.
	pub body: Vec<u8>,
	/// Round-trip duration of the exchange.
	pub elapsed: Duration,
}

/// Build the default reqwest client used by dispatchers.
pub fn default_client() -> Result<Client> {
	Client::builder()
		.user_agent(format!("quota-dispatch/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(10))
		.build()
		.map_err(Error::from)
}

/// POST a JSON payload with bearer authorization.
///
/// Only transport-level problems are returned as errors; any status code, including failures,
/// comes back as an [`HttpExchange`] for the classifier to judge.
pub async fn post_json(
	client: &Client,
	url: &Url,
	authorization: &HeaderValue,
	payload: &Value,
	attempt_timeout: Duration,
) -> std::result::Result<HttpExchange, reqwest::Error> {
	let start = Instant::now();
	let response = client
		.post(url.clone())
		.header(AUTHORIZATION, authorization.clone())
		.header(ACCEPT, "application/json")
		.json(payload)
		.timeout(attempt_timeout)
		.send()
		.await?;
	let status = response.status();
	let body = response.bytes().await?.to_vec();
	let elapsed = start.elapsed();

	tracing::debug!(%url, %status, elapsed = ?elapsed, bytes = body.len(), "upstream exchange complete");

	Ok(HttpExchange { status, body, elapsed })
}
