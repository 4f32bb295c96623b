//! Integration coverage for throttle classification and the post-throttle cooldown.

// std
use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::{Duration, Instant},
};
// crates.io
use quota_dispatch::{ApiKey, CallFailure, DispatchRequest, Dispatcher, Result};
use serde_json::json;
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::*;

const COOLDOWN: Duration = Duration::from_millis(400);

#[tokio::test]
async fn throttled_twice_then_succeeds_after_cooldowns() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let arrivals = Arc::new(Mutex::new(Vec::<Instant>::new()));
	let arrivals_handle = arrivals.clone();

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(move |_: &Request| {
			let mut arrivals = arrivals_handle.lock().expect("arrivals lock");

			arrivals.push(Instant::now());

			if arrivals.len() <= 2 {
				ResponseTemplate::new(200).set_body_json(json!({
					"error": {
						"message": "Rate limit reached for gpt-3.5-turbo on requests per min.",
						"type": "requests"
					}
				}))
			} else {
				ResponseTemplate::new(200).set_body_json(completion_body("finally"))
			}
		})
		.expect(3)
		.mount(&server)
		.await;

	let config = config_for(&server, CHAT_PATH, 3)?.with_cooldown(COOLDOWN);
	let report = dispatcher(config)?
		.run(vec![DispatchRequest::new(chat_payload("hi")).with_identity("throttled")])
		.await?;
	let outcome = report.results.get("throttled").expect("outcome recorded");

	assert!(!outcome.failed);
	assert_eq!(outcome.response, json!("finally"));
	assert_eq!(outcome.errors.len(), 2);
	assert!(outcome.errors.iter().all(CallFailure::is_throttle));
	assert_eq!(report.status.rate_limit_errors, 2);
	assert_eq!(report.status.api_errors, 0);

	let arrivals = arrivals.lock().expect("arrivals lock");

	assert_eq!(arrivals.len(), 3);
	assert!(arrivals[1].duration_since(arrivals[0]) >= COOLDOWN);
	assert!(arrivals[2].duration_since(arrivals[1]) >= COOLDOWN);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn exhausted_throttling_produces_failed_outcome() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(
			ResponseTemplate::new(429).set_body_json(json!({ "error": { "message": "Too many" } })),
		)
		.expect(2)
		.mount(&server)
		.await;

	let config = config_for(&server, CHAT_PATH, 2)?.with_cooldown(Duration::from_millis(50));
	let results = dispatcher(config)?.dispatch("busy", chat_payload("hi")).await?;
	let outcome = results.get("busy").expect("outcome recorded");

	assert!(outcome.failed);
	assert_eq!(
		outcome.errors,
		vec![CallFailure::Throttled { status: 429, message: "Too many".into() }; 2]
	);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn custom_detector_decides_what_counts_as_throttling() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let calls_handle = calls.clone();

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(move |_: &Request| {
			if calls_handle.fetch_add(1, Ordering::SeqCst) == 0 {
				ResponseTemplate::new(503).set_body_json(json!({ "error": { "message": "engine overloaded" } }))
			} else {
				ResponseTemplate::new(200).set_body_json(completion_body("recovered"))
			}
		})
		.expect(2)
		.mount(&server)
		.await;

	let config = config_for(&server, CHAT_PATH, 2)?.with_cooldown(Duration::from_millis(50));
	let dispatcher = Dispatcher::builder(config)
		.api_key(ApiKey::new(API_KEY)?)
		.throttle_detector(|_: http::StatusCode, message: &str| message.contains("overloaded"))
		.build()?;
	let report = dispatcher.run(vec![DispatchRequest::new(chat_payload("hi")).with_identity("x")]).await?;
	let outcome = report.results.get("x").expect("outcome recorded");

	assert!(!outcome.failed);
	assert_eq!(outcome.errors, vec![CallFailure::Throttled { status: 503, message: "engine overloaded".into() }]);
	assert_eq!(report.status.rate_limit_errors, 1);
	assert_eq!(calls.load(Ordering::SeqCst), 2);

	server.verify().await;
	Ok(())
}
