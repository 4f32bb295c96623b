//! End-to-end coverage for successful runs, exhausted retries and seeding failures.

// std
use std::collections::HashSet;
// crates.io
use quota_dispatch::{CallFailure, DispatchRequest, Error, Result};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{header, method, path},
};
// self
use crate::*;

#[tokio::test]
async fn single_request_succeeds_on_first_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.and(header("authorization", format!("Bearer {API_KEY}").as_str()))
		.respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello there!")))
		.expect(1)
		.mount(&server)
		.await;

	let dispatcher = dispatcher(config_for(&server, CHAT_PATH, 3)?)?;
	let results = dispatcher.dispatch("conversation-1", chat_payload("hi how are you?")).await?;
	let outcome = results.get("conversation-1").expect("outcome recorded");

	assert_eq!(results.len(), 1);
	assert!(!outcome.failed);
	assert_eq!(outcome.response, json!("Hello there!"));
	assert!(outcome.errors.is_empty());
	assert_eq!(outcome.request, chat_payload("hi how are you?"));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn runs_do_not_share_results() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
		.expect(2)
		.mount(&server)
		.await;

	let dispatcher = dispatcher(config_for(&server, CHAT_PATH, 1)?)?;
	let first = dispatcher.dispatch("first", chat_payload("one")).await?;
	let second = dispatcher.dispatch("second", chat_payload("two")).await?;

	assert_eq!(first.len(), 1);
	assert_eq!(second.len(), 1);
	assert!(first.contains("first") && !first.contains("second"));
	assert!(second.contains("second") && !second.contains("first"));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn api_errors_exhaust_attempts_with_full_error_trail() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(ResponseTemplate::new(400).set_body_json(error_body("Invalid model name")))
		.expect(2)
		.mount(&server)
		.await;

	let dispatcher = dispatcher(config_for(&server, CHAT_PATH, 2)?)?;
	let report = dispatcher
		.run(vec![DispatchRequest::new(chat_payload("hola")).with_identity("req-1")])
		.await?;
	let outcome = report.results.get("req-1").expect("outcome recorded");

	assert!(outcome.failed);
	assert_eq!(outcome.errors.len(), 2);
	assert!(outcome.errors.iter().all(|error| matches!(
		error,
		CallFailure::Api { status: 400, message } if message == "Invalid model name"
	)));
	assert_eq!(outcome.response, error_body("Invalid model name"));
	assert_eq!(report.status.tasks_failed, 1);
	assert_eq!(report.status.api_errors, 2);
	assert_eq!(report.status.rate_limit_errors, 0);
	assert_eq!(report.status.tasks_in_progress, 0);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn transport_failures_are_retried_exactly_max_attempts_times() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_string("upstream garbage"))
		.expect(4)
		.mount(&server)
		.await;

	let dispatcher = dispatcher(config_for(&server, CHAT_PATH, 4)?)?;
	let report = dispatcher
		.run(vec![DispatchRequest::new(chat_payload("hola")).with_identity("req-2")])
		.await?;
	let outcome = report.results.get("req-2").expect("outcome recorded");

	assert!(outcome.failed);
	assert_eq!(outcome.errors.len(), 4);
	assert!(outcome.errors.iter().all(|error| matches!(error, CallFailure::Transport { .. })));
	assert_eq!(outcome.response, Value::Null);
	assert_eq!(report.status.other_errors, 4);
	assert_eq!(report.status.api_errors, 0);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn batch_yields_exactly_one_outcome_per_identity() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(CHAT_PATH))
		.respond_with(|request: &Request| {
			let body: Value = request.body_json().expect("json request body");
			let user = body["messages"][1]["content"].as_str().unwrap_or_default().to_owned();

			assert!(body.get("metadata").is_none(), "metadata must not be sent upstream");

			ResponseTemplate::new(200).set_body_json(completion_body(&format!("echo: {user}")))
		})
		.expect(5)
		.mount(&server)
		.await;

	let dispatcher = dispatcher(config_for(&server, CHAT_PATH, 2)?)?;
	let requests = (0..5)
		.map(|index| {
			let mut payload = chat_payload(&format!("message {index}"));

			payload["metadata"] = json!({ "row": index });

			DispatchRequest::new(payload).with_identity(format!("row-{index}"))
		})
		.collect();
	let report = dispatcher.run(requests).await?;

	assert_eq!(report.results.len(), 5);
	assert_eq!(report.status.tasks_started, 5);
	assert_eq!(report.status.tasks_succeeded, 5);

	let identities: HashSet<&str> = report.results.iter().map(|(identity, _)| identity).collect();

	for index in 0..5 {
		let identity = format!("row-{index}");
		let outcome = report.results.get(&identity).expect("outcome recorded");

		assert!(identities.contains(identity.as_str()));
		assert!(!outcome.failed);
		assert_eq!(outcome.response, json!(format!("echo: message {index}")));
		assert_eq!(outcome.metadata, Some(json!({ "row": index })));
	}

	assert!(report.capacity.available_requests <= 10.0);
	assert!(report.capacity.available_tokens >= 0.0);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn unsupported_endpoint_is_rejected_before_any_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let dispatcher = dispatcher(config_for(&server, "/v1/audio/speech", 3)?)?;
	let err = dispatcher.dispatch("tts", json!({ "model": "tts-1", "input": "hi" })).await;

	assert!(matches!(err, Err(Error::UnsupportedEndpoint { endpoint }) if endpoint == "audio/speech"));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn request_above_token_quota_is_rejected_before_any_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let mut config = config_for(&server, CHAT_PATH, 3)?;

	config.max_tokens_per_minute = 50.0;

	let err = dispatcher(config)?.dispatch("big", chat_payload("hello")).await;

	assert!(matches!(err, Err(Error::Validation { field: "max_tokens_per_minute", .. })));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn unbounded_completion_ceiling_is_rejected_before_any_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let mut payload = chat_payload("hello");

	payload["max_tokens"] = json!(u64::MAX);

	let err = dispatcher(config_for(&server, CHAT_PATH, 3)?)?.dispatch("huge", payload).await;

	assert!(matches!(err, Err(Error::Validation { field: "max_tokens_per_minute", .. })));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn builder_requires_api_key_and_https_by_default() -> Result<()> {
	let server = MockServer::start().await;
	let config = config_for(&server, CHAT_PATH, 1)?;

	assert!(matches!(
		quota_dispatch::Dispatcher::builder(config.clone()).build(),
		Err(Error::Validation { field: "api_key", .. })
	));
	assert!(matches!(dispatcher(config.with_require_https(true)), Err(Error::Security(_))));

	Ok(())
}
