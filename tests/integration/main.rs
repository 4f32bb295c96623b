//! Integration tests exercising dispatch runs against a mock provider.

mod dispatch_flow;
mod throttling;

// crates.io
use quota_dispatch::{ApiKey, DispatchConfig, Dispatcher, Result};
use serde_json::{Value, json};
use wiremock::MockServer;

pub const CHAT_PATH: &str = "/v1/chat/completions";
pub const API_KEY: &str = "sk-test-0123456789";

pub fn chat_payload(text: &str) -> Value {
	json!({
		"model": "gpt-3.5-turbo-0125",
		"messages": [
			{ "role": "system", "content": "You are a helpful assistant." },
			{ "role": "user", "content": text }
		],
		"max_tokens": 100
	})
}

pub fn completion_body(content: &str) -> Value {
	json!({
		"id": "chatcmpl-1",
		"object": "chat.completion",
		"choices": [
			{ "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }
		]
	})
}

pub fn error_body(message: &str) -> Value {
	json!({ "error": { "message": message, "type": "invalid_request_error" } })
}

pub fn config_for(server: &MockServer, path: &str, max_attempts: u32) -> Result<DispatchConfig> {
	Ok(DispatchConfig::new(format!("{}{}", server.uri(), path), 10.0, 1_000.0)?
		.with_require_https(false)
		.with_max_attempts(max_attempts))
}

pub fn dispatcher(config: DispatchConfig) -> Result<Dispatcher> {
	Dispatcher::builder(config).api_key(ApiKey::new(API_KEY)?).build()
}
