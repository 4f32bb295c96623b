//! Token cost estimation for prospective API calls.
//!
//! Estimates are what the dispatcher charges against the token budget before a call is admitted,
//! so they cover both the prompt and the largest completion the request may produce.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use serde_json::Value;
use tiktoken_rs::CoreBPE;
// self
use crate::{_prelude::*, http::endpoint::Endpoint};

/// Encoding used by the GPT-3.5/GPT-4 model families.
pub const DEFAULT_ENCODING: &str = "cl100k_base";
/// Completion ceiling assumed when a request omits `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u64 = 15;
/// Fixed per-message overhead for chat payloads (`<im_start>{role/name}\n{content}<im_end>\n`).
pub const TOKENS_PER_MESSAGE: u64 = 4;
/// Tokens priming every chat reply with `<im_start>assistant`.
pub const REPLY_PRIMING_TOKENS: u64 = 2;

/// Deterministic token estimator backed by a tiktoken BPE.
#[derive(Clone)]
pub struct TokenEstimator {
	encoding_name: Arc<str>,
	bpe: Arc<CoreBPE>,
}
impl TokenEstimator {
	/// Load the BPE for the named encoding.
	pub fn new(encoding_name: &str) -> Result<Self> {
		let bpe = match encoding_name {
			"cl100k_base" => tiktoken_rs::cl100k_base(),
			"o200k_base" => tiktoken_rs::o200k_base(),
			"p50k_base" => tiktoken_rs::p50k_base(),
			"p50k_edit" => tiktoken_rs::p50k_edit(),
			"r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
			other =>
				return Err(Error::Validation {
					field: "token_encoding_name",
					reason: format!("Unknown encoding '{other}'."),
				}),
		}
		.map_err(|err| Error::Tokenizer(format!("Failed to load {encoding_name}: {err}")))?;

		Ok(Self { encoding_name: Arc::from(encoding_name), bpe: Arc::new(bpe) })
	}

	/// Name of the loaded encoding.
	pub fn encoding_name(&self) -> &str {
		&self.encoding_name
	}

	/// Count the tokens of a single text.
	pub fn count(&self, text: &str) -> u64 {
		self.bpe.encode_ordinary(text).len() as u64
	}

	/// Estimate the total tokens a request will consume on the given endpoint.
	pub fn estimate(&self, payload: &Value, endpoint: &Endpoint) -> Result<u64> {
		match endpoint {
			Endpoint::ChatCompletions => {
				let messages = payload.get("messages").and_then(Value::as_array).ok_or_else(|| {
					Error::Validation {
						field: "messages",
						reason: "Chat payloads must carry a `messages` array.".into(),
					}
				})?;
				let mut prompt_tokens = REPLY_PRIMING_TOKENS;

				for message in messages {
					prompt_tokens = prompt_tokens.saturating_add(TOKENS_PER_MESSAGE);

					if let Some(fields) = message.as_object() {
						for (key, value) in fields {
							prompt_tokens = prompt_tokens.saturating_add(self.count_value(value));

							// A present name replaces the role token.
							if key == "name" {
								prompt_tokens = prompt_tokens.saturating_sub(1);
							}
						}
					}
				}

				Ok(prompt_tokens.saturating_add(completion_tokens(payload)))
			},
			Endpoint::Completions => match payload.get("prompt") {
				Some(Value::String(prompt)) =>
					Ok(self.count(prompt).saturating_add(completion_tokens(payload))),
				Some(Value::Array(prompts)) => {
					let prompt_tokens = self.count_texts(prompts, "prompt")?;
					let completion = completion_tokens(payload).saturating_mul(prompts.len() as u64);

					Ok(prompt_tokens.saturating_add(completion))
				},
				_ => Err(prompt_shape_error("prompt")),
			},
			Endpoint::Embeddings => match payload.get("input") {
				Some(Value::String(input)) => Ok(self.count(input)),
				Some(Value::Array(inputs)) => self.count_texts(inputs, "input"),
				_ => Err(prompt_shape_error("input")),
			},
			Endpoint::Other(path) => Err(Error::UnsupportedEndpoint { endpoint: path.clone() }),
		}
	}

	fn count_texts(&self, items: &[Value], field: &'static str) -> Result<u64> {
		items.iter().try_fold(0_u64, |total, item| -> Result<u64> {
			let text = item.as_str().ok_or_else(|| prompt_shape_error(field))?;

			Ok(total.saturating_add(self.count(text)))
		})
	}

	fn count_value(&self, value: &Value) -> u64 {
		match value {
			Value::String(text) => self.count(text),
			Value::Array(items) =>
				items.iter().fold(0_u64, |total, item| total.saturating_add(self.count_value(item))),
			Value::Object(fields) => fields
				.values()
				.fold(0_u64, |total, item| total.saturating_add(self.count_value(item))),
			_ => 0,
		}
	}
}
impl Debug for TokenEstimator {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("TokenEstimator").field("encoding_name", &self.encoding_name).finish()
	}
}

fn completion_tokens(payload: &Value) -> u64 {
	let max_tokens = payload
		.get("max_tokens")
		.or_else(|| payload.get("max_completion_tokens"))
		.and_then(Value::as_u64)
		.unwrap_or(DEFAULT_MAX_TOKENS);
	let choices = payload.get("n").and_then(Value::as_u64).unwrap_or(1);

	max_tokens.saturating_mul(choices)
}

fn prompt_shape_error(field: &'static str) -> Error {
	Error::Validation { field, reason: "Must be a string or an array of strings.".into() }
}
