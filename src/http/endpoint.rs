//! Endpoint category resolution from request URLs.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use url::Url;

/// API endpoint category targeted by a dispatcher.
///
/// The category decides how request cost is estimated and how a successful response is reduced to
/// its canonical payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
	/// `chat/completions`.
	ChatCompletions,
	/// Legacy `completions`.
	Completions,
	/// `embeddings`.
	Embeddings,
	/// Anything else, carrying the path below the version segment.
	Other(String),
}
impl Endpoint {
	/// Resolve the category from a full API URL such as `https://host/v1/chat/completions`.
	///
	/// The endpoint is the path below the first `v<digits>` segment; URLs without a version
	/// segment use the whole path.
	pub fn from_url(url: &Url) -> Self {
		let segments: Vec<&str> = url
			.path_segments()
			.map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
			.unwrap_or_default();
		let start = segments
			.iter()
			.position(|segment| is_version_segment(segment))
			.map(|index| index + 1)
			.unwrap_or(0);

		Self::from_path(&segments[start..].join("/"))
	}

	/// Resolve the category from an endpoint path such as `chat/completions`.
	pub fn from_path(path: &str) -> Self {
		match path.trim_matches('/') {
			"chat/completions" => Self::ChatCompletions,
			"completions" => Self::Completions,
			"embeddings" => Self::Embeddings,
			other => Self::Other(other.to_owned()),
		}
	}

	/// Endpoint path below the API version segment.
	pub fn as_str(&self) -> &str {
		match self {
			Self::ChatCompletions => "chat/completions",
			Self::Completions => "completions",
			Self::Embeddings => "embeddings",
			Self::Other(path) => path,
		}
	}
}
impl Display for Endpoint {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.as_str())
	}
}

fn is_version_segment(segment: &str) -> bool {
	segment.len() > 1
		&& segment.starts_with('v')
		&& segment.bytes().skip(1).all(|b| b.is_ascii_digit())
}
