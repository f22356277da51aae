//! Client-level error types shared across the transport, refresh, and storage layers.

// self
use crate::{_prelude::*, threat::ThreatKind};

pub use crate::config::ConfigError;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS); no response was received.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Token refresh failed; the session has been cleared.
	#[error(transparent)]
	RefreshFailed(#[from] RefreshError),

	/// A replayed request was rejected with 401 again.
	#[error("Request was rejected with 401 after the token had already been refreshed.")]
	AuthExpired,
	/// The action is blocked by its sliding window.
	#[error("Action `{action}` is rate limited; retry in {retry_after}.")]
	RateLimited {
		/// Rate-limited action key.
		action: String,
		/// Time remaining until the oldest attempt leaves the window.
		retry_after: Duration,
	},
	/// Input failed the threat screen.
	#[error("Input rejected by the threat screen: {}.", display_threats(threats))]
	ThreatDetected {
		/// Every threat category that fired.
		threats: Vec<ThreatKind>,
	},
	/// Input failed schema-level validation.
	#[error("Field `{field}` is invalid: {reason}.")]
	Validation {
		/// Offending field name.
		field: &'static str,
		/// Human-readable reason.
		reason: String,
	},
	/// Response body could not be decoded.
	#[error("Response body could not be decoded.")]
	Decode {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the response.
		status: u16,
	},
	/// Server answered with a status the operation does not handle.
	#[error("Server responded with unexpected status {status}.")]
	UnexpectedStatus {
		/// HTTP status code.
		status: u16,
	},
}

/// Transport-level failures (network, IO, request construction).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request could not be converted for the underlying client.
	#[error("Request could not be built for the transport.")]
	InvalidRequest {
		/// Transport-specific builder error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the API.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific request construction error.
	pub fn invalid_request(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::InvalidRequest { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_builder() { Self::invalid_request(e) } else { Self::network(e) }
	}
}

/// Refresh failure handed to the request that triggered the refresh and to every queued one.
///
/// Every variant is terminal for the session: credentials are cleared before the error reaches
/// any caller.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// No refresh token was stored, so no refresh call was made.
	#[error("No refresh token is stored.")]
	MissingRefreshToken,
	/// Refresh endpoint answered with a non-2xx status.
	#[error("Refresh endpoint rejected the refresh token with status {status}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
	},
	/// Refresh call failed before a response arrived.
	#[error("Refresh call failed: {message}.")]
	Network {
		/// Transport error summary.
		message: String,
	},
	/// Refresh endpoint answered 2xx with an unusable body.
	#[error("Refresh endpoint returned an invalid body: {message}.")]
	MalformedResponse {
		/// Parsing or validation failure summary.
		message: String,
	},
	/// Rotated credentials could not be persisted.
	#[error("Refreshed credentials could not be stored: {message}.")]
	Storage {
		/// Storage failure summary.
		message: String,
	},
	/// The refresh was dropped before it completed.
	#[error("Refresh was abandoned before completion.")]
	Abandoned,
}

fn display_threats(threats: &[ThreatKind]) -> String {
	threats.iter().copied().map(ThreatKind::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_client_error_with_source() {
		let store_error =
			crate::store::StoreError::Backend { message: "disk unreachable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unreachable"));

		let source = StdError::source(&error)
			.expect("Client error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn threat_errors_list_every_category() {
		let error = Error::ThreatDetected { threats: vec![ThreatKind::Sql, ThreatKind::Xss] };

		assert_eq!(error.to_string(), "Input rejected by the threat screen: sql, xss.");
	}

	#[test]
	fn refresh_errors_are_transparent() {
		let error: Error = RefreshError::Rejected { status: 401 }.into();

		assert_eq!(
			error.to_string(),
			"Refresh endpoint rejected the refresh token with status 401."
		);
	}
}
