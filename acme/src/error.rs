/// Everything that can go wrong while talking to the CA.
///
/// Reaching an unfavorable terminal status (such as an `invalid` challenge) is not an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The exchange with the CA could not be completed. The caller may retry.
	#[error("could not complete request to {uri}")]
	Transport {
		uri: http::Uri,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},

	/// The CA returned a response that this client does not understand.
	#[error("unexpected response from {uri}: {message}")]
	Protocol {
		uri: http::Uri,
		message: String,
	},

	/// The CA rejected the request with a problem document.
	#[error("{uri} rejected the request with {status}: {problem}")]
	CaProblem {
		uri: http::Uri,
		status: http::StatusCode,
		problem: Problem,
	},

	/// The resource location no longer resolves.
	#[error("{uri} does not exist")]
	NotFound {
		uri: http::Uri,
	},

	/// The deadline passed before the exchange or the polling loop completed.
	#[error("timed out waiting for {uri}")]
	Timeout {
		uri: http::Uri,
	},

	/// The account key could not sign the request.
	#[error("could not sign request to {uri}")]
	Key {
		uri: http::Uri,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},
}

impl Error {
	pub fn uri(&self) -> &http::Uri {
		match self {
			Error::Transport { uri, .. } |
			Error::Protocol { uri, .. } |
			Error::CaProblem { uri, .. } |
			Error::NotFound { uri } |
			Error::Timeout { uri } |
			Error::Key { uri, .. } => uri,
		}
	}

	pub fn problem(&self) -> Option<&Problem> {
		match self {
			Error::CaProblem { problem, .. } => Some(problem),
			_ => None,
		}
	}

	pub(crate) fn protocol(uri: &http::Uri, message: impl std::fmt::Display) -> Self {
		Error::Protocol {
			uri: uri.clone(),
			message: message.to_string(),
		}
	}
}

/// A problem document, as returned by the CA with content type `application/problem+json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
pub struct Problem {
	#[serde(rename = "type", default)]
	pub r#type: String,

	#[serde(default)]
	pub detail: Option<String>,

	#[serde(default)]
	pub status: Option<u16>,
}

impl Problem {
	/// Matches both `urn:acme:error:badNonce` and `urn:ietf:params:acme:error:badNonce`.
	pub fn is_bad_nonce(&self) -> bool {
		self.r#type.ends_with(":badNonce")
	}
}

impl std::fmt::Display for Problem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.r#type)?;
		if let Some(detail) = &self.detail {
			write!(f, ": {detail}")?;
		}
		Ok(())
	}
}
