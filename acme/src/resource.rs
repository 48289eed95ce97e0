use crate::{AccountKey, Error, Session};

/// The status of a CA-tracked resource, as last reported by the CA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Pending,
	Processing,
	Valid,
	Invalid,
	Revoked,
	Deactivated,
	Expired,

	/// A status this client does not know about, or no status at all.
	#[default]
	#[serde(other)]
	Unknown,
}

impl Status {
	/// Statuses from which the protocol defines no further transition.
	pub const TERMINAL: &'static [Status] = &[Status::Valid, Status::Invalid, Status::Revoked, Status::Deactivated, Status::Expired];

	pub fn is_terminal(self) -> bool {
		Status::TERMINAL.contains(&self)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Status::Pending => "pending",
			Status::Processing => "processing",
			Status::Valid => "valid",
			Status::Invalid => "invalid",
			Status::Revoked => "revoked",
			Status::Deactivated => "deactivated",
			Status::Expired => "expired",
			Status::Unknown => "unknown",
		}
	}
}

impl std::fmt::Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A client-side cache of something the CA tracks at a stable location.
///
/// Fields reflect the CA's view as of the last successful [`Resource::update`], and nothing newer.
pub trait Resource {
	fn location(&self) -> &http::Uri;

	fn status(&self) -> Status;

	/// When the current snapshot was received, or `None` if it never was.
	fn fetched_at(&self) -> Option<time::OffsetDateTime>;

	/// Refreshes the snapshot from the CA, replacing every field.
	///
	/// Resolves to the CA's suggested delay before the next refresh, if it sent one.
	fn update(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<std::time::Duration>, Error>> + Send + '_>>;
}

/// Fails if the CA reports a status that moves backwards along pending → processing → terminal.
///
/// Moving between terminal statuses is allowed, as is moving to or from a status this client does not know,
/// except away from a terminal one.
pub(crate) fn check_transition(location: &http::Uri, old: Status, new: Status) -> Result<(), Error> {
	let regressed =
		if old.is_terminal() {
			!new.is_terminal()
		}
		else {
			old == Status::Processing && new == Status::Pending
		};
	if regressed {
		return Err(Error::protocol(location, format_args!("status regressed from {old} to {new}")));
	}

	Ok(())
}

/// The CA's suggested delay before the next refresh, clamped to 1 s ..= 30 s.
///
/// A header that does not parse is ignored, leaving the poller to its own backoff.
pub(crate) fn retry_after(headers: &http::HeaderMap) -> Option<std::time::Duration> {
	http_common::get_retry_after(headers, std::time::Duration::from_secs(1), std::time::Duration::from_secs(30)).ok().flatten()
}

/// A JSON resource body, along with the response metadata the resources care about.
pub(crate) struct Snapshot<T> {
	pub(crate) body: T,
	pub(crate) retry_after: Option<std::time::Duration>,
	pub(crate) headers: http::HeaderMap,
}

// Headers carry the replay nonce, and snapshots end up in the operation log.
impl<T> std::fmt::Debug for Snapshot<T> where T: std::fmt::Debug {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Snapshot")
			.field("body", &self.body)
			.field("retry_after", &self.retry_after)
			.finish_non_exhaustive()
	}
}

impl<T> http_common::FromResponse for Snapshot<T> where T: serde::de::DeserializeOwned {
	fn from_response(
		status: http::StatusCode,
		body: Option<&http_common::ResponseBody>,
		headers: http::HeaderMap,
	) -> anyhow::Result<Option<Self>> {
		Ok(match (status, body) {
			(
				http::StatusCode::OK | http::StatusCode::CREATED | http::StatusCode::ACCEPTED,
				Some(body),
			) if body.is_json() => {
				let retry_after = retry_after(&headers);
				Some(Snapshot {
					body: body.as_json()?,
					retry_after,
					headers,
				})
			},

			_ => None,
		})
	}
}

/// Asks the CA to deactivate the resource at `location`.
pub(crate) async fn deactivate<K>(
	session: &Session<'_, K>,
	object_type: &str,
	location: &http::Uri,
	resource: &str,
) -> Result<(), Error>
where
	K: AccountKey,
{
	#[derive(serde::Serialize)]
	struct DeactivateRequest<'a> {
		resource: &'a str,
		status: Status,
	}

	session.logger().report_operation(object_type, location, <log2::ScopedObjectOperation<'_>>::Delete, async {
		let () = session.post(location, &DeactivateRequest { resource, status: Status::Deactivated }).await?;
		Ok(())
	}).await
}
