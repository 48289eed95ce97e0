use crate::{Error, Resource, Status};

/// Drives a [`Resource`] to a terminal status by refreshing it until the CA reports one.
pub struct Poller<'a> {
	/// The wait after the first non-terminal refresh that came without a suggested delay.
	/// Doubles after every such wait, up to `max_backoff`.
	pub initial_backoff: std::time::Duration,
	pub max_backoff: std::time::Duration,
	logger: &'a log2::Logger,
}

impl<'a> Poller<'a> {
	pub fn new(logger: &'a log2::Logger) -> Self {
		Poller {
			initial_backoff: std::time::Duration::from_secs(1),
			max_backoff: std::time::Duration::from_secs(30),
			logger,
		}
	}

	/// Refreshes `resource` until its status is one of `terminal`, and returns that status.
	///
	/// Reaching an unfavorable terminal status such as `invalid` is not an error. If `deadline` passes first,
	/// this fails with [`Error::Timeout`] and `resource` keeps its last snapshot.
	///
	/// Dropping the returned future between refreshes leaves `resource` consistent.
	pub async fn poll_until_terminal<R>(
		&self,
		resource: &mut R,
		terminal: &[Status],
		deadline: tokio::time::Instant,
	) -> Result<Status, Error>
	where
		R: Resource + ?Sized,
	{
		let mut backoff = self.initial_backoff;

		loop {
			let result = tokio::time::timeout_at(deadline, resource.update()).await;
			let Ok(result) = result else {
				return Err(Error::Timeout { uri: resource.location().clone() });
			};
			let retry_after = result?;

			let status = resource.status();
			if terminal.contains(&status) {
				return Ok(status);
			}

			let now = tokio::time::Instant::now();
			if now >= deadline {
				return Err(Error::Timeout { uri: resource.location().clone() });
			}

			let wait =
				if let Some(retry_after) = retry_after {
					retry_after
				}
				else {
					let wait = backoff;
					backoff = backoff.saturating_mul(2).min(self.max_backoff);
					wait
				};
			let wait = wait.min(deadline - now);

			self.logger.report_message(format_args!("{} is {status}. Waiting for {wait:?} before rechecking ...", resource.location()));
			tokio::time::sleep(wait).await;
		}
	}
}
