use crate::{
	challenge::ChallengeObj,
	resource::{check_transition, Snapshot},
	AccountKey, Challenge, Endpoint, Error, Resource, Session, Status,
};

/// The CA's record of this account's proof of control over one identifier.
pub struct Authorization<'a, K> {
	session: &'a Session<'a, K>,
	location: http::Uri,
	identifier: Option<Identifier>,
	status: Status,

	/// The last status the CA reported, as opposed to one set optimistically by this client.
	observed_status: Status,

	expires: Option<time::OffsetDateTime>,
	challenges: Vec<Challenge<'a, K>>,

	/// Indices into `challenges`. Every index is in bounds, and no combination is empty or repeats an index.
	combinations: Vec<Vec<usize>>,

	fetched_at: Option<time::OffsetDateTime>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Identifier {
	pub r#type: String,
	pub value: String,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct AuthorizationObj {
	#[serde(default)]
	identifier: Option<Identifier>,

	#[serde(default)]
	status: Status,

	#[serde(default, with = "time::serde::rfc3339::option")]
	expires: Option<time::OffsetDateTime>,

	#[serde(default)]
	challenges: Vec<ChallengeObj>,

	#[serde(default)]
	combinations: Option<Vec<Vec<usize>>>,
}

impl<'a, K> Authorization<'a, K> where K: AccountKey {
	/// An authorization known only by its location. Call [`Resource::update`] to load it.
	pub fn new(session: &'a Session<'a, K>, location: http::Uri) -> Self {
		Authorization {
			session,
			location,
			identifier: None,
			status: Status::Unknown,
			observed_status: Status::Unknown,
			expires: None,
			challenges: vec![],
			combinations: vec![],
			fetched_at: None,
		}
	}

	/// Loads the authorization at `location`.
	pub async fn fetch(session: &'a Session<'a, K>, location: http::Uri) -> Result<Self, Error> {
		let mut authorization = Self::new(session, location);
		authorization.update_inner().await?;
		Ok(authorization)
	}

	/// Asks the CA for a new authorization of `domain`.
	pub async fn create(session: &'a Session<'a, K>, domain: &str) -> Result<Self, Error> {
		#[derive(serde::Serialize)]
		struct NewAuthorizationRequest<'a> {
			resource: &'a str,
			identifier: NewAuthorizationRequestIdentifier<'a>,
		}

		#[derive(serde::Serialize)]
		struct NewAuthorizationRequestIdentifier<'a> {
			r#type: &'a str,
			value: &'a str,
		}

		let new_authz_url = session.endpoint(Endpoint::NewAuthz)?;

		let http_common::ResponseWithLocation { body: Snapshot { body, .. }, location } =
			session.logger().report_operation("acme/authorization", domain, log2::ScopedObjectOperation::Create { value: domain }, async {
				session.post::<_, http_common::ResponseWithLocation<Snapshot<AuthorizationObj>>>(new_authz_url, &NewAuthorizationRequest {
					resource: "new-authz",
					identifier: NewAuthorizationRequestIdentifier {
						r#type: "dns",
						value: domain,
					},
				}).await
			}).await?;

		let mut authorization = Self::new(session, location);
		authorization.apply(body)?;
		Ok(authorization)
	}

	pub fn identifier(&self) -> Option<&Identifier> {
		self.identifier.as_ref()
	}

	/// The identifier's value, if it is a DNS name.
	pub fn domain(&self) -> Option<&str> {
		self.identifier.as_ref().filter(|identifier| identifier.r#type == "dns").map(|identifier| &*identifier.value)
	}

	pub fn expires(&self) -> Option<time::OffsetDateTime> {
		self.expires
	}

	pub fn challenges(&self) -> &[Challenge<'a, K>] {
		&self.challenges
	}

	pub fn challenges_mut(&mut self) -> &mut [Challenge<'a, K>] {
		&mut self.challenges
	}

	pub fn combinations(&self) -> &[Vec<usize>] {
		&self.combinations
	}

	/// The offered challenge of type `type`, whether or not it is part of any combination.
	pub fn find_challenge(&self, r#type: &str) -> Option<&Challenge<'a, K>> {
		self.challenges.iter().find(|challenge| challenge.kind().as_str() == r#type)
	}

	pub fn find_challenge_mut(&mut self, r#type: &str) -> Option<&mut Challenge<'a, K>> {
		self.challenges.iter_mut().find(|challenge| challenge.kind().as_str() == r#type)
	}

	/// The challenges of the first combination, in the CA's order, whose types are all among `candidate_types`.
	///
	/// The challenges are returned in the order the combination lists them. No combination is partially satisfied,
	/// so `None` means the caller cannot prove control with the types it offered.
	pub fn find_combination<S>(&self, candidate_types: &[S]) -> Option<Vec<&Challenge<'a, K>>> where S: AsRef<str> {
		let combination = &self.combinations[self.find_combination_index(candidate_types)?];
		Some(combination.iter().map(|&i| &self.challenges[i]).collect())
	}

	/// Like [`Authorization::find_combination`], but the challenges can be prepared and triggered.
	pub fn find_combination_mut<S>(&mut self, candidate_types: &[S]) -> Option<Vec<&mut Challenge<'a, K>>> where S: AsRef<str> {
		let combination = &self.combinations[self.find_combination_index(candidate_types)?];

		// A combination never repeats an index, so every slot is taken at most once.
		let mut slots: Vec<_> = self.challenges.iter_mut().map(Some).collect();
		Some(combination.iter().filter_map(|&i| slots[i].take()).collect())
	}

	fn find_combination_index<S>(&self, candidate_types: &[S]) -> Option<usize> where S: AsRef<str> {
		let candidate_types: std::collections::BTreeSet<&str> = candidate_types.iter().map(AsRef::as_ref).collect();
		first_satisfied(&self.combinations, |i| candidate_types.contains(self.challenges[i].kind().as_str()))
	}

	/// Asks the CA to deactivate this authorization.
	///
	/// On success the local status is set to `deactivated` without waiting for the CA to confirm it.
	pub async fn deactivate(&mut self) -> Result<(), Error> {
		crate::resource::deactivate(self.session, "acme/authorization", &self.location, "authz").await?;

		self.status = Status::Deactivated;
		self.session.logger().report_state("acme/authorization", &self.location, format_args!("{}", self.status));
		Ok(())
	}

	/// Validates `obj` completely before replacing the snapshot, so that a rejected body leaves the previous one intact.
	fn apply(&mut self, obj: AuthorizationObj) -> Result<(), Error> {
		let AuthorizationObj {
			identifier,
			status,
			expires,
			challenges,
			combinations,
		} = obj;

		check_transition(&self.location, self.observed_status, status)?;

		for obj in &challenges {
			if let Some(challenge) = self.challenges.iter().find(|challenge| *challenge.location() == obj.uri.0) {
				check_transition(challenge.location(), challenge.status(), obj.status())?;
			}
		}

		let combinations = validate_combinations(&self.location, challenges.len(), combinations)?;

		let mut previous = std::mem::take(&mut self.challenges);
		self.challenges =
			challenges.into_iter()
			.map(|obj| match previous.iter().position(|challenge| *challenge.location() == obj.uri.0) {
				Some(i) => {
					let mut challenge = previous.swap_remove(i);
					challenge.replace(obj);
					challenge
				},
				None => Challenge::new(self.session, obj),
			})
			.collect();

		self.identifier = identifier;
		self.status = status;
		self.observed_status = status;
		self.expires = expires;
		self.combinations = combinations;
		self.fetched_at = Some(time::OffsetDateTime::now_utc());

		self.session.logger().report_state("acme/authorization", &self.location, format_args!("{}", self.status));

		Ok(())
	}

	async fn update_inner(&mut self) -> Result<Option<std::time::Duration>, Error> {
		let session = self.session;
		let Snapshot { body, retry_after, .. } =
			session.logger().report_operation("acme/authorization", &self.location, <log2::ScopedObjectOperation<'_>>::Get, async {
				session.fetch::<Snapshot<AuthorizationObj>>(&self.location).await
			}).await?;

		self.apply(body)?;
		Ok(retry_after)
	}
}

impl<K> Resource for Authorization<'_, K> where K: AccountKey {
	fn location(&self) -> &http::Uri {
		&self.location
	}

	fn status(&self) -> Status {
		self.status
	}

	fn fetched_at(&self) -> Option<time::OffsetDateTime> {
		self.fetched_at
	}

	fn update(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<std::time::Duration>, Error>> + Send + '_>> {
		Box::pin(self.update_inner())
	}
}

impl<K> std::fmt::Debug for Authorization<'_, K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Authorization")
			.field("location", &self.location)
			.field("identifier", &self.identifier)
			.field("status", &self.status)
			.field("expires", &self.expires)
			.field("challenges", &self.challenges)
			.field("combinations", &self.combinations)
			.finish_non_exhaustive()
	}
}

fn first_satisfied(combinations: &[Vec<usize>], is_candidate: impl Fn(usize) -> bool) -> Option<usize> {
	combinations.iter().position(|combination| combination.iter().all(|&i| is_candidate(i)))
}

/// Without `combinations`, every challenge is sufficient on its own.
fn validate_combinations(
	location: &http::Uri,
	num_challenges: usize,
	combinations: Option<Vec<Vec<usize>>>,
) -> Result<Vec<Vec<usize>>, Error> {
	let Some(combinations) = combinations else {
		return Ok((0..num_challenges).map(|i| vec![i]).collect());
	};

	combinations.into_iter()
		.map(|mut combination| {
			if combination.is_empty() {
				return Err(Error::protocol(location, "authorization has an empty combination"));
			}

			if let Some(&i) = combination.iter().find(|&&i| i >= num_challenges) {
				return Err(Error::protocol(
					location,
					format_args!("combination refers to challenge {i} but only {num_challenges} challenges are offered"),
				));
			}

			let mut seen = Vec::with_capacity(combination.len());
			combination.retain(|&i| if seen.contains(&i) { false } else { seen.push(i); true });

			Ok(combination)
		})
		.collect()
}
