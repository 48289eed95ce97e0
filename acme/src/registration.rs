use crate::{resource::Snapshot, AccountKey, Endpoint, Error, Resource, Session, Status};

/// The account, as the CA sees it.
pub struct Registration<'a, K> {
	session: &'a Session<'a, K>,
	location: http::Uri,
	status: Status,
	observed_status: Status,
	contacts: Vec<String>,
	agreement: Option<http::Uri>,
	terms_of_service: Option<http::Uri>,
	fetched_at: Option<time::OffsetDateTime>,
}

#[derive(Debug, serde::Deserialize)]
struct RegistrationObj {
	#[serde(rename = "contact", default)]
	contacts: Vec<String>,

	#[serde(default)]
	agreement: Option<http_common::DeserializableUri>,

	#[serde(default)]
	status: Status,
}

#[derive(serde::Serialize)]
struct RegistrationRequest<'a> {
	resource: &'a str,

	#[serde(rename = "contact", skip_serializing_if = "Option::is_none")]
	contacts: Option<&'a [&'a str]>,

	#[serde(skip_serializing_if = "Option::is_none")]
	agreement: Option<&'a str>,
}

impl<'a, K> Registration<'a, K> where K: AccountKey {
	/// Registers the session's account key with the CA.
	///
	/// If the key is already registered, the existing registration is loaded instead.
	/// Either way, the session identifies the account by this registration's location from then on.
	pub async fn create(session: &'a Session<'a, K>, contacts: &[&str], agreement: Option<&http::Uri>) -> Result<Self, Error> {
		#[derive(Debug)]
		enum NewRegistrationResponse {
			Created(http_common::ResponseWithLocation<Snapshot<RegistrationObj>>),
			AlreadyRegistered(http::Uri),
		}

		impl http_common::FromResponse for NewRegistrationResponse {
			fn from_response(
				status: http::StatusCode,
				body: Option<&http_common::ResponseBody>,
				headers: http::HeaderMap,
			) -> anyhow::Result<Option<Self>> {
				if status == http::StatusCode::CONFLICT {
					if let Some(location) = headers.get(http::header::LOCATION) {
						let location = location.as_bytes().try_into()?;
						return Ok(Some(NewRegistrationResponse::AlreadyRegistered(location)));
					}
				}

				let response =
					<http_common::ResponseWithLocation<Snapshot<RegistrationObj>> as http_common::FromResponse>::from_response(status, body, headers)?;
				Ok(response.map(NewRegistrationResponse::Created))
			}
		}

		let new_reg_url = session.endpoint(Endpoint::NewReg)?;
		let agreement = agreement.map(ToString::to_string);

		let response =
			session.logger().report_operation("acme/registration", new_reg_url, log2::ScopedObjectOperation::Create { value: &contacts.join(", ") }, async {
				session.post::<_, NewRegistrationResponse>(new_reg_url, &RegistrationRequest {
					resource: "new-reg",
					contacts: Some(contacts),
					agreement: agreement.as_deref(),
				}).await
			}).await?;

		match response {
			NewRegistrationResponse::Created(http_common::ResponseWithLocation { body: Snapshot { body, headers, .. }, location }) => {
				session.set_account_location(location.clone())?;
				let mut registration = Self::new(session, location);
				registration.apply(body, &headers)?;
				Ok(registration)
			},

			NewRegistrationResponse::AlreadyRegistered(location) => {
				session.logger().report_message(format_args!("Account key is already registered at {location}"));
				session.set_account_location(location.clone())?;
				let mut registration = Self::new(session, location);
				registration.update_inner().await?;
				Ok(registration)
			},
		}
	}

	/// Loads the registration at `location`, which must belong to the session's account key.
	///
	/// The session identifies the account by `location` only once the CA has served it.
	pub async fn fetch(session: &'a Session<'a, K>, location: http::Uri) -> Result<Self, Error> {
		let mut registration = Self::new(session, location.clone());
		registration.update_inner().await?;
		session.set_account_location(location)?;
		Ok(registration)
	}

	fn new(session: &'a Session<'a, K>, location: http::Uri) -> Self {
		Registration {
			session,
			location,
			status: Status::Unknown,
			observed_status: Status::Unknown,
			contacts: vec![],
			agreement: None,
			terms_of_service: None,
			fetched_at: None,
		}
	}

	pub fn contacts(&self) -> &[String] {
		&self.contacts
	}

	/// The terms of service the account has agreed to.
	pub fn agreement(&self) -> Option<&http::Uri> {
		self.agreement.as_ref()
	}

	/// The CA's current terms of service.
	pub fn terms_of_service(&self) -> Option<&http::Uri> {
		self.terms_of_service.as_ref()
	}

	/// Replaces the account's contact URIs.
	pub async fn modify(&mut self, contacts: &[&str]) -> Result<(), Error> {
		self.post(log2::ScopedObjectOperation::Update { value: &contacts.join(", ") }, &RegistrationRequest {
			resource: "reg",
			contacts: Some(contacts),
			agreement: None,
		}).await?;
		Ok(())
	}

	/// Agrees to the CA's current terms of service.
	pub async fn agree_to_terms(&mut self) -> Result<(), Error> {
		let terms_of_service =
			self.terms_of_service.as_ref()
			.ok_or_else(|| Error::protocol(&self.location, "CA does not advertise any terms of service"))?
			.to_string();

		self.post(log2::ScopedObjectOperation::Update { value: &terms_of_service }, &RegistrationRequest {
			resource: "reg",
			contacts: None,
			agreement: Some(&terms_of_service),
		}).await?;
		Ok(())
	}

	/// Asks the CA to deactivate the account. Deactivation cannot be undone.
	///
	/// On success the local status is set to `deactivated` without waiting for the CA to confirm it.
	pub async fn deactivate(&mut self) -> Result<(), Error> {
		crate::resource::deactivate(self.session, "acme/registration", &self.location, "reg").await?;

		self.status = Status::Deactivated;
		self.session.logger().report_state("acme/registration", &self.location, format_args!("{}", self.status));
		Ok(())
	}

	/// The draft protocol reads a registration with a signed `reg` request rather than a plain GET.
	async fn update_inner(&mut self) -> Result<Option<std::time::Duration>, Error> {
		self.post(<log2::ScopedObjectOperation<'_>>::Get, &RegistrationRequest {
			resource: "reg",
			contacts: None,
			agreement: None,
		}).await
	}

	async fn post(&mut self, operation: log2::ScopedObjectOperation<'_>, request: &RegistrationRequest<'_>) -> Result<Option<std::time::Duration>, Error> {
		let session = self.session;
		let Snapshot { body, retry_after, headers } =
			session.logger().report_operation("acme/registration", &self.location, operation, async {
				session.post::<_, Snapshot<RegistrationObj>>(&self.location, request).await
			}).await?;

		self.apply(body, &headers)?;
		Ok(retry_after)
	}

	fn apply(&mut self, obj: RegistrationObj, headers: &http::HeaderMap) -> Result<(), Error> {
		let RegistrationObj { contacts, agreement, status } = obj;

		crate::resource::check_transition(&self.location, self.observed_status, status)?;

		self.contacts = contacts;
		self.agreement = agreement.map(|http_common::DeserializableUri(agreement)| agreement);
		self.terms_of_service =
			http_common::get_link(headers, "terms-of-service")
			.or_else(|| self.session.directory().meta.terms_of_service.as_ref().map(|http_common::DeserializableUri(uri)| uri.clone()));
		self.status = status;
		self.observed_status = status;
		self.fetched_at = Some(time::OffsetDateTime::now_utc());

		self.session.logger().report_state("acme/registration", &self.location, format_args!("{}", self.status));

		Ok(())
	}
}

impl<K> Resource for Registration<'_, K> where K: AccountKey {
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

impl<K> std::fmt::Debug for Registration<'_, K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Registration")
			.field("location", &self.location)
			.field("status", &self.status)
			.field("contacts", &self.contacts)
			.field("agreement", &self.agreement)
			.field("terms_of_service", &self.terms_of_service)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		test_util::{self, FakeClient},
		Resource,
	};

	fn registration_obj(status: &str, agreement: Option<&str>) -> serde_json::Value {
		let mut obj = serde_json::json!({
			"id": 1,
			"contact": ["mailto:admin@example.org"],
			"status": status,
		});
		if let Some(agreement) = agreement {
			obj["agreement"] = agreement.into();
		}
		obj
	}

	#[tokio::test]
	async fn create() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push_json(
			http::StatusCode::CREATED,
			Some("nonce-1"),
			&[
				(http::header::LOCATION, test_util::REG_URL),
				(http::header::LINK, r#"<https://example.com/acme/terms/v2>;rel="terms-of-service""#),
			],
			registration_obj("valid", None),
		);
		let registration = super::Registration::create(&session, &["mailto:admin@example.org"], None).await.unwrap();

		assert_eq!(registration.location(), test_util::REG_URL);
		assert_eq!(registration.status(), crate::Status::Valid);
		assert_eq!(registration.contacts(), ["mailto:admin@example.org"]);
		assert_eq!(registration.agreement(), None);
		assert_eq!(registration.terms_of_service().unwrap(), "https://example.com/acme/terms/v2");
		assert_eq!(session.account_location().unwrap(), test_util::REG_URL);

		let requests = client.requests();
		assert_eq!(requests[1].uri, test_util::NEW_REG_URL);
		assert_eq!(requests[1].claims(), serde_json::json!({
			"resource": "new-reg",
			"contact": ["mailto:admin@example.org"],
		}));
		assert!(requests[1].protected().get("jwk").is_some());
	}

	#[tokio::test]
	async fn create_when_already_registered() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push(test_util::Canned::Response(test_util::response(
			http::StatusCode::CONFLICT,
			Some("nonce-1"),
			&[(http::header::LOCATION, test_util::REG_URL)],
			Some(("application/problem+json", br#"{"type":"urn:acme:error:malformed","detail":"Registration key is already in use"}"#.to_vec())),
		)));
		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-2"), &[], registration_obj("valid", Some(test_util::TERMS_URL)));

		let registration = super::Registration::create(&session, &["mailto:admin@example.org"], None).await.unwrap();
		assert_eq!(registration.location(), test_util::REG_URL);
		assert_eq!(registration.agreement().unwrap(), test_util::TERMS_URL);

		// No Link header, so the directory's terms of service are used.
		assert_eq!(registration.terms_of_service().unwrap(), test_util::TERMS_URL);

		let requests = client.requests();
		assert_eq!(requests[2].uri, test_util::REG_URL);
		assert_eq!(requests[2].claims(), serde_json::json!({ "resource": "reg" }));
		assert_eq!(requests[2].protected()["kid"], test_util::REG_URL);
	}

	#[tokio::test]
	async fn conflict_without_location_is_a_problem() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push_problem(http::StatusCode::CONFLICT, Some("nonce-1"), "urn:acme:error:malformed");
		let err = super::Registration::create(&session, &[], None).await.unwrap_err();
		assert!(matches!(err, crate::Error::CaProblem { status: http::StatusCode::CONFLICT, .. }), "{err:?}");
		assert!(session.account_location().is_none());
	}

	#[tokio::test]
	async fn failed_fetch_does_not_identify_the_session() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push(test_util::Canned::Response(test_util::response(http::StatusCode::NOT_FOUND, Some("nonce-1"), &[], None)));
		let err = super::Registration::fetch(&session, "https://example.com/acme/reg/stale".parse().unwrap()).await.unwrap_err();
		assert!(matches!(err, crate::Error::NotFound { .. }), "{err:?}");
		assert!(session.account_location().is_none());

		client.push_json(http::StatusCode::CREATED, Some("nonce-2"), &[(http::header::LOCATION, test_util::REG_URL)], registration_obj("valid", None));
		let registration = super::Registration::create(&session, &["mailto:admin@example.org"], None).await.unwrap();
		assert_eq!(registration.location(), test_util::REG_URL);
		assert_eq!(session.account_location().unwrap(), test_util::REG_URL);

		let requests = client.requests();
		assert_eq!(requests[2].uri, test_util::NEW_REG_URL);
		assert!(requests[2].protected().get("jwk").is_some());
		assert!(requests[2].protected().get("kid").is_none());
	}

	#[tokio::test]
	async fn conflicting_location_is_rejected() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-1"), &[], registration_obj("valid", None));
		super::Registration::fetch(&session, test_util::uri(test_util::REG_URL)).await.unwrap();
		assert_eq!(session.account_location().unwrap(), test_util::REG_URL);

		client.push_json(http::StatusCode::CREATED, Some("nonce-2"), &[(http::header::LOCATION, "https://example.com/acme/reg/2")], registration_obj("valid", None));
		let err = super::Registration::create(&session, &["mailto:admin@example.org"], None).await.unwrap_err();
		assert!(matches!(err, crate::Error::Protocol { .. }), "{err:?}");
		assert_eq!(session.account_location().unwrap(), test_util::REG_URL);
	}

	#[tokio::test]
	async fn agree_and_modify() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-1"), &[], registration_obj("valid", None));
		let mut registration = super::Registration::fetch(&session, test_util::uri(test_util::REG_URL)).await.unwrap();
		assert_eq!(registration.agreement(), None);

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-2"), &[], registration_obj("valid", Some(test_util::TERMS_URL)));
		registration.agree_to_terms().await.unwrap();
		assert_eq!(registration.agreement().unwrap(), test_util::TERMS_URL);

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-3"), &[], serde_json::json!({
			"contact": ["mailto:ops@example.org", "tel:+15550100"],
			"agreement": test_util::TERMS_URL,
			"status": "valid",
		}));
		registration.modify(&["mailto:ops@example.org", "tel:+15550100"]).await.unwrap();
		assert_eq!(registration.contacts(), ["mailto:ops@example.org", "tel:+15550100"]);

		let requests = client.requests();
		assert_eq!(requests[2].claims(), serde_json::json!({ "resource": "reg", "agreement": test_util::TERMS_URL }));
		assert_eq!(requests[3].claims(), serde_json::json!({
			"resource": "reg",
			"contact": ["mailto:ops@example.org", "tel:+15550100"],
		}));
	}

	#[tokio::test]
	async fn deactivate() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-1"), &[], registration_obj("valid", None));
		let mut registration = super::Registration::fetch(&session, test_util::uri(test_util::REG_URL)).await.unwrap();

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-2"), &[], registration_obj("deactivated", None));
		registration.deactivate().await.unwrap();
		assert_eq!(registration.status(), crate::Status::Deactivated);

		let requests = client.requests();
		assert_eq!(requests[2].uri, test_util::REG_URL);
		assert_eq!(requests[2].claims(), serde_json::json!({ "resource": "reg", "status": "deactivated" }));

		client.push_json(http::StatusCode::ACCEPTED, Some("nonce-3"), &[], registration_obj("deactivated", None));
		registration.update().await.unwrap();
		assert_eq!(registration.status(), crate::Status::Deactivated);
		assert_eq!(client.requests()[3].claims(), serde_json::json!({ "resource": "reg" }));
	}
}
