use crate::{AccountKey, Error, Jwk, JWS_BASE64};

#[allow(clippy::declare_interior_mutable_const)] // Clippy doesn't like const http::HeaderName
const REPLAY_NONCE: http::HeaderName = http::HeaderName::from_static("replay-nonce");

#[allow(clippy::declare_interior_mutable_const)] // Clippy doesn't like const http::HeaderValue
const APPLICATION_JOSE_JSON: http::HeaderValue = http::HeaderValue::from_static("application/jose+json");

/// One conversation with one CA, on behalf of one account key.
///
/// The session owns the CA's directory and the current anti-replay nonce. Every resource borrows the session,
/// and every signed request goes through [`Session::post`], which serializes nonce consumption.
pub struct Session<'a, K> {
	directory_url: http::Uri,
	directory: Directory,
	account_key: &'a K,
	account_location: std::sync::OnceLock<http::Uri>,
	client: Box<dyn http_common::HttpClient>,

	/// Held for the whole "read nonce, sign, send, install returned nonce" unit.
	nonce: tokio::sync::Mutex<Option<http::HeaderValue>>,

	request_timeout: std::time::Duration,
	logger: &'a log2::Logger,
}

impl<'a, K> Session<'a, K> where K: AccountKey {
	pub async fn new(
		directory_url: http::Uri,
		account_key: &'a K,
		user_agent: http::HeaderValue,
		logger: &'a log2::Logger,
	) -> Result<Session<'a, K>, Error> {
		let client = http_common::Client::new(user_agent).map_err(|err| Error::Transport {
			uri: directory_url.clone(),
			source: err.context("could not create HTTP client").into(),
		})?;
		Self::with_client(directory_url, account_key, client, logger).await
	}

	/// Creates a session that performs its exchanges with the given client, and fetches the CA's directory.
	pub async fn with_client(
		directory_url: http::Uri,
		account_key: &'a K,
		client: impl http_common::HttpClient + 'static,
		logger: &'a log2::Logger,
	) -> Result<Session<'a, K>, Error> {
		let mut session = Session {
			directory_url,
			directory: Default::default(),
			account_key,
			account_location: Default::default(),
			client: Box::new(client),
			nonce: Default::default(),
			request_timeout: std::time::Duration::from_secs(30),
			logger,
		};

		let directory =
			logger.report_operation("acme/directory", &session.directory_url, <log2::ScopedObjectOperation<'_>>::Get, async {
				session.fetch::<Directory>(&session.directory_url).await
			}).await?;
		session.directory = directory;

		Ok(session)
	}

	/// Bounds every subsequent exchange. Defaults to 30s.
	#[must_use]
	pub fn with_request_timeout(mut self, request_timeout: std::time::Duration) -> Self {
		self.request_timeout = request_timeout;
		self
	}

	pub fn directory(&self) -> &Directory {
		&self.directory
	}

	pub fn directory_url(&self) -> &http::Uri {
		&self.directory_url
	}

	pub fn account_key(&self) -> &'a K {
		self.account_key
	}

	/// The registration's location, once it has been created or looked up.
	/// Signed requests identify the account by this location instead of by its public key from then on.
	pub fn account_location(&self) -> Option<&http::Uri> {
		self.account_location.get()
	}

	/// Fails if the session is already identified by a different location.
	pub(crate) fn set_account_location(&self, location: http::Uri) -> Result<(), Error> {
		if let Err(location) = self.account_location.set(location) {
			return match self.account_location.get() {
				Some(existing) if *existing != location =>
					Err(Error::protocol(&location, format_args!("session is already identified by {existing}"))),
				_ => Ok(()),
			};
		}

		self.logger.report_state("acme/session", &self.directory_url, format_args!("identified by {:?}", self.account_location.get()));
		Ok(())
	}

	pub(crate) fn logger(&self) -> &'a log2::Logger {
		self.logger
	}

	pub fn endpoint(&self, endpoint: Endpoint) -> Result<&http::Uri, Error> {
		let uri = match endpoint {
			Endpoint::NewReg => &self.directory.new_reg,
			Endpoint::NewAuthz => &self.directory.new_authz,
			Endpoint::NewCert => &self.directory.new_cert,
			Endpoint::RevokeCert => &self.directory.revoke_cert,
			Endpoint::NewNonce => &self.directory.new_nonce,
		};
		match uri {
			Some(http_common::DeserializableUri(uri)) => Ok(uri),
			None => Err(Error::protocol(&self.directory_url, format_args!("directory does not advertise {}", endpoint.as_str()))),
		}
	}

	/// Performs an unsigned GET of `uri`.
	///
	/// A nonce in the response is kept for the next signed request.
	pub async fn fetch<TResponse>(&self, uri: &http::Uri) -> Result<TResponse, Error>
	where
		TResponse: http_common::FromResponse,
	{
		let mut req = http::Request::new(Default::default());
		*req.method_mut() = http::Method::GET;
		*req.uri_mut() = uri.clone();

		let response = self.send(uri, req).await?;

		if let Some(nonce) = response.headers.get(REPLAY_NONCE) {
			*self.nonce.lock().await = Some(nonce.clone());
		}

		classify(uri, response)
	}

	/// Sends `claims` to `uri` as a signed request.
	///
	/// The session's nonce is replaced by the one in the response, whether the response indicates success or not.
	/// A request rejected for a stale nonce is retried once with the fresh nonce. If the retry is rejected for the same
	/// reason, that rejection is returned as [`Error::CaProblem`] so that the caller still sees the CA's problem document.
	pub async fn post<TRequest, TResponse>(&self, uri: &http::Uri, claims: &TRequest) -> Result<TResponse, Error>
	where
		TRequest: serde::Serialize,
		TResponse: http_common::FromResponse,
	{
		let payload = serde_json::to_vec(claims).map_err(|err| Error::protocol(uri, format_args!("could not serialize claims: {err}")))?;
		let payload = base64::Engine::encode(&JWS_BASE64, payload);

		let mut nonce = self.nonce.lock().await;

		let mut retried = false;
		loop {
			let current_nonce =
				if let Some(nonce) = &*nonce {
					nonce.clone()
				}
				else {
					let new_nonce = self.new_nonce().await?;
					*nonce = Some(new_nonce.clone());
					new_nonce
				};

			let req = self.make_request(uri, &payload, &current_nonce).await?;

			// If no response was received, the nonce was not consumed as far as this client knows,
			// so it stays installed.
			let response = self.send(uri, req).await?;

			let new_nonce = response.headers.get(REPLAY_NONCE).cloned();
			*nonce = new_nonce;

			match classify(uri, response) {
				Err(err) if !retried && err.problem().is_some_and(crate::Problem::is_bad_nonce) => {
					self.logger.report_message(format_args!("{uri} rejected the nonce, retrying with a fresh one ..."));
					retried = true;
				},

				result => break result,
			}
		}
	}

	/// Performs a single exchange, bounded by the request timeout.
	///
	/// This does not touch the session's nonce.
	pub async fn send(&self, uri: &http::Uri, req: http::Request<http_common::RequestBody>) -> Result<http_common::Response, Error> {
		match tokio::time::timeout(self.request_timeout, self.client.execute(req)).await {
			Ok(Ok(response)) => Ok(response),
			Ok(Err(err)) => Err(Error::Transport { uri: uri.clone(), source: err.into() }),
			Err(_) => Err(Error::Timeout { uri: uri.clone() }),
		}
	}

	async fn new_nonce(&self) -> Result<http::HeaderValue, Error> {
		let uri = self.directory.new_nonce.as_ref().map_or(&self.directory_url, |http_common::DeserializableUri(uri)| uri);

		let log2::Secret(nonce) = self.logger.report_operation("acme/nonce", uri, <log2::ScopedObjectOperation<'_>>::Get, async {
			let mut req = http::Request::new(Default::default());
			*req.method_mut() = http::Method::HEAD;
			*req.uri_mut() = uri.clone();

			let response = self.send(uri, req).await?;

			let nonce = response.headers.get(REPLAY_NONCE).cloned();

			let () = classify(uri, response)?;
			let nonce = nonce.ok_or_else(|| Error::protocol(uri, "response did not carry a new nonce"))?;
			Ok::<_, Error>(log2::Secret(nonce))
		}).await?;

		Ok(nonce)
	}

	async fn make_request(
		&self,
		uri: &http::Uri,
		payload: &str,
		nonce: &http::HeaderValue,
	) -> Result<http::Request<http_common::RequestBody>, Error> {
		#[derive(serde::Serialize)]
		struct Protected<'a> {
			alg: &'a str,

			#[serde(flatten)]
			jwk_or_kid: JwkOrKid<'a>,

			#[serde(serialize_with = "serialize_header_value")]
			nonce: &'a http::HeaderValue,

			url: std::fmt::Arguments<'a>,
		}

		#[derive(serde::Serialize)]
		enum JwkOrKid<'a> {
			#[serde(rename = "jwk")]
			Jwk(Jwk<'a>),

			#[serde(rename = "kid")]
			Kid(String),
		}

		fn serialize_header_value<S>(header_value: &http::HeaderValue, serializer: S) -> Result<S::Ok, S::Error> where S: serde::Serializer {
			let header_value = header_value.to_str().map_err(serde::ser::Error::custom)?;
			serializer.serialize_str(header_value)
		}

		let protected = {
			let jwk = self.account_key.as_jwk();
			let alg = jwk.crv.jws_sign_alg();

			let jwk_or_kid = self.account_location.get().map_or(JwkOrKid::Jwk(jwk), |location| JwkOrKid::Kid(location.to_string()));

			let protected =
				serde_json::to_vec(&Protected {
					alg,
					jwk_or_kid,
					nonce,
					url: format_args!("{uri}"),
				})
				.map_err(|err| Error::protocol(uri, format_args!("could not serialize protected header: {err}")))?;
			base64::Engine::encode(&JWS_BASE64, protected)
		};

		let signature =
			self.account_key.sign([
				protected.as_bytes(),
				&b"."[..],
				payload.as_bytes(),
			]).await
			.map_err(|err| Error::Key { uri: uri.clone(), source: err.into() })?;

		// All strings are base64 so there's no need to get serde_json involved
		let body = format!(r#"{{"payload":"{payload}","protected":"{protected}","signature":"{signature}"}}"#);

		let mut req = http::Request::new(body.into());
		*req.method_mut() = http::Method::POST;
		*req.uri_mut() = uri.clone();
		req.headers_mut().insert(http::header::CONTENT_TYPE, APPLICATION_JOSE_JSON);
		Ok(req)
	}
}

/// Turns a response into the caller's expected type, or into the error that best describes it.
fn classify<TResponse>(uri: &http::Uri, response: http_common::Response) -> Result<TResponse, Error>
where
	TResponse: http_common::FromResponse,
{
	let http_common::Response { status, headers, body } = response;

	match TResponse::from_response(status, body.as_ref(), headers) {
		Ok(Some(response)) => return Ok(response),
		Ok(None) => (),
		Err(err) => return Err(Error::protocol(uri, format_args!("{err:#}"))),
	}

	if matches!(status, http::StatusCode::NOT_FOUND | http::StatusCode::GONE) {
		return Err(Error::NotFound { uri: uri.clone() });
	}

	if let Some(body) = &body {
		if let Ok(problem) = body.as_bytes("application/problem+json") {
			let problem = serde_json::from_slice(problem).map_err(|err| Error::protocol(uri, format_args!("malformed problem document: {err}")))?;
			return Err(Error::CaProblem { uri: uri.clone(), status, problem });
		}
	}

	if !status.is_success() {
		return Err(Error::Transport {
			uri: uri.clone(),
			source: anyhow::anyhow!("unexpected HTTP status {status}").into(),
		});
	}

	Err(Error::protocol(uri, format_args!("unexpected {status} response")))
}

/// The CA's directory of endpoints.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct Directory {
	#[serde(rename = "new-reg", default)]
	pub new_reg: Option<http_common::DeserializableUri>,

	#[serde(rename = "new-authz", default)]
	pub new_authz: Option<http_common::DeserializableUri>,

	#[serde(rename = "new-cert", default)]
	pub new_cert: Option<http_common::DeserializableUri>,

	#[serde(rename = "revoke-cert", default)]
	pub revoke_cert: Option<http_common::DeserializableUri>,

	#[serde(rename = "new-nonce", default)]
	pub new_nonce: Option<http_common::DeserializableUri>,

	#[serde(default)]
	pub meta: DirectoryMeta,
}

impl http_common::FromResponse for Directory {
	fn from_response(
		status: http::StatusCode,
		body: Option<&http_common::ResponseBody>,
		_headers: http::HeaderMap,
	) -> anyhow::Result<Option<Self>> {
		Ok(match (status, body) {
			(http::StatusCode::OK, Some(body)) if body.is_json() => Some(body.as_json()?),
			_ => None,
		})
	}
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct DirectoryMeta {
	#[serde(rename = "terms-of-service", default)]
	pub terms_of_service: Option<http_common::DeserializableUri>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
	NewReg,
	NewAuthz,
	NewCert,
	RevokeCert,
	NewNonce,
}

impl Endpoint {
	pub const fn as_str(self) -> &'static str {
		match self {
			Endpoint::NewReg => "new-reg",
			Endpoint::NewAuthz => "new-authz",
			Endpoint::NewCert => "new-cert",
			Endpoint::RevokeCert => "revoke-cert",
			Endpoint::NewNonce => "new-nonce",
		}
	}
}
