use crate::{resource::Snapshot, AccountKey, Error, Problem, Resource, Session, Status, JWS_BASE64};

/// The proof mechanism of a challenge.
///
/// Types this client does not know how to prove are kept as [`ChallengeKind::Other`] instead of being rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
	Http01,
	Dns01,
	TlsSni02,
	Other(String),
}

impl ChallengeKind {
	pub fn as_str(&self) -> &str {
		match self {
			ChallengeKind::Http01 => "http-01",
			ChallengeKind::Dns01 => "dns-01",
			ChallengeKind::TlsSni02 => "tls-sni-02",
			ChallengeKind::Other(r#type) => r#type,
		}
	}
}

impl From<&str> for ChallengeKind {
	fn from(r#type: &str) -> Self {
		match r#type {
			"http-01" => ChallengeKind::Http01,
			"dns-01" => ChallengeKind::Dns01,
			"tls-sni-02" => ChallengeKind::TlsSni02,
			r#type => ChallengeKind::Other(r#type.to_owned()),
		}
	}
}

impl std::fmt::Display for ChallengeKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// What the caller must put in place, out of band, before triggering a challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proof {
	/// Serve `key_authorization` over plain HTTP at [`Proof::http_path`] on the identifier's host.
	Http01 {
		token: String,
		key_authorization: String,
	},

	/// Publish `txt_record` as a TXT record at [`Proof::dns_record_name`].
	Dns01 {
		key_authorization: String,
		txt_record: String,
	},

	/// Present a self-signed certificate with both names as SANs, selected by SNI `sni_a`.
	TlsSni02 {
		key_authorization: String,
		sni_a: String,
		sni_b: String,
	},
}

impl Proof {
	fn new(kind: &ChallengeKind, token: &str, account_key: &impl AccountKey) -> Option<Self> {
		let key_authorization = format!("{token}.{}", account_key.as_jwk().thumbprint());

		match kind {
			ChallengeKind::Http01 => Some(Proof::Http01 {
				token: token.to_owned(),
				key_authorization,
			}),

			ChallengeKind::Dns01 => {
				let txt_record = base64::Engine::encode(&JWS_BASE64, sha256(&key_authorization));
				Some(Proof::Dns01 {
					key_authorization,
					txt_record,
				})
			},

			ChallengeKind::TlsSni02 => {
				let sni_a = tls_sni_name(&sha256(token), "token");
				let sni_b = tls_sni_name(&sha256(&key_authorization), "ka");
				Some(Proof::TlsSni02 {
					key_authorization,
					sni_a,
					sni_b,
				})
			},

			ChallengeKind::Other(_) => None,
		}
	}

	pub fn key_authorization(&self) -> &str {
		match self {
			Proof::Http01 { key_authorization, .. } |
			Proof::Dns01 { key_authorization, .. } |
			Proof::TlsSni02 { key_authorization, .. } => key_authorization,
		}
	}

	pub fn http_path(&self) -> Option<String> {
		match self {
			Proof::Http01 { token, .. } => Some(format!("/.well-known/acme-challenge/{token}")),
			_ => None,
		}
	}

	pub fn dns_record_name(domain: &str) -> String {
		format!("_acme-challenge.{domain}")
	}
}

fn sha256(s: &str) -> [u8; 32] {
	<sha2::Sha256 as sha2::Digest>::digest(s.as_bytes()).into()
}

/// `hex(digest)` split into two 32-character labels, followed by `.<suffix>.acme.invalid`
fn tls_sni_name(digest: &[u8; 32], suffix: &str) -> String {
	const HEX: &[u8; 16] = b"0123456789abcdef";

	let mut name = String::with_capacity(64 + 1 + 1 + suffix.len() + ".acme.invalid".len());
	for (i, &b) in digest.iter().enumerate() {
		if i == 16 {
			name.push('.');
		}
		name.push(HEX[usize::from(b >> 4)].into());
		name.push(HEX[usize::from(b & 0x0f)].into());
	}
	name.push('.');
	name.push_str(suffix);
	name.push_str(".acme.invalid");
	name
}

pub struct Challenge<'a, K> {
	session: &'a Session<'a, K>,
	kind: ChallengeKind,
	location: http::Uri,
	status: Status,
	token: Option<String>,
	validated: Option<time::OffsetDateTime>,
	error: Option<Problem>,
	proof: Option<Proof>,
	fetched_at: Option<time::OffsetDateTime>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ChallengeObj {
	r#type: String,

	#[serde(default)]
	status: Status,

	#[serde(alias = "url")]
	pub(crate) uri: http_common::DeserializableUri,

	#[serde(default)]
	token: Option<String>,

	#[serde(default, with = "time::serde::rfc3339::option")]
	validated: Option<time::OffsetDateTime>,

	#[serde(default)]
	error: Option<Problem>,
}

impl ChallengeObj {
	pub(crate) fn status(&self) -> Status {
		self.status
	}
}

impl<'a, K> Challenge<'a, K> where K: AccountKey {
	pub(crate) fn new(session: &'a Session<'a, K>, obj: ChallengeObj) -> Self {
		let mut challenge = Challenge {
			session,
			kind: ChallengeKind::from(&*obj.r#type),
			location: obj.uri.0.clone(),
			status: Status::Unknown,
			token: None,
			validated: None,
			error: None,
			proof: None,
			fetched_at: None,
		};
		challenge.replace(obj);
		challenge
	}

	pub fn kind(&self) -> &ChallengeKind {
		&self.kind
	}

	pub fn token(&self) -> Option<&str> {
		self.token.as_deref()
	}

	pub fn validated(&self) -> Option<time::OffsetDateTime> {
		self.validated
	}

	/// The CA's explanation of why the challenge is `invalid`.
	pub fn error(&self) -> Option<&Problem> {
		self.error.as_ref()
	}

	/// The proof computed by the last [`Challenge::prepare`], if still current.
	pub fn proof(&self) -> Option<&Proof> {
		self.proof.as_ref()
	}

	/// Computes the proof the caller must put in place before calling [`Challenge::trigger`].
	///
	/// This performs no network exchange. Challenge types this client does not know have no proof.
	pub fn prepare(&mut self) -> Result<Option<&Proof>, Error> {
		if self.proof.is_none() && !matches!(self.kind, ChallengeKind::Other(_)) {
			let Some(token) = &self.token else {
				return Err(Error::protocol(&self.location, format_args!("{} challenge has no token", self.kind)));
			};
			self.proof = Proof::new(&self.kind, token, self.session.account_key());
		}

		Ok(self.proof.as_ref())
	}

	/// Tells the CA that the proof is in place.
	///
	/// This does not wait for validation. Use [`Resource::update`] or the [`crate::Poller`] to observe the outcome.
	pub async fn trigger(&mut self) -> Result<(), Error> {
		#[derive(serde::Serialize)]
		struct ChallengeRequest<'a> {
			resource: &'a str,
			r#type: &'a str,
			#[serde(rename = "keyAuthorization", skip_serializing_if = "Option::is_none")]
			key_authorization: Option<&'a str>,
		}

		let key_authorization = self.prepare()?.map(|proof| proof.key_authorization().to_owned());

		let session = self.session;
		let Snapshot { body, .. } =
			session.logger().report_operation("acme/challenge", &self.location, log2::ScopedObjectOperation::Update { value: self.kind.as_str() }, async {
				session.post::<_, Snapshot<ChallengeObj>>(&self.location, &ChallengeRequest {
					resource: "challenge",
					r#type: self.kind.as_str(),
					key_authorization: key_authorization.as_deref(),
				}).await
			}).await?;

		self.apply(body)
	}

	pub(crate) fn apply(&mut self, obj: ChallengeObj) -> Result<(), Error> {
		crate::resource::check_transition(&self.location, self.status, obj.status)?;
		self.replace(obj);
		Ok(())
	}

	/// Replaces every field with `obj`'s. The cached proof survives only if the type and token are unchanged.
	pub(crate) fn replace(&mut self, obj: ChallengeObj) {
		let ChallengeObj {
			r#type,
			status,
			uri: _,
			token,
			validated,
			error,
		} = obj;

		let kind = ChallengeKind::from(&*r#type);
		if kind != self.kind || token != self.token {
			self.proof = None;
		}

		self.kind = kind;
		self.status = status;
		self.token = token;
		self.validated = validated;
		self.error = error;
		self.fetched_at = Some(time::OffsetDateTime::now_utc());

		match &self.error {
			Some(error) => self.session.logger().report_state("acme/challenge", &self.location, format_args!("{} ({error})", self.status)),
			None => self.session.logger().report_state("acme/challenge", &self.location, format_args!("{}", self.status)),
		}
	}

	async fn update_inner(&mut self) -> Result<Option<std::time::Duration>, Error> {
		let session = self.session;
		let Snapshot { body, retry_after, .. } =
			session.logger().report_operation("acme/challenge", &self.location, <log2::ScopedObjectOperation<'_>>::Get, async {
				session.fetch::<Snapshot<ChallengeObj>>(&self.location).await
			}).await?;

		self.apply(body)?;
		Ok(retry_after)
	}
}

impl<K> Resource for Challenge<'_, K> where K: AccountKey {
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

impl<K> std::fmt::Debug for Challenge<'_, K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Challenge")
			.field("kind", &self.kind)
			.field("location", &self.location)
			.field("status", &self.status)
			.field("validated", &self.validated)
			.field("error", &self.error)
			.finish_non_exhaustive()
	}
}
