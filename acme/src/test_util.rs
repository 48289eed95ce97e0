//! A canned-response CA for unit tests.

pub(crate) const DIRECTORY_URL: &str = "https://example.com/directory";
pub(crate) const NEW_REG_URL: &str = "https://example.com/acme/new-reg";
pub(crate) const NEW_AUTHZ_URL: &str = "https://example.com/acme/new-authz";
pub(crate) const NEW_CERT_URL: &str = "https://example.com/acme/new-cert";
pub(crate) const REVOKE_CERT_URL: &str = "https://example.com/acme/revoke-cert";
pub(crate) const NEW_NONCE_URL: &str = "https://example.com/acme/new-nonce";
pub(crate) const TERMS_URL: &str = "https://example.com/acme/terms";
pub(crate) const REG_URL: &str = "https://example.com/acme/reg/1";
pub(crate) const AUTHZ_URL: &str = "https://example.com/acme/authz/1";
pub(crate) const CERT_URL: &str = "https://example.com/acme/cert/1";

pub(crate) fn uri(uri: &'static str) -> http::Uri {
	http::Uri::from_static(uri)
}

pub(crate) enum Canned {
	Response(http_common::Response),
	Error(&'static str),
	Hang,
}

#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
	pub(crate) method: http::Method,
	pub(crate) uri: http::Uri,
	pub(crate) headers: http::HeaderMap,
	pub(crate) body: Vec<u8>,
}

impl RecordedRequest {
	fn envelope_part(&self, name: &str) -> serde_json::Value {
		let envelope: serde_json::Value = serde_json::from_slice(&self.body).unwrap();
		let part = envelope[name].as_str().unwrap();
		let part = base64::Engine::decode(&crate::JWS_BASE64, part).unwrap();
		serde_json::from_slice(&part).unwrap()
	}

	pub(crate) fn protected(&self) -> serde_json::Value {
		self.envelope_part("protected")
	}

	pub(crate) fn claims(&self) -> serde_json::Value {
		self.envelope_part("payload")
	}
}

#[derive(Clone, Default)]
pub(crate) struct FakeClient(std::sync::Arc<std::sync::Mutex<FakeClientInner>>);

#[derive(Default)]
struct FakeClientInner {
	responses: std::collections::VecDeque<Canned>,
	requests: Vec<RecordedRequest>,
}

impl FakeClient {
	pub(crate) fn push(&self, canned: Canned) {
		self.0.lock().unwrap().responses.push_back(canned);
	}

	pub(crate) fn push_json(
		&self,
		status: http::StatusCode,
		nonce: Option<&'static str>,
		headers: &[(http::HeaderName, &'static str)],
		body: serde_json::Value,
	) {
		self.push(Canned::Response(response(status, nonce, headers, Some(("application/json", body.to_string().into_bytes())))));
	}

	pub(crate) fn push_problem(&self, status: http::StatusCode, nonce: Option<&'static str>, r#type: &str) {
		let body = serde_json::json!({ "type": r#type, "detail": "canned problem", "status": status.as_u16() });
		self.push(Canned::Response(response(status, nonce, &[], Some(("application/problem+json", body.to_string().into_bytes())))));
	}

	pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
		self.0.lock().unwrap().requests.clone()
	}
}

impl http_common::HttpClient for FakeClient {
	fn execute(&self, req: http::Request<http_common::RequestBody>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<http_common::Response>> + Send + '_>> {
		let canned = {
			let mut inner = self.0.lock().unwrap();
			let (http::request::Parts { method, uri, headers, .. }, body) = req.into_parts();
			inner.requests.push(RecordedRequest { method, uri, headers, body: body.as_bytes().to_vec() });
			inner.responses.pop_front()
		};

		Box::pin(async move {
			match canned {
				Some(Canned::Response(response)) => Ok(response),
				Some(Canned::Error(message)) => Err(anyhow::anyhow!(message)),
				Some(Canned::Hang) => std::future::pending().await,
				None => Err(anyhow::anyhow!("no canned response left")),
			}
		})
	}
}

pub(crate) fn response(
	status: http::StatusCode,
	nonce: Option<&'static str>,
	headers: &[(http::HeaderName, &'static str)],
	body: Option<(&'static str, Vec<u8>)>,
) -> http_common::Response {
	let mut header_map = http::HeaderMap::new();
	if let Some(nonce) = nonce {
		header_map.insert("replay-nonce", http::HeaderValue::from_static(nonce));
	}
	for (name, value) in headers {
		header_map.append(name.clone(), http::HeaderValue::from_static(value));
	}

	http_common::Response {
		status,
		headers: header_map,
		body: body.map(|(content_type, body)| http_common::ResponseBody::new(http::HeaderValue::from_static(content_type), body)),
	}
}

pub(crate) fn directory() -> serde_json::Value {
	serde_json::json!({
		"new-reg": NEW_REG_URL,
		"new-authz": NEW_AUTHZ_URL,
		"new-cert": NEW_CERT_URL,
		"revoke-cert": REVOKE_CERT_URL,
		"new-nonce": NEW_NONCE_URL,
		"meta": {
			"terms-of-service": TERMS_URL,
		},
	})
}

/// Creates a session against the fake client, consuming one canned directory response that carries `nonce-0`.
pub(crate) async fn session<'a>(client: &FakeClient, logger: &'a log2::Logger) -> crate::Session<'a, TestKey> {
	client.push_json(http::StatusCode::OK, Some("nonce-0"), &[], directory());
	crate::Session::with_client(uri(DIRECTORY_URL), &TestKey, client.clone(), logger).await.unwrap()
}

/// A stand-in account key whose "signature" is the SHA-256 of the signing input.
pub(crate) struct TestKey;

impl TestKey {
	pub(crate) const X: &'static str = "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU";
	pub(crate) const Y: &'static str = "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0";

	pub(crate) fn expected_signature(envelope: &serde_json::Value) -> String {
		let signing_input = format!("{}.{}", envelope["protected"].as_str().unwrap(), envelope["payload"].as_str().unwrap());
		let hash = <sha2::Sha256 as sha2::Digest>::digest(signing_input.as_bytes());
		base64::Engine::encode(&crate::JWS_BASE64, hash)
	}
}

impl crate::AccountKey for TestKey {
	fn as_jwk(&self) -> crate::Jwk<'_> {
		crate::Jwk {
			crv: crate::EcCurve::P256,
			kty: "EC",
			x: Self::X,
			y: Self::Y,
		}
	}

	fn sign<'a, I>(&'a self, digest: I) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send + 'a>>
	where
		I: IntoIterator,
		<I as IntoIterator>::Item: AsRef<[u8]>,
	{
		let mut hasher: sha2::Sha256 = sha2::Digest::new();
		for part in digest {
			sha2::Digest::update(&mut hasher, part.as_ref());
		}
		let signature = base64::Engine::encode(&crate::JWS_BASE64, sha2::Digest::finalize(hasher));
		Box::pin(async move { Ok(signature) })
	}
}

/// A draft-style authorization body offering `http-01` on its own and `dns-01` + `tls-sni-02` together.
pub(crate) fn authorization(status: &str, challenge_statuses: [&str; 3]) -> serde_json::Value {
	serde_json::json!({
		"identifier": { "type": "dns", "value": "example.org" },
		"status": status,
		"expires": "2026-10-25T00:00:00Z",
		"challenges": [
			{
				"type": "http-01",
				"status": challenge_statuses[0],
				"uri": "https://example.com/acme/challenge/1/1",
				"token": "http-token",
			},
			{
				"type": "dns-01",
				"status": challenge_statuses[1],
				"uri": "https://example.com/acme/challenge/1/2",
				"token": "dns-token",
			},
			{
				"type": "tls-sni-02",
				"status": challenge_statuses[2],
				"url": "https://example.com/acme/challenge/1/3",
				"token": "tls-sni-token",
			},
		],
		"combinations": [[0], [1, 2]],
	})
}
