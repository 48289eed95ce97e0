use crate::{AccountKey, Endpoint, Error, Resource, Session, Status, JWS_BASE64};

/// An issued, or soon to be issued, certificate.
pub struct Certificate<'a, K> {
	session: &'a Session<'a, K>,
	location: http::Uri,
	der: Option<Vec<u8>>,
	chain_location: Option<http::Uri>,
	fetched_at: Option<time::OffsetDateTime>,
}

#[derive(Debug)]
enum CertificateResponse {
	Issued {
		der: Vec<u8>,
		chain_location: Option<http::Uri>,
	},

	Pending {
		retry_after: Option<std::time::Duration>,
	},
}

impl http_common::FromResponse for CertificateResponse {
	fn from_response(
		status: http::StatusCode,
		body: Option<&http_common::ResponseBody>,
		headers: http::HeaderMap,
	) -> anyhow::Result<Option<Self>> {
		Ok(match (status, body) {
			(http::StatusCode::OK | http::StatusCode::CREATED, Some(body)) if body.as_bytes("application/pkix-cert").is_ok() => {
				let der = body.as_bytes("application/pkix-cert")?.to_vec();
				let chain_location = http_common::get_link(&headers, "up");
				Some(CertificateResponse::Issued { der, chain_location })
			},

			(http::StatusCode::CREATED | http::StatusCode::ACCEPTED, _) => {
				Some(CertificateResponse::Pending { retry_after: crate::resource::retry_after(&headers) })
			},

			_ => None,
		})
	}
}

impl<'a, K> Certificate<'a, K> where K: AccountKey {
	/// A certificate known only by its location. Call [`Certificate::download`] to get it.
	pub fn new(session: &'a Session<'a, K>, location: http::Uri) -> Self {
		Certificate {
			session,
			location,
			der: None,
			chain_location: None,
			fetched_at: None,
		}
	}

	/// Asks the CA to issue a certificate for the DER-encoded CSR.
	///
	/// Every identifier in the CSR must already have a valid authorization. The CA may issue the certificate
	/// immediately, in which case it is available from [`Certificate::der`] right away.
	pub async fn request(session: &'a Session<'a, K>, csr: &[u8]) -> Result<Self, Error> {
		#[derive(serde::Serialize)]
		struct NewCertificateRequest<'a> {
			resource: &'a str,
			csr: &'a str,
		}

		let new_cert_url = session.endpoint(Endpoint::NewCert)?;
		let csr = base64::Engine::encode(&JWS_BASE64, csr);

		let http_common::ResponseWithLocation { body, location } =
			session.logger().report_operation("acme/certificate", new_cert_url, log2::ScopedObjectOperation::Create { value: &csr }, async {
				session.post::<_, http_common::ResponseWithLocation<CertificateResponse>>(new_cert_url, &NewCertificateRequest {
					resource: "new-cert",
					csr: &csr,
				}).await
			}).await?;

		let mut certificate = Self::new(session, location);
		certificate.apply(body);
		Ok(certificate)
	}

	/// Revokes the DER-encoded certificate, which must have been issued to the session's account.
	pub async fn revoke(session: &'a Session<'a, K>, certificate: &[u8]) -> Result<(), Error> {
		#[derive(serde::Serialize)]
		struct RevokeCertificateRequest<'a> {
			resource: &'a str,
			certificate: &'a str,
		}

		let revoke_cert_url = session.endpoint(Endpoint::RevokeCert)?;
		let certificate = base64::Engine::encode(&JWS_BASE64, certificate);

		session.logger().report_operation("acme/certificate", revoke_cert_url, <log2::ScopedObjectOperation<'_>>::Delete, async {
			let () = session.post(revoke_cert_url, &RevokeCertificateRequest {
				resource: "revoke-cert",
				certificate: &certificate,
			}).await?;
			Ok(())
		}).await
	}

	/// The DER-encoded certificate, once issued.
	pub fn der(&self) -> Option<&[u8]> {
		self.der.as_deref()
	}

	/// The location of the issuer's certificate.
	pub fn chain_location(&self) -> Option<&http::Uri> {
		self.chain_location.as_ref()
	}

	/// Fetches the certificate.
	///
	/// Resolves to the CA's suggested delay before trying again if the certificate has not been issued yet.
	pub async fn download(&mut self) -> Result<Option<std::time::Duration>, Error> {
		let session = self.session;
		let response =
			session.logger().report_operation("acme/certificate", &self.location, <log2::ScopedObjectOperation<'_>>::Get, async {
				session.fetch::<CertificateResponse>(&self.location).await
			}).await?;

		Ok(self.apply(response))
	}

	fn apply(&mut self, response: CertificateResponse) -> Option<std::time::Duration> {
		self.fetched_at = Some(time::OffsetDateTime::now_utc());

		match response {
			CertificateResponse::Issued { der, chain_location } => {
				self.der = Some(der);
				self.chain_location = chain_location;
				self.session.logger().report_state("acme/certificate", &self.location, format_args!("issued"));
				None
			},

			CertificateResponse::Pending { retry_after } => {
				self.der = None;
				self.chain_location = None;
				self.session.logger().report_state("acme/certificate", &self.location, format_args!("pending"));
				retry_after
			},
		}
	}
}

impl<K> Resource for Certificate<'_, K> where K: AccountKey {
	fn location(&self) -> &http::Uri {
		&self.location
	}

	/// `valid` once the certificate has been downloaded, `pending` until then.
	fn status(&self) -> Status {
		if self.der.is_some() { Status::Valid } else { Status::Pending }
	}

	fn fetched_at(&self) -> Option<time::OffsetDateTime> {
		self.fetched_at
	}

	fn update(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<std::time::Duration>, Error>> + Send + '_>> {
		Box::pin(self.download())
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		test_util::{self, Canned, FakeClient},
		Resource,
	};

	#[tokio::test]
	async fn request_then_download() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push(Canned::Response(test_util::response(
			http::StatusCode::CREATED,
			Some("nonce-1"),
			&[(http::header::LOCATION, test_util::CERT_URL), (http::header::RETRY_AFTER, "3")],
			None,
		)));
		let mut certificate = super::Certificate::request(&session, b"\x30\x82csr").await.unwrap();
		assert_eq!(certificate.location(), test_util::CERT_URL);
		assert_eq!(certificate.status(), crate::Status::Pending);
		assert!(certificate.der().is_none());

		let requests = client.requests();
		assert_eq!(requests[1].uri, test_util::NEW_CERT_URL);
		assert_eq!(requests[1].claims(), serde_json::json!({ "resource": "new-cert", "csr": "MIJjc3I" }));

		client.push(Canned::Response(test_util::response(http::StatusCode::ACCEPTED, None, &[(http::header::RETRY_AFTER, "5")], None)));
		assert_eq!(certificate.update().await.unwrap(), Some(std::time::Duration::from_secs(5)));
		assert_eq!(certificate.status(), crate::Status::Pending);

		client.push(Canned::Response(test_util::response(
			http::StatusCode::OK,
			None,
			&[(http::header::LINK, r#"<https://example.com/acme/issuer-cert>;rel="up""#)],
			Some(("application/pkix-cert", b"\x30\x82cert".to_vec())),
		)));
		assert_eq!(certificate.update().await.unwrap(), None);
		assert_eq!(certificate.status(), crate::Status::Valid);
		assert_eq!(certificate.der(), Some(&b"\x30\x82cert"[..]));
		assert_eq!(certificate.chain_location().unwrap(), "https://example.com/acme/issuer-cert");
	}

	#[tokio::test]
	async fn issued_immediately() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push(Canned::Response(test_util::response(
			http::StatusCode::CREATED,
			Some("nonce-1"),
			&[(http::header::LOCATION, test_util::CERT_URL)],
			Some(("application/pkix-cert", b"\x30\x82cert".to_vec())),
		)));
		let certificate = super::Certificate::request(&session, b"\x30\x82csr").await.unwrap();
		assert_eq!(certificate.status(), crate::Status::Valid);
		assert_eq!(certificate.der(), Some(&b"\x30\x82cert"[..]));
	}

	#[tokio::test]
	async fn revoke() {
		let logger = log2::Logger::new();
		let client = FakeClient::default();
		let session = test_util::session(&client, &logger).await;

		client.push(Canned::Response(test_util::response(http::StatusCode::OK, Some("nonce-1"), &[], None)));
		super::Certificate::revoke(&session, b"\x30\x82cert").await.unwrap();

		let requests = client.requests();
		assert_eq!(requests[1].uri, test_util::REVOKE_CERT_URL);
		assert_eq!(requests[1].claims(), serde_json::json!({ "resource": "revoke-cert", "certificate": "MIJjZXJ0" }));

		client.push_problem(http::StatusCode::CONFLICT, Some("nonce-2"), "urn:acme:error:malformed");
		let err = super::Certificate::revoke(&session, b"\x30\x82cert").await.unwrap_err();
		assert!(matches!(err, crate::Error::CaProblem { .. }), "{err:?}");
	}
}
