use anyhow::Context;

pub use hyper::{
	Method,
	Request,
	StatusCode,
	Uri,
	body::Bytes,
	header::{
		CONTENT_TYPE,
		HeaderMap,
		HeaderName,
		HeaderValue,
		LINK,
		LOCATION,
		RETRY_AFTER,
	},
};

/// Executes a single HTTP exchange.
///
/// This is the seam between the protocol code and the network, so that the protocol code
/// can be driven with canned responses.
pub trait HttpClient: Send + Sync {
	fn execute(&self, req: Request<RequestBody>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Response>> + Send + '_>>;
}

impl<T> HttpClient for std::sync::Arc<T> where T: HttpClient + ?Sized {
	fn execute(&self, req: Request<RequestBody>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Response>> + Send + '_>> {
		(**self).execute(req)
	}
}

pub struct Client {
	inner: hyper_util::client::legacy::Client<
		hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
		RequestBody,
	>,
	user_agent: HeaderValue,
}

impl Client {
	pub fn new(user_agent: HeaderValue) -> anyhow::Result<Self> {
		let connector =
			hyper_rustls::HttpsConnectorBuilder::new()
			.with_webpki_roots()
			.https_or_http()
			.enable_http1()
			.build();

		let inner = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

		Ok(Client {
			inner,
			user_agent,
		})
	}
}

impl HttpClient for Client {
	fn execute(&self, mut req: Request<RequestBody>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Response>> + Send + '_>> {
		req.headers_mut().insert(hyper::header::USER_AGENT, self.user_agent.clone());

		Box::pin(async move {
			let res = self.inner.request(req).await.context("could not execute request")?;

			let (http::response::Parts { status, mut headers, .. }, body) = res.into_parts();

			let body = http_body_util::BodyExt::collect(body).await.context("could not read response body")?.to_bytes();

			// A body without a content type is not something any caller can interpret.
			let body = headers.remove(CONTENT_TYPE).map(|content_type| ResponseBody {
				content_type,
				body,
			});

			Ok(Response {
				status,
				headers,
				body,
			})
		})
	}
}

#[derive(Debug, Default)]
pub struct RequestBody(Option<Bytes>);

impl RequestBody {
	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_deref().unwrap_or_default()
	}
}

impl<T> From<T> for RequestBody where T: Into<Bytes> {
	fn from(buf: T) -> Self {
		Self(Some(buf.into()))
	}
}

impl hyper::body::Body for RequestBody {
	type Data = Bytes;
	type Error = std::convert::Infallible;

	fn poll_frame(mut self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Result<hyper::body::Frame<Self::Data>, Self::Error>>> {
		std::task::Poll::Ready(self.0.take().map(|buf| Ok(hyper::body::Frame::data(buf))))
	}

	fn is_end_stream(&self) -> bool {
		self.0.is_none()
	}

	fn size_hint(&self) -> hyper::body::SizeHint {
		let len = self.0.as_ref().map_or(0, Bytes::len);
		hyper::body::SizeHint::with_exact(len.try_into().unwrap_or(u64::MAX))
	}
}

#[derive(Debug)]
pub struct Response {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: Option<ResponseBody>,
}

#[derive(Clone, Debug)]
pub struct ResponseBody {
	content_type: HeaderValue,
	body: Bytes,
}

impl ResponseBody {
	pub fn new(content_type: HeaderValue, body: impl Into<Bytes>) -> Self {
		ResponseBody {
			content_type,
			body: body.into(),
		}
	}

	pub fn content_type(&self) -> &HeaderValue {
		&self.content_type
	}

	pub fn is_json(&self) -> bool {
		is_json(&self.content_type)
	}

	pub fn as_json<'de, T>(&'de self) -> anyhow::Result<T> where T: serde::Deserialize<'de> {
		if !self.is_json() {
			return Err(anyhow::anyhow!("response body does not have content-type:application/json"));
		}

		Ok(serde_json::from_slice(&self.body)?)
	}

	pub fn as_str(&self, expected_content_type: &str) -> anyhow::Result<&str> {
		let body = self.as_bytes(expected_content_type)?;
		Ok(std::str::from_utf8(body)?)
	}

	pub fn as_bytes(&self, expected_content_type: &str) -> anyhow::Result<&[u8]> {
		let content_type_matches =
			self.content_type.to_str()
			.is_ok_and(|content_type| media_type(content_type).eq_ignore_ascii_case(expected_content_type));
		if !content_type_matches {
			return Err(anyhow::anyhow!("response body does not have content-type:{expected_content_type}"));
		}

		Ok(&self.body)
	}

	pub fn raw(&self) -> &Bytes {
		&self.body
	}
}

/// Matches `application/json` as well as any `+json` structured syntax suffix,
/// such as `application/problem+json`.
pub fn is_json(content_type: &HeaderValue) -> bool {
	content_type.to_str()
	.is_ok_and(|content_type| {
		let media_type = media_type(content_type);
		media_type.eq_ignore_ascii_case("application/json") || media_type.to_ascii_lowercase().ends_with("+json")
	})
}

fn media_type(content_type: &str) -> &str {
	content_type.split(';').next().unwrap_or_default().trim()
}

pub trait FromResponse: Sized {
	fn from_response(
		status: StatusCode,
		body: Option<&ResponseBody>,
		headers: HeaderMap,
	) -> anyhow::Result<Option<Self>>;
}

impl FromResponse for () {
	fn from_response(
		status: StatusCode,
		_body: Option<&ResponseBody>,
		_headers: HeaderMap,
	) -> anyhow::Result<Option<Self>> {
		Ok(status.is_success().then_some(()))
	}
}

#[derive(Debug)]
pub struct ResponseWithLocation<T> {
	pub body: T,
	pub location: Uri,
}

impl<T> FromResponse for ResponseWithLocation<T> where T: FromResponse {
	fn from_response(
		status: StatusCode,
		body: Option<&ResponseBody>,
		headers: HeaderMap,
	) -> anyhow::Result<Option<Self>> {
		let location = headers.get(LOCATION).cloned();

		match T::from_response(status, body, headers) {
			Ok(Some(body)) => {
				let location =
					location.context("missing location header")?
					.as_bytes()
					.try_into().context("could not parse location header")?;
				Ok(Some(ResponseWithLocation { body, location }))
			},
			Ok(None) => Ok(None),
			Err(err) => Err(err),
		}
	}
}

pub fn get_retry_after(
	headers: &HeaderMap,
	min: std::time::Duration,
	max: std::time::Duration,
) -> anyhow::Result<Option<std::time::Duration>> {
	let Some(retry_after) = headers.get(RETRY_AFTER) else { return Ok(None); };

	let retry_after = retry_after.to_str().context("could not parse retry-after header")?;

	// Ref:
	//
	// - https://tools.ietf.org/html/rfc7231#section-7.1.3
	// - https://tools.ietf.org/html/rfc7231#section-7.1.1.1

	let retry_after =
		if let Ok(secs) = retry_after.parse() {
			std::time::Duration::from_secs(secs)
		}
		else if let Ok(date) = httpdate::parse_http_date(retry_after) {
			let diff = time::OffsetDateTime::from(date) - time::OffsetDateTime::now_utc();
			// A date in the past means "now".
			diff.try_into().unwrap_or_default()
		}
		else {
			return Err(anyhow::anyhow!("could not parse retry-after header as delay-seconds or HTTP-date"));
		};

	Ok(Some(retry_after.clamp(min, max)))
}

/// Finds the target of the first `Link` header entry whose `rel` parameter contains `rel`.
///
/// Ref: <https://tools.ietf.org/html/rfc8288#section-3>
pub fn get_link(headers: &HeaderMap, rel: &str) -> Option<Uri> {
	headers.get_all(LINK).iter()
	.filter_map(|value| value.to_str().ok())
	.flat_map(|value| value.split(','))
	.find_map(|link| {
		let (target, params) = link.trim().strip_prefix('<')?.split_once('>')?;

		let rel_matches = params.split(';').any(|param| {
			let Some((name, value)) = param.split_once('=') else { return false; };
			name.trim().eq_ignore_ascii_case("rel") &&
				value.trim().trim_matches('"').split_ascii_whitespace().any(|value| value.eq_ignore_ascii_case(rel))
		});

		if rel_matches {
			target.trim().parse().ok()
		}
		else {
			None
		}
	})
}

#[derive(Clone, PartialEq, Eq)]
pub struct DeserializableUri(pub Uri);

impl std::fmt::Debug for DeserializableUri {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl<'de> serde::Deserialize<'de> for DeserializableUri {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: serde::Deserializer<'de> {
		struct Visitor;

		impl serde::de::Visitor<'_> for Visitor {
			type Value = Uri;

			fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				f.write_str("Uri")
			}

			fn visit_str<E>(self, s: &str) -> Result<Self::Value, E> where E: serde::de::Error {
				s.try_into().map_err(serde::de::Error::custom)
			}

			fn visit_string<E>(self, s: String) -> Result<Self::Value, E> where E: serde::de::Error {
				s.try_into().map_err(serde::de::Error::custom)
			}
		}

		Ok(DeserializableUri(deserializer.deserialize_string(Visitor)?))
	}
}

impl serde::Serialize for DeserializableUri {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: serde::Serializer {
		serializer.collect_str(&self.0)
	}
}
