//! Client-side state engine for the ACME certificate issuance protocol.
//!
//! A [`Session`] talks to one CA with one account key. [`Registration`], [`Authorization`],
//! [`Challenge`] and [`Certificate`] are client-side caches of the CA's resources, refreshed with
//! [`Resource::update`] and driven to a terminal status with the [`Poller`].

mod authorization;
pub use authorization::{Authorization, Identifier};

mod certificate;
pub use certificate::Certificate;

mod challenge;
pub use challenge::{Challenge, ChallengeKind, Proof};

mod error;
pub use error::{Error, Problem};

mod poller;
pub use poller::Poller;

mod registration;
pub use registration::Registration;

mod resource;
pub use resource::{Resource, Status};

mod session;
pub use session::{Directory, DirectoryMeta, Endpoint, Session};

#[cfg(test)]
mod test_util;

/// The account's signing key.
///
/// Only EC keys are supported.
pub trait AccountKey: Sync {
	fn as_jwk(&self) -> Jwk<'_>;

	/// Signs the concatenation of `digest`'s parts and returns the JWS signature, base64url-encoded
	/// with [`JWS_BASE64`].
	///
	/// The parts must be consumed before this function returns.
	fn sign<'a, I>(&'a self, digest: I) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send + 'a>>
	where
		I: IntoIterator,
		<I as IntoIterator>::Item: AsRef<[u8]>;
}

#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct Jwk<'a> {
	pub crv: EcCurve,
	pub kty: &'a str,
	pub x: &'a str,
	pub y: &'a str,
}

impl Jwk<'_> {
	/// The RFC 7638 thumbprint, base64url-encoded.
	///
	/// The fields of [`Jwk`] are declared in lexicographic order, so its JSON serialization is already canonical.
	pub fn thumbprint(&self) -> String {
		let jwk = serde_json::to_vec(self).expect("cannot fail to serialize JWK");
		let hash = <sha2::Sha256 as sha2::Digest>::digest(&jwk);
		base64::Engine::encode(&JWS_BASE64, hash)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum EcCurve {
	#[serde(rename = "P-256")]
	P256,

	#[serde(rename = "P-384")]
	P384,

	#[serde(rename = "P-521")]
	P521,
}

impl EcCurve {
	pub const fn jws_sign_alg(self) -> &'static str {
		match self {
			EcCurve::P256 => "ES256",
			EcCurve::P384 => "ES384",
			EcCurve::P521 => "ES512",
		}
	}
}

pub const JWS_BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;
