use anyhow::Context;

/// An ECDSA P-256 account key held in memory.
pub(crate) struct AccountKey {
	rng: ring::rand::SystemRandom,
	inner: ring::signature::EcdsaKeyPair,
	x: String,
	y: String,
}

impl AccountKey {
	pub(crate) fn from_pkcs8_der(pkcs8_der: &[u8]) -> anyhow::Result<Self> {
		let rng = ring::rand::SystemRandom::new();
		let inner =
			ring::signature::EcdsaKeyPair::from_pkcs8(&ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8_der, &rng)
			.map_err(|err| anyhow::anyhow!("{err}"))
			.context("could not parse account key as a PKCS#8 ECDSA P-256 key")?;

		let (x, y) = {
			let public_key = ring::signature::KeyPair::public_key(&inner).as_ref();
			let coordinates = match public_key {
				[0x04, coordinates @ ..] if coordinates.len() == 64 => coordinates,
				_ => return Err(anyhow::anyhow!("account key's public key is not an uncompressed P-256 point")),
			};
			let (x, y) = coordinates.split_at(32);
			(base64::Engine::encode(&acme::JWS_BASE64, x), base64::Engine::encode(&acme::JWS_BASE64, y))
		};

		Ok(AccountKey { rng, inner, x, y })
	}

	pub(crate) async fn load(path: &std::path::Path) -> anyhow::Result<Self> {
		let pkcs8_der =
			tokio::fs::read(path).await
			.with_context(|| format!("could not read account key from {}", path.display()))?;
		Self::from_pkcs8_der(&pkcs8_der)
	}
}

impl acme::AccountKey for AccountKey {
	fn as_jwk(&self) -> acme::Jwk<'_> {
		acme::Jwk {
			crv: acme::EcCurve::P256,
			kty: "EC",
			x: &self.x,
			y: &self.y,
		}
	}

	fn sign<'a, I>(&'a self, digest: I) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send + 'a>>
	where
		I: IntoIterator,
		<I as IntoIterator>::Item: AsRef<[u8]>,
	{
		let mut message = vec![];
		for part in digest {
			message.extend_from_slice(part.as_ref());
		}
		let signature =
			self.inner.sign(&self.rng, &message)
			.map_err(|err| anyhow::anyhow!("{err}"))
			.context("could not sign JWS");
		Box::pin(async move {
			let signature = signature?;
			Ok(base64::Engine::encode(&acme::JWS_BASE64, signature.as_ref()))
		})
	}
}

#[cfg(test)]
mod tests {
	fn generate() -> super::AccountKey {
		let rng = ring::rand::SystemRandom::new();
		let pkcs8 = ring::signature::EcdsaKeyPair::generate_pkcs8(&ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
		super::AccountKey::from_pkcs8_der(pkcs8.as_ref()).unwrap()
	}

	#[test]
	fn jwk_coordinates() {
		let key = generate();
		let jwk = acme::AccountKey::as_jwk(&key);
		assert_eq!(jwk.crv, acme::EcCurve::P256);
		assert_eq!(jwk.x.len(), 43);
		assert_eq!(jwk.y.len(), 43);
		assert_eq!(jwk.thumbprint().len(), 43);
	}

	#[tokio::test]
	async fn signature_verifies() {
		let key = generate();
		let signature = acme::AccountKey::sign(&key, [&b"protected"[..], &b"."[..], &b"payload"[..]]).await.unwrap();
		let signature = base64::Engine::decode(&acme::JWS_BASE64, signature).unwrap();
		assert_eq!(signature.len(), 64);

		let public_key = ring::signature::KeyPair::public_key(&key.inner);
		ring::signature::UnparsedPublicKey::new(&ring::signature::ECDSA_P256_SHA256_FIXED, public_key.as_ref())
			.verify(b"protected.payload", &signature)
			.unwrap();
	}

	#[test]
	fn garbage_is_rejected() {
		assert!(super::AccountKey::from_pkcs8_der(b"not a key").is_err());
	}
}
