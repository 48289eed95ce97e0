use anyhow::Context;

mod key;

fn main() -> anyhow::Result<()> {
	{
		let logger = GlobalLogger;
		log::set_boxed_logger(Box::new(logger)).context("could not set global logger")?;
		log::set_max_level(log::LevelFilter::Info);
	}

	let settings = std::env::var("ACME_CLIENT_SETTINGS").context("could not read ACME_CLIENT_SETTINGS env var")?;
	let settings: Settings<'_> = serde_json::from_str(&settings).context("could not parse ACME_CLIENT_SETTINGS env var")?;

	let runtime =
		tokio::runtime::Builder::new_current_thread()
		.enable_io()
		.enable_time()
		.build()?;

	let logger = log2::Logger::new();
	let result = runtime.block_on(run(&settings, &logger));
	if let Err(err) = &result {
		logger.report_error(err);
	}
	result
}

async fn run(settings: &Settings<'_>, logger: &log2::Logger) -> anyhow::Result<()> {
	let user_agent: http_common::HeaderValue =
		concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
		.parse().expect("hard-coded user agent is valid HeaderValue");

	let account_key = key::AccountKey::load(&settings.acme_account_key_path).await?;

	let session =
		acme::Session::new(settings.acme_directory_url.0.clone(), &account_key, user_agent, logger).await
		.context("could not initialize ACME session")?
		.with_request_timeout(std::time::Duration::from_secs(settings.request_timeout_secs));

	let poll_timeout = std::time::Duration::from_secs(settings.poll_timeout_secs);

	{
		let agreement =
			if settings.agree_to_terms {
				session.directory().meta.terms_of_service.as_ref().map(|http_common::DeserializableUri(uri)| uri)
			}
			else {
				None
			};
		let mut registration =
			acme::Registration::create(&session, &[&*settings.acme_contact_url], agreement).await
			.context("could not register ACME account")?;

		if settings.agree_to_terms && registration.terms_of_service().is_some() && registration.agreement() != registration.terms_of_service() {
			registration.agree_to_terms().await.context("could not agree to terms of service")?;
		}
	}

	let mut authorizations = vec![];
	for domain_name in &settings.domain_names {
		let authorization =
			acme::Authorization::create(&session, domain_name).await
			.with_context(|| format!("could not create authorization for {domain_name}"))?;
		if acme::Resource::status(&authorization) != acme::Status::Valid {
			authorizations.push(authorization);
		}
	}

	if !authorizations.is_empty() {
		for authorization in &mut authorizations {
			let domain_name = authorization.domain().unwrap_or_default().to_owned();
			let challenges =
				authorization.find_combination_mut(&settings.challenge_types)
				.with_context(|| format!("CA does not offer any combination of {:?} for {domain_name}", settings.challenge_types))?;
			for challenge in challenges {
				if let Some(proof) = challenge.prepare()? {
					print_instructions(&domain_name, proof);
				}
			}
		}

		println!("Press Enter once the challenges above are in place.");
		let mut line = String::new();
		let _ = tokio::io::AsyncBufReadExt::read_line(&mut tokio::io::BufReader::new(tokio::io::stdin()), &mut line).await?;

		for authorization in &mut authorizations {
			let challenges = authorization.find_combination_mut(&settings.challenge_types).unwrap_or_default();
			for challenge in challenges {
				challenge.trigger().await?;
			}
		}

		let poller = acme::Poller::new(logger);
		let deadline = tokio::time::Instant::now() + poll_timeout;
		let statuses: futures_util::future::JoinAll<_> =
			authorizations.iter_mut()
			.map(|authorization| poller.poll_until_terminal(authorization, acme::Status::TERMINAL, deadline))
			.collect();
		let statuses = statuses.await;

		for (authorization, status) in authorizations.iter().zip(statuses) {
			let status = status?;
			if status != acme::Status::Valid {
				let problems: Vec<_> =
					authorization.challenges().iter()
					.filter_map(|challenge| challenge.error().map(ToString::to_string))
					.collect();
				return Err(anyhow::anyhow!(
					"authorization for {} is {status}: {}",
					authorization.domain().unwrap_or_default(),
					problems.join("; "),
				));
			}
		}
	}

	if let (Some(csr_path), Some(certificate_path)) = (&settings.csr_path, &settings.certificate_path) {
		let csr =
			tokio::fs::read(csr_path).await
			.with_context(|| format!("could not read CSR from {}", csr_path.display()))?;

		let mut certificate = acme::Certificate::request(&session, &csr).await.context("could not request certificate")?;
		if certificate.der().is_none() {
			let poller = acme::Poller::new(logger);
			let deadline = tokio::time::Instant::now() + poll_timeout;
			let _ = poller.poll_until_terminal(&mut certificate, &[acme::Status::Valid], deadline).await?;
		}

		let der = certificate.der().context("certificate was not issued")?;
		tokio::fs::write(certificate_path, der).await
			.with_context(|| format!("could not write certificate to {}", certificate_path.display()))?;

		logger.report_state("acme/certificate", acme::Resource::location(&certificate), format_args!("saved to {}", certificate_path.display()));
	}

	Ok(())
}

fn print_instructions(domain_name: &str, proof: &acme::Proof) {
	match proof {
		acme::Proof::Http01 { key_authorization, .. } => {
			let path = proof.http_path().unwrap_or_default();
			println!("http-01: serve {key_authorization:?} at http://{domain_name}{path}");
		},

		acme::Proof::Dns01 { txt_record, .. } => {
			println!("dns-01: create a TXT record {} with value {txt_record:?}", acme::Proof::dns_record_name(domain_name));
		},

		acme::Proof::TlsSni02 { sni_a, sni_b, .. } => {
			println!("tls-sni-02: serve a certificate with SANs {sni_a} and {sni_b} to TLS clients that request {sni_a}");
		},
	}
}

#[derive(serde::Deserialize)]
struct Settings<'a> {
	/// The directory URL of the ACME server
	acme_directory_url: http_common::DeserializableUri,

	/// The contact URL of the ACME account
	#[serde(borrow)]
	acme_contact_url: std::borrow::Cow<'a, str>,

	/// The PKCS#8 DER file holding the ECDSA P-256 account key
	acme_account_key_path: std::path::PathBuf,

	domain_names: Vec<String>,

	/// The challenge types that the operator is able to fulfill
	challenge_types: Vec<String>,

	#[serde(default)]
	agree_to_terms: bool,

	#[serde(default = "default_poll_timeout_secs")]
	poll_timeout_secs: u64,

	#[serde(default = "default_request_timeout_secs")]
	request_timeout_secs: u64,

	/// A DER CSR to submit once every domain is authorized. The certificate is written to `certificate_path`.
	csr_path: Option<std::path::PathBuf>,
	certificate_path: Option<std::path::PathBuf>,
}

const fn default_poll_timeout_secs() -> u64 {
	300
}

const fn default_request_timeout_secs() -> u64 {
	30
}

struct GlobalLogger;

impl log::Log for GlobalLogger {
	fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
		metadata.level() <= log::Level::Info
	}

	fn log(&self, record: &log::Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let timestamp = time2::rfc3339_milliseconds(time::OffsetDateTime::now_utc());
		let level = record.level();

		eprintln!("[{timestamp}] {level:5} {}", record.args());
	}

	fn flush(&self) {
	}
}
