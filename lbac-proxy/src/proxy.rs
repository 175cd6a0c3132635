//! Per-upstream reverse-proxy engine (spec §4.6): builds one pooled
//! `reqwest::Client` per upstream from its resolved transport settings and
//! forwards a request, streaming the response body back unbuffered.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use lbac_core::config::{MtlsConfig, ProxyConfig, ResolvedProxyConfig, UpstreamConfig};
use lbac_core::Error;

/// A forwarding target: the upstream base URL plus a pooled client tuned
/// per `ResolvedProxyConfig` (spec §3, `ProxyConfig`).
pub struct Upstream {
	base_url: url::Url,
	client: reqwest::Client,
	extra_headers: Vec<(HeaderName, HeaderValue)>,
	actor_header: Option<HeaderName>,
}

impl Upstream {
	pub fn new(config: &UpstreamConfig, global_proxy: &ProxyConfig) -> Result<Self, lbac_core::StartupError> {
		if let Some(mtls) = &config.mtls {
			validate_mtls_material(mtls)?;
		}
		let resolved = config.proxy.resolve(global_proxy);
		let client = build_client(&resolved)
			.map_err(|e| lbac_core::StartupError::ConfigInvalid(format!("failed to build upstream client: {e}")))?;
		let base_url = url::Url::parse(&config.url)
			.map_err(|e| lbac_core::StartupError::ConfigInvalid(format!("invalid upstream url {:?}: {e}", config.url)))?;
		let extra_headers = config
			.headers
			.iter()
			.filter_map(|(k, v)| {
				let name = HeaderName::try_from(k.as_str()).ok()?;
				let value = HeaderValue::from_str(v).ok()?;
				Some((name, value))
			})
			.collect();
		let actor_header = config.actor_header.as_deref().and_then(|n| HeaderName::try_from(n).ok());
		Ok(Self { base_url, client, extra_headers, actor_header })
	}

	/// Forwards `method path` (the path+query the caller sent, post-rewrite)
	/// to this upstream, copying request headers except `Host`, and streams
	/// the response back without buffering the whole body in memory
	/// (spec §4.6, "streams the response back to the caller"). When this
	/// upstream has an `actor_header` configured, `actor` (the caller's
	/// username and email) is written as that header, base64-encoded
	/// (spec §4.6, §7 "Actor header") — otherwise nothing is added.
	pub async fn forward(
		&self,
		method: Method,
		path_and_query: &str,
		mut headers: HeaderMap,
		body: Body,
		actor: Option<(&str, &str)>,
	) -> Result<Response, Error> {
		let target = self
			.base_url
			.join(path_and_query)
			.map_err(|e| Error::Upstream(anyhow::anyhow!("invalid upstream path {path_and_query:?}: {e}")))?;

		headers.remove(http::header::HOST);
		// The caller's Content-Length describes the pre-rewrite body; a
		// form-encoded rewrite (spec §4.5) can change the byte length, so
		// drop it here and let the client recompute it from `body_bytes`.
		headers.remove(http::header::CONTENT_LENGTH);
		for (name, value) in &self.extra_headers {
			headers.insert(name.clone(), value.clone());
		}
		if let (Some(name), Some((username, email))) = (&self.actor_header, actor) {
			let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{email}"));
			if let Ok(value) = HeaderValue::from_str(&encoded) {
				headers.insert(name.clone(), value);
			}
		}

		let body_bytes = axum::body::to_bytes(body, usize::MAX)
			.await
			.map_err(|e| Error::Upstream(anyhow::anyhow!("failed to read request body: {e}")))?;

		let upstream_resp = self
			.client
			.request(method, target)
			.headers(headers)
			.body(body_bytes)
			.send()
			.await
			.map_err(|e| Error::Upstream(e.into()))?;

		let status = upstream_resp.status();
		let resp_headers = upstream_resp.headers().clone();
		let stream = upstream_resp.bytes_stream();

		let mut response = Response::builder().status(status);
		for (name, value) in resp_headers.iter() {
			if name == http::header::TRANSFER_ENCODING || name == http::header::CONNECTION {
				continue;
			}
			response = response.header(name, value);
		}
		response
			.body(Body::from_stream(stream))
			.map_err(|e| Error::Upstream(anyhow::anyhow!("failed to build response: {e}")))
	}
}

/// Validates that configured mTLS file paths are readable and parse as PEM
/// (spec §1, "TLS material loading... not implemented beyond rustls-pemfile
/// loading"; spec §6, "Exit codes" — a TLS material error is startup-fatal).
/// This stops at parsing; nothing here constructs a client identity from the
/// result, per the same out-of-scope note.
fn validate_mtls_material(mtls: &MtlsConfig) -> Result<(), lbac_core::StartupError> {
	let read_pem = |path: &std::path::Path| -> Result<Vec<u8>, lbac_core::StartupError> {
		std::fs::read(path)
			.map_err(|e| lbac_core::StartupError::TlsMaterial(format!("failed to read {}: {e}", path.display())))
	};

	if let Some(cert) = &mtls.cert {
		let bytes = read_pem(cert)?;
		let mut reader = std::io::BufReader::new(bytes.as_slice());
		let parsed = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>();
		if parsed.map(|v| v.is_empty()).unwrap_or(true) {
			return Err(lbac_core::StartupError::TlsMaterial(format!(
				"{} contains no parseable certificates",
				cert.display()
			)));
		}
	}
	if let Some(key) = &mtls.key {
		let bytes = read_pem(key)?;
		let mut reader = std::io::BufReader::new(bytes.as_slice());
		rustls_pemfile::private_key(&mut reader)
			.map_err(|e| lbac_core::StartupError::TlsMaterial(format!("{}: {e}", key.display())))?
			.ok_or_else(|| lbac_core::StartupError::TlsMaterial(format!("{} contains no private key", key.display())))?;
	}
	if let Some(ca) = &mtls.ca {
		let bytes = read_pem(ca)?;
		let mut reader = std::io::BufReader::new(bytes.as_slice());
		let parsed = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>();
		if parsed.map(|v| v.is_empty()).unwrap_or(true) {
			return Err(lbac_core::StartupError::TlsMaterial(format!("{} contains no parseable certificates", ca.display())));
		}
	}
	Ok(())
}

fn build_client(resolved: &ResolvedProxyConfig) -> Result<reqwest::Client, reqwest::Error> {
	reqwest::Client::builder()
		.timeout(resolved.request_timeout)
		.pool_idle_timeout(resolved.idle_conn_timeout)
		.pool_max_idle_per_host(resolved.max_idle_conns_per_host)
		.connect_timeout(Duration::from_secs(10))
		.use_rustls_tls()
		.http2_prior_knowledge_if(resolved.force_http2)
		.build()
}

/// `reqwest::ClientBuilder` has no conditional `http2_prior_knowledge`, so
/// this small extension keeps `build_client` a single expression the way
/// the rest of the proxy builders in this crate read.
trait ClientBuilderExt {
	fn http2_prior_knowledge_if(self, condition: bool) -> Self;
}

impl ClientBuilderExt for reqwest::ClientBuilder {
	fn http2_prior_knowledge_if(self, condition: bool) -> Self {
		if condition {
			self.http2_prior_knowledge()
		} else {
			self
		}
	}
}

pub fn error_response(err: &Error) -> Response {
	(err.status_code(), err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	fn tempfile(name: &str, contents: &[u8]) -> PathBuf {
		use std::sync::atomic::{AtomicU64, Ordering};
		static COUNTER: AtomicU64 = AtomicU64::new(0);
		let n = COUNTER.fetch_add(1, Ordering::Relaxed);
		let path = std::env::temp_dir().join(format!("lbac-proxy-test-{}-{n}-{name}", std::process::id()));
		std::fs::write(&path, contents).unwrap();
		path
	}

	#[test]
	fn missing_cert_file_is_tls_material_error() {
		let mtls = MtlsConfig { cert: Some(PathBuf::from("/nonexistent/cert.pem")), key: None, ca: None };
		assert!(validate_mtls_material(&mtls).is_err());
	}

	#[test]
	fn cert_file_with_no_pem_blocks_is_rejected() {
		let path = tempfile("empty-cert.pem", b"not a certificate");
		let mtls = MtlsConfig { cert: Some(path.clone()), key: None, ca: None };
		let result = validate_mtls_material(&mtls);
		let _ = std::fs::remove_file(&path);
		assert!(result.is_err());
	}

	#[test]
	fn absent_mtls_config_is_a_no_op() {
		let mtls = MtlsConfig::default();
		assert!(validate_mtls_material(&mtls).is_ok());
	}
}
