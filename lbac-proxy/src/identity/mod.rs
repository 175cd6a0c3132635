//! Identity & token service (spec §4.3): token extraction, JWT validation
//! against the JWKS, and claim extraction into a `UserIdentity`.

pub mod jwks;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use jsonwebtoken::{Validation, decode, decode_header};
use lbac_core::config::{AdminConfig, AlertConfig, AuthConfig};
use lbac_core::{Error, StartupError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use jwks::JwksStore;

/// The caller's derived identity: username plus group memberships, used as
/// the key for policy resolution (spec §3, `UserIdentity`). Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserIdentity {
	pub username: String,
	pub groups: HashSet<String>,
}

impl UserIdentity {
	/// `username \0 sorted-groups`, used as the label-store merge-cache key
	/// (spec §3, "Label-store state").
	pub fn fingerprint(&self) -> String {
		let mut groups: Vec<&str> = self.groups.iter().map(String::as_str).collect();
		groups.sort_unstable();
		format!("{}\0{}", self.username, groups.join(","))
	}

	pub fn is_admin(&self, admin_group: &str) -> bool {
		!admin_group.is_empty()
			&& self
				.groups
				.iter()
				.any(|g| g.eq_ignore_ascii_case(admin_group))
	}
}

/// The raw token plus the claims extracted from it. Email is informational
/// only, never used for authorization (spec §3).
#[derive(Debug, Clone)]
pub struct OAuthToken {
	pub raw: String,
	pub username: String,
	pub email: String,
	pub groups: Vec<String>,
}

impl OAuthToken {
	pub fn identity(&self) -> UserIdentity {
		UserIdentity {
			username: self.username.clone(),
			groups: self.groups.iter().cloned().collect(),
		}
	}
}

/// Extracts the bearer token from `headers` under `header_name`, requiring
/// `scheme` as a literal prefix followed by whitespace. An empty scheme
/// means the header value is the raw token (spec §4.3, §6).
pub fn extract_token<'a>(
	headers: &'a HeaderMap,
	header_name: &str,
	scheme: &str,
) -> Result<&'a str, Error> {
	let value = headers
		.get(header_name)
		.ok_or_else(|| Error::MissingAuthHeader { header: header_name.to_string() })?
		.to_str()
		.map_err(|_| Error::InvalidAuthHeader { header: header_name.to_string() })?;

	if scheme.is_empty() {
		return Ok(value.trim());
	}

	let rest = value
		.strip_prefix(scheme)
		.ok_or_else(|| Error::InvalidAuthHeader { header: header_name.to_string() })?;
	if !rest.starts_with(char::is_whitespace) {
		return Err(Error::InvalidAuthHeader { header: header_name.to_string() });
	}
	let token = rest.trim_start();
	if token.is_empty() {
		return Err(Error::InvalidAuthHeader { header: header_name.to_string() });
	}
	Ok(token)
}

fn claim_str(claims: &serde_json::Map<String, Value>, key: &str) -> String {
	if key.is_empty() {
		return String::new();
	}
	claims.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn claim_groups(claims: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
	if key.is_empty() {
		return Vec::new();
	}
	match claims.get(key) {
		Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
		Some(Value::String(single)) => vec![single.clone()],
		_ => Vec::new(),
	}
}

/// Ties together JWKS lookup, header/scheme extraction, and claim-name
/// configuration into a single `authenticate` operation for the pipeline.
pub struct IdentityService {
	jwks: Arc<JwksStore>,
	auth: AuthConfig,
	alert: AlertConfig,
	admin: AdminConfig,
}

impl IdentityService {
	pub async fn new(auth: AuthConfig, alert: AlertConfig, admin: AdminConfig) -> Result<Self, StartupError> {
		let urls = if auth.jwks_cert_url.is_empty() {
			Vec::new()
		} else {
			vec![auth.jwks_cert_url.clone()]
		};
		let static_jwk = alert.cert_material.as_deref();
		let jwks = JwksStore::new(urls, static_jwk, Duration::from_secs(60))
			.map_err(|e| StartupError::JwksUnreachable { url: auth.jwks_cert_url.clone(), source: e.into() })?;
		if jwks.has_remote() {
			jwks.refresh_once().await.map_err(|e| StartupError::JwksUnreachable {
				url: auth.jwks_cert_url.clone(),
				source: e.into(),
			})?;
		}
		Ok(Self { jwks: Arc::new(jwks), auth, alert, admin })
	}

	pub fn spawn_refresh_loop(&self, ct: CancellationToken) -> tokio::task::JoinHandle<()> {
		let store = self.jwks.clone();
		tokio::spawn(jwks::refresh_loop(store, ct))
	}

	pub fn admin_group(&self) -> &str {
		&self.admin.group
	}

	pub fn admin_bypass_enabled(&self) -> bool {
		self.admin.bypass
	}

	/// Extracts and validates the bearer token from `headers`, trying the
	/// primary header first and, if alert mode is enabled, the alert
	/// fallback header with the same scheme rules (spec §4.3).
	pub async fn authenticate(&self, headers: &HeaderMap) -> Result<OAuthToken, Error> {
		let primary = extract_token(headers, &self.auth.auth_header, &self.auth.auth_scheme);
		let token = match (primary, self.alert.enabled) {
			(Ok(t), _) => t,
			(Err(_), true) => extract_token(headers, &self.alert.token_header, &self.auth.auth_scheme)?,
			(Err(e), false) => return Err(e),
		};

		let header = decode_header(token).map_err(Error::TokenParse)?;
		let key = self
			.jwks
			.key_for(&header.kid)
			.await
			.ok_or_else(|| Error::TokenInvalid(jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into()))?;

		let mut validation = Validation::new(header.alg);
		// Audience/issuer checks are the identity provider's concern; this
		// proxy only needs signature and expiry to trust the claims.
		validation.validate_aud = false;

		let data = decode::<serde_json::Map<String, Value>>(token, &key, &validation)
			.map_err(Error::TokenInvalid)?;

		Ok(OAuthToken {
			raw: token.to_string(),
			username: claim_str(&data.claims, &self.auth.claims.username),
			email: claim_str(&data.claims, &self.auth.claims.email),
			groups: claim_groups(&data.claims, &self.auth.claims.groups),
		})
	}
}
