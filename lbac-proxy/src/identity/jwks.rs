//! JWKS fetch/refresh (spec §4.3). Holds a concurrency-safe, periodically
//! refreshed decoding-key set and an optional statically embedded key used
//! for the alert ingestion path, mirroring the teacher's
//! `JwtAuthenticator`/`sync_jwks_loop` split (`authn.rs`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
	#[error("failed to fetch JWKS from {url}: {source}")]
	Fetch {
		url: String,
		#[source]
		source: reqwest::Error,
	},
	#[error("failed to parse JWKS response from {url}: {source}")]
	Parse {
		url: String,
		#[source]
		source: serde_json::Error,
	},
	#[error("no key with kid {0:?} in the fetched JWKS")]
	UnknownKid(Option<String>),
}

struct Keys {
	// Keyed by `kid`; a JWK with no `kid` is stored under the empty string
	// and used as a fallback for tokens whose header omits `kid`.
	by_kid: HashMap<String, DecodingKey>,
}

impl Keys {
	fn empty() -> Self {
		Self { by_kid: HashMap::new() }
	}

	fn from_jwk_set(set: &JwkSet) -> Result<Self, JwksError> {
		let mut by_kid = HashMap::new();
		for jwk in &set.keys {
			if let Ok(key) = DecodingKey::from_jwk(jwk) {
				by_kid.insert(jwk.common.key_id.clone().unwrap_or_default(), key);
			}
		}
		Ok(Self { by_kid })
	}

	fn get(&self, kid: &Option<String>) -> Option<&DecodingKey> {
		match kid {
			Some(kid) => self.by_kid.get(kid).or_else(|| self.by_kid.get("")),
			None => self.by_kid.get(""),
		}
	}
}

/// A set of remote JWKS endpoints, refreshed on a fixed interval in the
/// background, plus an optional embedded static key for the alert path
/// (spec §4.3).
pub struct JwksStore {
	client: reqwest::Client,
	urls: Vec<String>,
	keys: RwLock<Keys>,
	static_key: Option<DecodingKey>,
	refresh_interval: Duration,
}

impl JwksStore {
	pub fn new(urls: Vec<String>, static_jwk_json: Option<&str>, refresh_interval: Duration) -> Result<Self, JwksError> {
		let static_key = match static_jwk_json {
			Some(raw) => {
				let jwk: jsonwebtoken::jwk::Jwk =
					serde_json::from_str(raw).map_err(|e| JwksError::Parse {
						url: "<embedded>".to_string(),
						source: e,
					})?;
				Some(DecodingKey::from_jwk(&jwk).map_err(|_| JwksError::UnknownKid(None))?)
			},
			None => None,
		};
		Ok(Self {
			client: reqwest::Client::new(),
			urls,
			keys: RwLock::new(Keys::empty()),
			static_key,
			refresh_interval,
		})
	}

	pub async fn refresh_once(&self) -> Result<(), JwksError> {
		let mut merged = Keys::empty();
		for url in &self.urls {
			let resp = self
				.client
				.get(url)
				.send()
				.await
				.map_err(|e| JwksError::Fetch { url: url.clone(), source: e })?;
			let text = resp.text().await.map_err(|e| JwksError::Fetch { url: url.clone(), source: e })?;
			let set: JwkSet = serde_json::from_str(&text).map_err(|e| JwksError::Parse { url: url.clone(), source: e })?;
			let parsed = Keys::from_jwk_set(&set)?;
			merged.by_kid.extend(parsed.by_kid);
		}
		*self.keys.write().await = merged;
		Ok(())
	}

	/// Looks up the decoding key for a token header's `kid`, falling back to
	/// the statically embedded key if present.
	pub async fn key_for(&self, kid: &Option<String>) -> Option<DecodingKey> {
		if let Some(key) = self.keys.read().await.get(kid) {
			return Some(key.clone());
		}
		self.static_key.clone()
	}

	pub fn has_remote(&self) -> bool {
		!self.urls.is_empty()
	}
}

/// Runs `store.refresh_once` on a fixed interval until cancelled. A failed
/// refresh leaves the previous key set in place (spec §5: "readers take a
/// snapshot... refreshed in the background... concurrency-safe for
/// readers").
pub async fn refresh_loop(store: Arc<JwksStore>, ct: CancellationToken) {
	if !store.has_remote() {
		return;
	}
	loop {
		tokio::select! {
			_ = ct.cancelled() => {
				tracing::info!("jwks refresh loop cancelled");
				return;
			},
			_ = tokio::time::sleep(store.refresh_interval) => {
				match store.refresh_once().await {
					Ok(()) => tracing::debug!("refreshed jwks"),
					Err(e) => tracing::warn!(error = %e, "jwks refresh failed, keeping previous key set"),
				}
			}
		}
	}
}
