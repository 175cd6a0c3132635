//! Shared test scaffolding, grounded on the teacher's `tests/common/compare.rs`
//! split (one small helper module `mod`-included by each integration test
//! file rather than copy-pasted).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use lbac_core::config::{AdminConfig, AlertConfig, AuthConfig, ProxyConfig, UpstreamConfig};
use lbac_proxy::identity::IdentityService;
use lbac_proxy::labelstore::LabelStore;
use lbac_proxy::proxy::Upstream;

/// A throwaway HS256 secret shared between the signer and the embedded JWK
/// so the identity service can validate tokens with no network JWKS
/// endpoint, matching the "alert" path's `cert_material` field (spec
/// §4.3) repurposed here purely as an offline test fixture.
const TEST_HMAC_SECRET: &[u8] = b"lbac-integration-test-secret-not-for-production-use";

fn embedded_jwk_json() -> String {
	let k = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(TEST_HMAC_SECRET);
	format!(r#"{{"kty":"oct","k":"{k}","alg":"HS256"}}"#)
}

/// Signs a token carrying `username`/`groups` under the default claim
/// names (spec §4.3, `ClaimNames::default`), expiring an hour from now.
pub fn sign_token(username: &str, groups: &[&str]) -> String {
	let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3600;
	let claims = serde_json::json!({
		"preferred_username": username,
		"email": format!("{username}@example.test"),
		"groups": groups,
		"exp": exp,
	});
	jsonwebtoken::encode(
		&jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
		&claims,
		&jsonwebtoken::EncodingKey::from_secret(TEST_HMAC_SECRET),
	)
	.unwrap()
}

/// Builds an `IdentityService` with no real JWKS endpoint, relying solely
/// on the embedded static key (so tests run with no network access).
pub async fn identity_service(admin: AdminConfig) -> Arc<IdentityService> {
	let auth = AuthConfig { jwks_cert_url: String::new(), ..AuthConfig::default() };
	let alert = AlertConfig { cert_material: Some(embedded_jwk_json()), ..AlertConfig::default() };
	Arc::new(IdentityService::new(auth, alert, admin).await.unwrap())
}

pub struct TempDir(PathBuf);

impl TempDir {
	pub fn path(&self) -> &Path {
		&self.0
	}

	pub fn write_labels(&self, contents: &str) {
		std::fs::write(self.0.join("labels.yaml"), contents).unwrap();
	}
}

impl Drop for TempDir {
	fn drop(&mut self) {
		let _ = std::fs::remove_dir_all(&self.0);
	}
}

pub fn tempdir() -> TempDir {
	use std::sync::atomic::{AtomicU64, Ordering};
	static COUNTER: AtomicU64 = AtomicU64::new(0);
	let n = COUNTER.fetch_add(1, Ordering::Relaxed);
	let dir = std::env::temp_dir().join(format!("lbac-it-{}-{n}", std::process::id()));
	let _ = std::fs::remove_dir_all(&dir);
	std::fs::create_dir_all(&dir).unwrap();
	TempDir(dir)
}

pub fn labelstore(dir: &TempDir) -> Arc<LabelStore> {
	LabelStore::load(vec![dir.path().to_path_buf()]).unwrap()
}

/// An `Upstream` pointed at a live `MockServer`'s URI.
pub fn upstream_to(uri: &str) -> Arc<Upstream> {
	let config = UpstreamConfig { url: uri.to_string(), ..UpstreamConfig::default() };
	Arc::new(Upstream::new(&config, &ProxyConfig::default()).unwrap())
}

/// An `Upstream` pointed at a closed local port, to exercise the 502 path.
pub fn dead_upstream() -> Arc<Upstream> {
	upstream_to("http://127.0.0.1:1")
}
