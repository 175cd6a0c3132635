use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::StartupError;

/// Per-upstream transport tuning (spec §3, `ProxyConfig`). Every field is
/// optional on the wire; the effective value is resolved as
/// upstream-specific -> global -> built-in, first non-zero wins
/// (`ProxyConfig::resolve`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
	#[serde(with = "crate::serdes::serde_dur_option", default)]
	pub request_timeout: Option<Duration>,
	#[serde(with = "crate::serdes::serde_dur_option", default)]
	pub idle_conn_timeout: Option<Duration>,
	#[serde(with = "crate::serdes::serde_dur_option", default)]
	pub tls_handshake_timeout: Option<Duration>,
	pub max_idle_conns: Option<usize>,
	pub max_idle_conns_per_host: Option<usize>,
	pub force_http2: Option<bool>,
}

/// The fully resolved, built-in-backed settings a transport is actually
/// built with.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedProxyConfig {
	pub request_timeout: Duration,
	pub idle_conn_timeout: Duration,
	pub tls_handshake_timeout: Duration,
	pub max_idle_conns: usize,
	pub max_idle_conns_per_host: usize,
	pub force_http2: bool,
}

impl ResolvedProxyConfig {
	pub const BUILT_IN: ResolvedProxyConfig = ResolvedProxyConfig {
		request_timeout: Duration::from_secs(60),
		idle_conn_timeout: Duration::from_secs(90),
		tls_handshake_timeout: Duration::from_secs(10),
		max_idle_conns: 500,
		max_idle_conns_per_host: 100,
		force_http2: true,
	};
}

impl ProxyConfig {
	/// Resolves `self` (upstream-specific) against `global` and the
	/// built-in defaults, first non-zero value wins per field.
	pub fn resolve(&self, global: &ProxyConfig) -> ResolvedProxyConfig {
		let built_in = ResolvedProxyConfig::BUILT_IN;
		ResolvedProxyConfig {
			request_timeout: self
				.request_timeout
				.or(global.request_timeout)
				.unwrap_or(built_in.request_timeout),
			idle_conn_timeout: self
				.idle_conn_timeout
				.or(global.idle_conn_timeout)
				.unwrap_or(built_in.idle_conn_timeout),
			tls_handshake_timeout: self
				.tls_handshake_timeout
				.or(global.tls_handshake_timeout)
				.unwrap_or(built_in.tls_handshake_timeout),
			max_idle_conns: self
				.max_idle_conns
				.or(global.max_idle_conns)
				.filter(|v| *v != 0)
				.unwrap_or(built_in.max_idle_conns),
			max_idle_conns_per_host: self
				.max_idle_conns_per_host
				.or(global.max_idle_conns_per_host)
				.filter(|v| *v != 0)
				.unwrap_or(built_in.max_idle_conns_per_host),
			force_http2: self.force_http2.or(global.force_http2).unwrap_or(built_in.force_http2),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
	pub jwks_cert_url: String,
	pub auth_header: String,
	pub auth_scheme: String,
	pub claims: ClaimNames,
}

impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			jwks_cert_url: String::new(),
			auth_header: "Authorization".to_string(),
			auth_scheme: "Bearer".to_string(),
			claims: ClaimNames::default(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimNames {
	pub username: String,
	pub email: String,
	pub groups: String,
}

impl Default for ClaimNames {
	fn default() -> Self {
		Self {
			username: "preferred_username".to_string(),
			email: "email".to_string(),
			groups: "groups".to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
	pub bypass: bool,
	pub group: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
	pub enabled: bool,
	pub token_header: String,
	pub cert_url: Option<String>,
	pub cert_material: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
	pub url: String,
	pub tenant_label: Option<String>,
	pub actor_header: Option<String>,
	pub headers: HashMap<String, String>,
	pub proxy: ProxyConfig,
	pub mtls: Option<MtlsConfig>,
}

/// Optional per-upstream mTLS material (spec §6, "optional mTLS material"):
/// file paths to an already-resolved client cert/key pair and an optional
/// CA bundle. Loading stops at validating these parse as PEM (§1, "TLS
/// material loading... not implemented beyond rustls-pemfile loading") —
/// wiring the parsed material into the transport is out of scope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MtlsConfig {
	pub cert: Option<PathBuf>,
	pub key: Option<PathBuf>,
	pub ca: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelStoreConfig {
	pub config_paths: Vec<String>,
}

impl Default for LabelStoreConfig {
	fn default() -> Self {
		Self {
			config_paths: vec!["/etc/config/labels/".to_string(), "./configs".to_string()],
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub proxy_addr: SocketAddr,
	pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			proxy_addr: "0.0.0.0:8080".parse().unwrap(),
			admin_addr: "0.0.0.0:8081".parse().unwrap(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
	pub auth: AuthConfig,
	pub admin: AdminConfig,
	pub alert: AlertConfig,
	pub proxy: ProxyConfig,
	pub loki: UpstreamConfig,
	pub thanos: UpstreamConfig,
	pub tempo: UpstreamConfig,
	pub labelstore: LabelStoreConfig,
	pub server: ServerConfig,
	pub log_level: i32,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			auth: AuthConfig::default(),
			admin: AdminConfig::default(),
			alert: AlertConfig::default(),
			proxy: ProxyConfig::default(),
			loki: UpstreamConfig::default(),
			thanos: UpstreamConfig::default(),
			tempo: UpstreamConfig::default(),
			labelstore: LabelStoreConfig::default(),
			server: ServerConfig::default(),
			log_level: 0,
		}
	}
}

impl AppConfig {
	pub fn load(path: &std::path::Path) -> Result<Self, StartupError> {
		let file = std::fs::File::open(path).map_err(|source| StartupError::ConfigRead {
			path: path.display().to_string(),
			source,
		})?;
		let cfg: AppConfig =
			serde_yaml::from_reader(file).map_err(|source| StartupError::ConfigParse {
				path: path.display().to_string(),
				source,
			})?;
		cfg.validate()?;
		Ok(cfg)
	}

	fn validate(&self) -> Result<(), StartupError> {
		for (name, upstream) in [
			("loki", &self.loki),
			("thanos", &self.thanos),
			("tempo", &self.tempo),
		] {
			if upstream.url.is_empty() {
				continue;
			}
			url::Url::parse(&upstream.url)
				.map_err(|e| StartupError::ConfigInvalid(format!("{name}.url: {e}")))?;
		}
		Ok(())
	}

	/// Full search-path list for the label store, normalized to `PathBuf`.
	pub fn label_search_paths(&self) -> Vec<PathBuf> {
		self.labelstore.config_paths.iter().map(PathBuf::from).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolve_prefers_upstream_over_global_over_built_in() {
		let upstream = ProxyConfig { max_idle_conns_per_host: Some(7), ..ProxyConfig::default() };
		let global = ProxyConfig {
			max_idle_conns_per_host: Some(42),
			request_timeout: Some(Duration::from_secs(5)),
			..ProxyConfig::default()
		};
		let resolved = upstream.resolve(&global);
		// Set on both: the upstream-specific value wins.
		assert_eq!(resolved.max_idle_conns_per_host, 7);
		// Set only on global: global wins over the built-in default.
		assert_eq!(resolved.request_timeout, Duration::from_secs(5));
		// Set on neither: the built-in default is used.
		assert_eq!(resolved.idle_conn_timeout, ResolvedProxyConfig::BUILT_IN.idle_conn_timeout);
	}

	#[test]
	fn resolve_treats_zero_pool_sizes_as_unset() {
		let upstream = ProxyConfig { max_idle_conns: Some(0), ..ProxyConfig::default() };
		let resolved = upstream.resolve(&ProxyConfig::default());
		assert_eq!(resolved.max_idle_conns, ResolvedProxyConfig::BUILT_IN.max_idle_conns);
	}
}
