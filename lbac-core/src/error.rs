use http::StatusCode;

/// A request-scoped failure. Every fallible outcome that can be attributed to
/// a single incoming request funnels through this type so the pipeline can
/// turn it into a response without re-deriving the status code at each call
/// site (see spec §7, "Error handling design").
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("no {header} header")]
	MissingAuthHeader { header: String },

	#[error("invalid {header} header")]
	InvalidAuthHeader { header: String },

	#[error("error parsing token")]
	TokenParse(#[source] jsonwebtoken::errors::Error),

	#[error("invalid token")]
	TokenInvalid(#[source] jsonwebtoken::errors::Error),

	#[error("error getting label policy: {0}")]
	PolicyLookup(String),

	#[error("unauthorized {label}: {value}")]
	Unauthorized { label: String, value: String },

	#[error("{0}")]
	RewriteSyntax(String),

	#[error("upstream error: {0}")]
	Upstream(#[source] anyhow::Error),
}

impl Error {
	/// Maps this error to the wire status code the pipeline must emit.
	/// AuthnFailed / AuthzMissing / RewriteRejected all collapse to 403;
	/// upstream transport failures are 502. Nothing in this enum is ever
	/// retried (spec §7).
	pub fn status_code(&self) -> StatusCode {
		match self {
			Error::MissingAuthHeader { .. }
			| Error::InvalidAuthHeader { .. }
			| Error::TokenParse(_)
			| Error::TokenInvalid(_)
			| Error::PolicyLookup(_)
			| Error::Unauthorized { .. }
			| Error::RewriteSyntax(_) => StatusCode::FORBIDDEN,
			Error::Upstream(_) => StatusCode::BAD_GATEWAY,
		}
	}
}

/// Errors that can only occur during process startup: bad config, a bad
/// label file (including detection of the deprecated "simple" format), an
/// unreachable JWKS endpoint, or failure to load TLS material. All of these
/// are fatal: the process logs a diagnostic to stderr and exits non-zero
/// before either listener binds (spec §6, "Exit codes").
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
	#[error("failed to read config file {path}: {source}")]
	ConfigRead {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	ConfigParse {
		path: String,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("invalid config: {0}")]
	ConfigInvalid(String),

	#[error("deprecated label format for entry {entry:?}: expected a `_rules` list (optionally with `_logic`/`_override`); got a bare mapping instead")]
	DeprecatedLabelFormat { entry: String },

	#[error("invalid label policy for entry {entry:?}, rule {rule_index}: {reason}")]
	InvalidLabelRule {
		entry: String,
		rule_index: usize,
		reason: String,
	},

	#[error("no labels.yaml found in any of the configured search paths: {0:?}")]
	LabelFileNotFound(Vec<String>),

	#[error("failed to reach JWKS endpoint {url}: {source}")]
	JwksUnreachable {
		url: String,
		#[source]
		source: anyhow::Error,
	},

	#[error("failed to load TLS material: {0}")]
	TlsMaterial(String),
}
