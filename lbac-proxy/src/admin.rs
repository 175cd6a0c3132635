//! Admin/debug listener (SPEC_FULL §4.10; spec §6 "HTTP surface"): health,
//! Prometheus metrics, and a debug endpoint dumping one `labels.yaml` entry
//! as parsed — grounded on the teacher's `admin::App` (an `Arc`-backed
//! state struct exposing a `Router` via `.router()`).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;

use crate::state::AppState;

#[derive(Clone)]
pub struct AdminState {
	app: AppState,
	registry: std::sync::Arc<Registry>,
}

impl AdminState {
	pub fn new(app: AppState, registry: std::sync::Arc<Registry>) -> Self {
		Self { app, registry }
	}

	pub fn router(self) -> Router {
		Router::new()
			.route("/healthz", get(healthz))
			.route("/metrics", get(metrics))
			.route("/debug/policy/{entry}", get(debug_policy))
			.with_state(self)
	}
}

async fn healthz() -> &'static str {
	"Ok"
}

async fn metrics(State(state): State<AdminState>) -> Response {
	let mut buf = String::new();
	match encode(&mut buf, &state.registry) {
		Ok(()) => (StatusCode::OK, buf).into_response(),
		Err(e) => {
			tracing::error!(error = %e, "failed to encode metrics");
			(StatusCode::INTERNAL_SERVER_ERROR, "Not Ok").into_response()
		},
	}
}

/// Dumps the raw (unmerged) policy for one `labels.yaml` entry, for
/// operators diagnosing why a user's queries are rewritten the way they
/// are. Not authenticated with the caller's own bearer token — this
/// listener binds to a separate, operator-only address (spec §6).
async fn debug_policy(State(state): State<AdminState>, Path(entry): Path<String>) -> Response {
	match state.app.labels.entry(&entry).await {
		Some(policy) => match serde_json::to_string(&DebugPolicy::from(&policy)) {
			Ok(json) => (StatusCode::OK, json).into_response(),
			Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
		},
		None => (StatusCode::NOT_FOUND, format!("no labels.yaml entry named {entry:?}")).into_response(),
	}
}

#[derive(serde::Serialize)]
struct DebugRule {
	name: String,
	operator: &'static str,
	values: Vec<String>,
}

#[derive(serde::Serialize)]
struct DebugPolicy {
	rules: Vec<DebugRule>,
	logic: &'static str,
	r#override: bool,
}

impl From<&crate::policy::LabelPolicy> for DebugPolicy {
	fn from(policy: &crate::policy::LabelPolicy) -> Self {
		Self {
			rules: policy
				.rules
				.iter()
				.map(|r| DebugRule { name: r.name.clone(), operator: r.operator.as_str(), values: r.values.clone() })
				.collect(),
			logic: match policy.logic {
				crate::policy::Logic::And => "and",
				crate::policy::Logic::Or => "or",
			},
			r#override: policy.override_,
		}
	}
}
