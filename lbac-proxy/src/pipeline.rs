//! Request pipeline (spec §4.5): authenticate, resolve the caller's policy
//! (short-circuiting for admin bypass), rewrite the query parameter for the
//! route's language — wherever it lives, the URL query string or a
//! form-encoded POST body — then hand off to the matching upstream.

use axum::body::Body;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use lbac_core::Error;
use url::form_urlencoded;

use crate::policy::LabelPolicy;
use crate::proxy::{self, Upstream};
use crate::rewrite::{self, QueryLanguage};
use crate::state::AppState;

/// Where in the request a route's query text lives and which rewriter
/// applies to it — the only two things that differ between the Thanos,
/// Loki, and Tempo routes (spec §4.7, route table). An empty
/// `query_param` means the route carries no rewritable query at all
/// (`/api/v1/status/buildinfo`, `/api/traces/{traceID}`, ...) — the
/// rewriter is skipped and the request is forwarded as-is once
/// authenticated.
#[derive(Clone, Copy)]
pub struct RouteSpec {
	pub lang: QueryLanguage,
	pub query_param: &'static str,
}

impl RouteSpec {
	pub const fn new(lang: QueryLanguage, query_param: &'static str) -> Self {
		Self { lang, query_param }
	}

	pub const fn unrewritten(lang: QueryLanguage) -> Self {
		Self { lang, query_param: "" }
	}
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Runs the full pipeline for one proxied request and turns any failure
/// into the wire response the caller sees (spec §7: every `Error` carries
/// its own status code).
pub async fn handle(
	state: &AppState,
	upstream: &Upstream,
	spec: RouteSpec,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Body,
) -> Response {
	match run(state, upstream, spec, method, uri, headers, body).await {
		Ok(resp) => resp,
		Err(e) => {
			tracing::warn!(error = %e, "request rejected");
			proxy::error_response(&e)
		},
	}
}

async fn run(
	state: &AppState,
	upstream: &Upstream,
	spec: RouteSpec,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Body,
) -> Result<Response, Error> {
	let token = state.identity.authenticate(&headers).await?;
	let identity = token.identity();

	let admin_bypass = state.identity.admin_bypass_enabled() && identity.is_admin(state.identity.admin_group());

	let (path_and_query, body) = if admin_bypass {
		tracing::debug!(username = %identity.username, "admin bypass, query not rewritten");
		let pq = uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();
		(pq, body)
	} else {
		// Every authenticated, non-admin caller must resolve to a known
		// policy even on routes with nothing to rewrite — an unknown
		// identity is rejected everywhere, not just on query endpoints.
		let policy = state.labels.resolve(&identity).await.map_err(|e| Error::PolicyLookup(e.to_string()))?;
		if spec.query_param.is_empty() || policy.is_cluster_wide() {
			let pq = uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();
			(pq, body)
		} else {
			rewrite_request(spec, &uri, &headers, body, &policy).await?
		}
	};

	upstream.forward(method, &path_and_query, headers, body, Some((&token.username, &token.email))).await
}

/// Rewrites the route's query parameter in place, wherever it lives, and
/// returns the (possibly unchanged) path+query plus the (possibly
/// replaced) request body.
async fn rewrite_request(
	spec: RouteSpec,
	uri: &Uri,
	headers: &HeaderMap,
	body: Body,
	policy: &LabelPolicy,
) -> Result<(String, Body), Error> {
	if is_form_encoded(headers) {
		let bytes = axum::body::to_bytes(body, usize::MAX)
			.await
			.map_err(|e| Error::Upstream(anyhow::anyhow!("failed to read request body: {e}")))?;
		let rewritten = rewrite_form_body(&bytes, spec, policy)?;
		let pq = uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();
		return Ok((pq, Body::from(rewritten)));
	}

	let path = uri.path().to_string();
	let query = uri.query().unwrap_or("");
	let rewritten_query = rewrite_query_string(query, spec, policy)?;
	let path_and_query = if rewritten_query.is_empty() { path } else { format!("{path}?{rewritten_query}") };
	Ok((path_and_query, body))
}

fn is_form_encoded(headers: &HeaderMap) -> bool {
	headers
		.get(http::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.starts_with(FORM_CONTENT_TYPE))
		.unwrap_or(false)
}

fn rewrite_query_string(query: &str, spec: RouteSpec, policy: &LabelPolicy) -> Result<String, Error> {
	let mut found = false;
	let mut serializer = form_urlencoded::Serializer::new(String::new());
	for (key, value) in form_urlencoded::parse(query.as_bytes()) {
		if key == spec.query_param {
			found = true;
			let rewritten = rewrite::enforce(spec.lang, &value, policy)?;
			serializer.append_pair(&key, &rewritten);
		} else {
			serializer.append_pair(&key, &value);
		}
	}
	if !found {
		let rewritten = rewrite::enforce(spec.lang, "", policy)?;
		serializer.append_pair(spec.query_param, &rewritten);
	}
	Ok(serializer.finish())
}

fn rewrite_form_body(bytes: &[u8], spec: RouteSpec, policy: &LabelPolicy) -> Result<Vec<u8>, Error> {
	let body_str = std::str::from_utf8(bytes)
		.map_err(|e| Error::RewriteSyntax(format!("request body is not valid utf-8: {e}")))?;
	let rewritten = rewrite_query_string(body_str, spec, policy)?;
	Ok(rewritten.into_bytes())
}
