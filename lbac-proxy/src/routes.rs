//! Route table (spec §4.7, §6 "Upstream routes"): maps each upstream path
//! template to its query-parameter name and rewriter, mirroring the
//! teacher's `admin::App::router` (one `Router` built from `.route(...)`
//! calls, `with_state`-bound to a cloneable app struct).

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::routing::any;

use crate::pipeline::{self, RouteSpec};
use crate::rewrite::QueryLanguage;
use crate::state::AppState;

macro_rules! route_handler {
	($name:ident, $upstream:ident, $spec:expr) => {
		async fn $name(
			State(state): State<AppState>,
			method: Method,
			uri: Uri,
			headers: HeaderMap,
			body: Body,
		) -> Response {
			pipeline::handle(&state, &state.$upstream, $spec, method, uri, headers, body).await
		}
	};
}

// --- PromQL (Thanos/Prometheus), spec §6 ---
route_handler!(thanos_query, thanos, RouteSpec::new(QueryLanguage::PromQl, "query"));
route_handler!(thanos_query_range, thanos, RouteSpec::new(QueryLanguage::PromQl, "query"));
route_handler!(thanos_series, thanos, RouteSpec::new(QueryLanguage::PromQl, "match[]"));
route_handler!(thanos_labels, thanos, RouteSpec::new(QueryLanguage::PromQl, "match[]"));
route_handler!(thanos_label_values, thanos, RouteSpec::new(QueryLanguage::PromQl, "match[]"));
route_handler!(thanos_query_exemplars, thanos, RouteSpec::new(QueryLanguage::PromQl, "query"));
route_handler!(thanos_format_query, thanos, RouteSpec::new(QueryLanguage::PromQl, "query"));
route_handler!(thanos_metadata, thanos, RouteSpec::new(QueryLanguage::PromQl, "query"));
route_handler!(thanos_buildinfo, thanos, RouteSpec::unrewritten(QueryLanguage::PromQl));

// --- LogQL (Loki), under /loki, spec §6 ---
route_handler!(loki_query, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_query_range, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_labels, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_label_values, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_series, loki, RouteSpec::new(QueryLanguage::LogQl, "match[]"));
route_handler!(loki_index_stats, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_index_volume, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_index_volume_range, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_patterns, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_tail, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_format_query, loki, RouteSpec::new(QueryLanguage::LogQl, "query"));
route_handler!(loki_buildinfo, loki, RouteSpec::unrewritten(QueryLanguage::LogQl));

// --- TraceQL (Tempo), spec §6 ---
route_handler!(tempo_echo, tempo, RouteSpec::unrewritten(QueryLanguage::TraceQl));
route_handler!(tempo_search, tempo, RouteSpec::new(QueryLanguage::TraceQl, "q"));
route_handler!(tempo_search_tags, tempo, RouteSpec::new(QueryLanguage::TraceQl, "scope"));
route_handler!(tempo_search_tag_values, tempo, RouteSpec::new(QueryLanguage::TraceQl, "q"));
route_handler!(tempo_metrics_query, tempo, RouteSpec::new(QueryLanguage::TraceQl, "q"));
route_handler!(tempo_trace_by_id, tempo, RouteSpec::unrewritten(QueryLanguage::TraceQl));

pub fn router() -> Router<AppState> {
	Router::new()
		.route("/api/v1/query", any(thanos_query))
		.route("/api/v1/query_range", any(thanos_query_range))
		.route("/api/v1/series", any(thanos_series))
		.route("/api/v1/labels", any(thanos_labels))
		.route("/api/v1/label/{label}/values", any(thanos_label_values))
		.route("/api/v1/query_exemplars", any(thanos_query_exemplars))
		.route("/api/v1/format_query", any(thanos_format_query))
		.route("/api/v1/metadata", any(thanos_metadata))
		.route("/api/v1/status/buildinfo", any(thanos_buildinfo))
		.route("/loki/api/v1/query", any(loki_query))
		.route("/loki/api/v1/query_range", any(loki_query_range))
		.route("/loki/api/v1/labels", any(loki_labels))
		.route("/loki/api/v1/label/{label}/values", any(loki_label_values))
		.route("/loki/api/v1/series", any(loki_series))
		.route("/loki/api/v1/index/stats", any(loki_index_stats))
		.route("/loki/api/v1/index/volume", any(loki_index_volume))
		.route("/loki/api/v1/index/volume_range", any(loki_index_volume_range))
		.route("/loki/api/v1/patterns", any(loki_patterns))
		.route("/loki/api/v1/tail", any(loki_tail))
		.route("/loki/api/v1/format_query", any(loki_format_query))
		.route("/loki/api/v1/status/buildinfo", any(loki_buildinfo))
		.route("/api/echo", any(tempo_echo))
		.route("/api/search", any(tempo_search))
		.route("/api/v2/search", any(tempo_search))
		.route("/api/search/tags", any(tempo_search_tags))
		.route("/api/v2/search/tags", any(tempo_search_tags))
		.route("/api/search/tag/{tag}/values", any(tempo_search_tag_values))
		.route("/api/v2/search/tag/{tag}/values", any(tempo_search_tag_values))
		.route("/api/metrics/query_range", any(tempo_metrics_query))
		.route("/api/metrics/query", any(tempo_metrics_query))
		.route("/api/traces/{traceID}", any(tempo_trace_by_id))
		.route("/api/v2/traces/{traceID}", any(tempo_trace_by_id))
}
