//! Cross-rewriter invariants (spec §8): the same merged, multi-group
//! policy is fed through all three rewriters and checked against the
//! universal properties, not just each language's own unit tests.

use lbac_proxy::policy::{self, LabelPolicy, LabelRule, Logic, Operator};
use lbac_proxy::rewrite::{self, QueryLanguage};

fn rule(name: &str, op: Operator, values: &[&str]) -> LabelRule {
	LabelRule::new(name.to_string(), op, values.iter().map(|v| v.to_string()).collect()).unwrap()
}

/// Two group memberships (S7-style consolidation): one grants `prod`, the
/// other grants `staging`, both on the `namespace` label. Merging them must
/// widen access to the union, never narrow it to either alone.
fn multi_group_policy() -> LabelPolicy {
	let team_a = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["prod"])], Logic::And, false).unwrap();
	let team_b = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["staging"])], Logic::And, false).unwrap();
	policy::merge(&[team_a, team_b])
}

#[test]
fn merge_consolidation_widens_to_the_union_across_groups() {
	let merged = multi_group_policy();
	assert_eq!(merged.logic, Logic::Or);
	let values = merged.allowed_values("namespace");
	assert!(values.contains("prod"));
	assert!(values.contains("staging"));
}

#[test]
fn promql_rewrite_of_an_empty_query_contains_every_merged_value() {
	let merged = multi_group_policy();
	let rewritten = rewrite::enforce(QueryLanguage::PromQl, "", &merged).unwrap();
	assert!(rewritten.contains("prod"));
	assert!(rewritten.contains("staging"));
}

#[test]
fn logql_rewrite_of_an_empty_query_contains_every_merged_value() {
	let merged = multi_group_policy();
	let rewritten = rewrite::enforce(QueryLanguage::LogQl, "", &merged).unwrap();
	assert!(rewritten.contains("prod"));
	assert!(rewritten.contains("staging"));
}

#[test]
fn traceql_rewrite_of_an_empty_query_contains_every_merged_value() {
	let merged = multi_group_policy();
	let rewritten = rewrite::enforce(QueryLanguage::TraceQl, "", &merged).unwrap();
	assert!(rewritten.contains("prod"));
	assert!(rewritten.contains("staging"));
}

#[test]
fn cluster_wide_is_an_identity_function_for_every_language() {
	let cluster_wide = LabelPolicy::cluster_wide();
	for (lang, query) in [
		(QueryLanguage::PromQl, r#"sum(rate(http_requests_total[5m]))"#),
		(QueryLanguage::LogQl, r#"{job="app"} |= "error""#),
		(QueryLanguage::TraceQl, r#"{span.http.status_code = 500}"#),
	] {
		assert_eq!(rewrite::enforce(lang, query, &cluster_wide).unwrap(), query);
	}
}

#[test]
fn promql_and_logql_reject_a_value_outside_the_merged_allow_list() {
	let merged = multi_group_policy();
	assert!(rewrite::enforce(QueryLanguage::PromQl, r#"up{namespace="dev"}"#, &merged).is_err());
	assert!(rewrite::enforce(QueryLanguage::LogQl, r#"{namespace="dev"}"#, &merged).is_err());
}

#[test]
fn traceql_never_rejects_an_existing_filter_it_only_narrows_with_and() {
	// Unlike PromQL/LogQL, TraceQL has no rejection path (spec §9): it
	// conjoins unconditionally, so a value outside the allow-list is simply
	// never true at evaluation time, not a rewrite-time error.
	let merged = multi_group_policy();
	let rewritten = rewrite::enforce(QueryLanguage::TraceQl, r#"{resource.namespace="dev"}"#, &merged).unwrap();
	assert!(rewritten.contains("&&"));
	assert!(rewritten.contains(r#"resource.namespace="dev""#));
}

#[test]
fn override_candidate_discards_earlier_groups_before_rewriting() {
	let base = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["prod"])], Logic::And, false).unwrap();
	let mut admin_like = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["internal"])], Logic::And, false).unwrap();
	admin_like.override_ = true;
	let merged = policy::merge(&[base, admin_like]);
	let rewritten = rewrite::enforce(QueryLanguage::PromQl, "", &merged).unwrap();
	assert!(rewritten.contains("internal"));
	assert!(!rewritten.contains("prod"));
}
