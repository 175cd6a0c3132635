//! TraceQL rewriter (spec §4.4, §9 "Cyclic / nested structure"). TraceQL has
//! no mainstream Rust parser crate, and unlike PromQL/LogQL this rewriter
//! does not validate the query's existing filters against the policy at
//! all — spec §9 describes the injection as purely textual: if every policy
//! attribute is already present in the body, return as-is (spec §4.4 step
//! 4); otherwise wrap the existing span-filter body and the policy's
//! filter each in parens and join them with `&&`, so the result can only
//! narrow the caller's original query, never widen it, regardless of what
//! the caller already wrote. The policy's own internal predicates join
//! with `&&`/`||` per the policy's AND/OR logic (spec §4.4 step 4). There
//! is deliberately no TraceQL counterpart to PromQL/LogQL's rejection
//! scenario (spec §8 S3/S4) for this reason.

use itertools::Itertools;
use lbac_core::Error;

use crate::policy::{LabelPolicy, Logic};
use crate::rewrite::common;
use crate::rewrite::scan;

/// Renders each policy rule's predicate independently, e.g.
/// `resource.namespace="prod"`, `resource.team="backend"` — used both to
/// assemble the joined filter and to check whether a predicate is already
/// present in the query body (spec §4.4 step 4).
fn policy_predicates(policy: &LabelPolicy) -> Vec<String> {
	policy
		.rules
		.iter()
		.filter(|r| !r.is_cluster_wide())
		.map(|r| {
			let m = common::rule_to_matcher(r, common::escape_traceql_regex);
			format!("{}{}\"{}\"", m.name, m.op.as_str(), m.value)
		})
		.collect()
}

/// Joins the policy's predicates with `&&` for AND policies and `||` for
/// OR policies (spec §4.4 step 4).
fn policy_filter(predicates: &[String], policy: &LabelPolicy) -> String {
	let joiner = match policy.logic {
		Logic::And => " && ",
		Logic::Or => " || ",
	};
	predicates.iter().join(joiner)
}

/// Implements spec §4.4/§9's textual rewrite: (1) locate the span-filter
/// expression, (2) if every policy attribute is already present in the
/// body, return as-is (spec §4.4 step 4 — keeps re-enforcement from
/// nesting forever), (3) otherwise parenthesize the policy's filter
/// alongside the existing body and join with `&&` — defending against the
/// body's own top-level `||` changing associativity (spec §9, Open
/// Questions) — and (4) re-assemble.
pub fn enforce(query: &str, policy: &LabelPolicy) -> Result<String, Error> {
	if policy.is_cluster_wide() {
		return Ok(query.to_string());
	}
	let predicates = policy_predicates(policy);
	let filter = policy_filter(&predicates, policy);

	if query.trim().is_empty() {
		return Ok(format!("{{{filter}}}"));
	}

	let (start, end) = scan::find_selector_span(query)
		.ok_or_else(|| Error::RewriteSyntax("TraceQL query has no span filter".to_string()))?;
	let body = query[start + 1..end - 1].trim();

	if !body.is_empty() && predicates.iter().all(|p| body.contains(p.as_str())) {
		return Ok(query.to_string());
	}

	let new_body = if body.is_empty() { filter } else { format!("({filter}) && ({body})") };

	let mut out = String::with_capacity(query.len() + new_body.len());
	out.push_str(&query[..start]);
	out.push('{');
	out.push_str(&new_body);
	out.push('}');
	out.push_str(&query[end..]);
	Ok(out)
}
