//! LogQL rewriter (spec §4.4). No mainstream LogQL AST crate exists, so this
//! scans the query text for the stream-selector span — the leading
//! `{...}` that every LogQL query opens with — and rewrites only its
//! matcher list, leaving everything after it (line filters, parsers, metric
//! aggregations) untouched.

use itertools::Itertools;
use lbac_core::Error;

use crate::policy::{LabelPolicy, Operator};
use crate::rewrite::common::{self, Matcher};
use crate::rewrite::scan;

fn op_from_str(raw: &str) -> Option<Operator> {
	match raw {
		"=" => Some(Operator::Equal),
		"!=" => Some(Operator::NotEqual),
		"=~" => Some(Operator::RegexMatch),
		"!~" => Some(Operator::RegexNoMatch),
		_ => None,
	}
}

fn parse_selector_body(body: &str) -> Result<Vec<Matcher>, Error> {
	let mut matchers = Vec::new();
	for part in scan::split_top_level(body, ',') {
		let part = part.trim();
		if part.is_empty() {
			continue;
		}
		let (name, op, value) = scan::split_matcher(part)
			.ok_or_else(|| Error::RewriteSyntax(format!("malformed LogQL selector entry: {part:?}")))?;
		let op = op_from_str(op).ok_or_else(|| Error::RewriteSyntax(format!("unknown LogQL operator: {op:?}")))?;
		matchers.push(Matcher { name: name.to_string(), op, value: value.to_string() });
	}
	Ok(matchers)
}

fn render_selector(matchers: &[Matcher]) -> String {
	let body = matchers.iter().map(|m| format!("{}{}\"{}\"", m.name, m.op.as_str(), m.value)).join(", ");
	format!("{{{body}}}")
}

fn synthesize(policy: &LabelPolicy) -> String {
	let matchers: Vec<Matcher> = policy
		.rules
		.iter()
		.filter(|r| !r.is_cluster_wide())
		.map(|r| common::rule_to_matcher(r, common::no_escape))
		.collect();
	render_selector(&matchers)
}

pub fn enforce(query: &str, policy: &LabelPolicy) -> Result<String, Error> {
	if policy.is_cluster_wide() {
		return Ok(query.to_string());
	}
	if query.trim().is_empty() {
		return Ok(synthesize(policy));
	}

	let (start, end) = scan::find_selector_span(query)
		.ok_or_else(|| Error::RewriteSyntax("LogQL query has no stream selector".to_string()))?;
	let body = &query[start + 1..end - 1];

	let mut matchers = parse_selector_body(body)?;
	let existing: std::collections::HashSet<&str> = matchers.iter().map(|m| m.name.as_str()).collect();
	for matcher in &matchers {
		common::validate_matcher(policy, matcher)?;
	}
	for rule in common::missing_rules(policy, &existing) {
		matchers.push(common::rule_to_matcher(rule, common::no_escape));
	}

	let mut out = String::with_capacity(query.len());
	out.push_str(&query[..start]);
	out.push_str(&render_selector(&matchers));
	out.push_str(&query[end..]);
	Ok(out)
}
