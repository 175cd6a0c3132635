//! PromQL rewriter (spec §4.4). Parses with `promql_parser`, walks every
//! vector selector, validates existing matchers against the policy, and
//! injects matchers for policy rules that aren't already present.

use std::collections::HashSet;

use itertools::Itertools;
use lbac_core::Error;
use promql_parser::label::{MatchOp, Matcher as PromMatcher};
use promql_parser::parser::{self, Expr, FunctionArgs, VectorSelector};
use regex::Regex;

use crate::policy::{LabelPolicy, Operator};
use crate::rewrite::common::{self, Matcher};

/// `MatchOp`'s regex variants carry the compiled `Regex`, not just a tag, so
/// this only needs the variant to classify the operator — the compiled
/// pattern itself is irrelevant to validation, which works off `value`.
fn prom_op_to_op(op: &MatchOp) -> Operator {
	match op {
		MatchOp::Equal => Operator::Equal,
		MatchOp::NotEqual => Operator::NotEqual,
		MatchOp::Re(_) => Operator::RegexMatch,
		MatchOp::NotRe(_) => Operator::RegexNoMatch,
	}
}

/// Builds the `promql_parser` matcher for an injected rule, compiling the
/// regex eagerly for `MatchOp`'s `Re`/`NotRe` variants (spec §4.4: regex
/// rule values are already guaranteed to compile at policy-parse time, so
/// this only surfaces a bug in that guarantee, never a user-facing error).
fn build_prom_matcher(injected: &Matcher) -> Result<PromMatcher, Error> {
	let op = match injected.op {
		Operator::Equal => MatchOp::Equal,
		Operator::NotEqual => MatchOp::NotEqual,
		Operator::RegexMatch => MatchOp::Re(compile_regex(&injected.value)?),
		Operator::RegexNoMatch => MatchOp::NotRe(compile_regex(&injected.value)?),
	};
	Ok(PromMatcher { op, name: injected.name.clone(), value: injected.value.clone() })
}

fn compile_regex(pattern: &str) -> Result<Regex, Error> {
	Regex::new(pattern).map_err(|e| Error::RewriteSyntax(format!("invalid regex {pattern:?}: {e}")))
}

fn enforce_selector(vs: &mut VectorSelector, policy: &LabelPolicy) -> Result<(), Error> {
	let existing: HashSet<&str> = vs.matchers.matchers.iter().map(|m| m.name.as_str()).collect();

	for matcher in &vs.matchers.matchers {
		let m = Matcher { name: matcher.name.clone(), op: prom_op_to_op(&matcher.op), value: matcher.value.clone() };
		common::validate_matcher(policy, &m)?;
	}

	for rule in common::missing_rules(policy, &existing) {
		let injected = common::rule_to_matcher(rule, common::no_escape);
		vs.matchers.matchers.push(build_prom_matcher(&injected)?);
	}
	Ok(())
}

fn walk_mut(expr: &mut Expr, policy: &LabelPolicy) -> Result<(), Error> {
	match expr {
		Expr::VectorSelector(vs) => enforce_selector(vs, policy),
		Expr::MatrixSelector(ms) => enforce_selector(&mut ms.vs, policy),
		Expr::Aggregate(a) => {
			walk_mut(&mut a.expr, policy)?;
			if let Some(param) = &mut a.param {
				walk_mut(param, policy)?;
			}
			Ok(())
		},
		Expr::Unary(u) => walk_mut(&mut u.expr, policy),
		Expr::Binary(b) => {
			walk_mut(&mut b.lhs, policy)?;
			walk_mut(&mut b.rhs, policy)
		},
		Expr::Paren(p) => walk_mut(&mut p.expr, policy),
		Expr::Subquery(s) => walk_mut(&mut s.expr, policy),
		Expr::Call(c) => walk_call_args(&mut c.args, policy),
		Expr::NumberLiteral(_) | Expr::StringLiteral(_) | Expr::Extension(_) => Ok(()),
	}
}

fn walk_call_args(args: &mut FunctionArgs, policy: &LabelPolicy) -> Result<(), Error> {
	for arg in args.args.iter_mut() {
		walk_mut(arg, policy)?;
	}
	Ok(())
}

/// Builds the minimal bare selector `{name op "value", ...}` used when the
/// incoming query is empty (spec §4.4, "Empty-query law").
fn synthesize(policy: &LabelPolicy) -> String {
	let body = policy
		.rules
		.iter()
		.filter(|r| !r.is_cluster_wide())
		.map(|r| {
			let m = common::rule_to_matcher(r, common::no_escape);
			format!("{}{}\"{}\"", m.name, m.op.as_str(), m.value)
		})
		.join(", ");
	format!("{{{body}}}")
}

pub fn enforce(query: &str, policy: &LabelPolicy) -> Result<String, Error> {
	if policy.is_cluster_wide() {
		return Ok(query.to_string());
	}
	if query.trim().is_empty() {
		let synthesized = synthesize(policy);
		// Round-trip the synthesized form through the real parser so a
		// malformed policy (e.g. an unescaped label name) surfaces here
		// rather than at the upstream.
		parser::parse(&synthesized).map_err(Error::RewriteSyntax)?;
		return Ok(synthesized);
	}

	let mut expr = parser::parse(query).map_err(Error::RewriteSyntax)?;
	walk_mut(&mut expr, policy)?;
	let rewritten = expr.to_string();
	parser::parse(&rewritten).map_err(Error::RewriteSyntax)?;
	Ok(rewritten)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::{LabelPolicy, LabelRule, Logic};

	fn rule(name: &str, op: Operator, values: &[&str]) -> LabelRule {
		LabelRule::new(name.to_string(), op, values.iter().map(|v| v.to_string()).collect()).unwrap()
	}

	#[test]
	fn s1_single_label_inject() {
		let policy =
			LabelPolicy::new(vec![rule("namespace", Operator::RegexMatch, &["prod", "staging"])], Logic::And, false)
				.unwrap();
		let out = enforce("rate(http_requests_total[5m])", &policy).unwrap();
		assert!(out.contains("namespace=~\"prod|staging\""));
		assert!(parser::parse(&out).is_ok());
	}

	#[test]
	fn s2_multi_label_inject() {
		let policy = LabelPolicy::new(
			vec![rule("namespace", Operator::Equal, &["prod"]), rule("team", Operator::RegexMatch, &["backend.*"])],
			Logic::And,
			false,
		)
		.unwrap();
		let out = enforce("up", &policy).unwrap();
		assert!(out.contains("namespace=\"prod\""));
		assert!(out.contains("team=~\"backend.*\""));
	}

	#[test]
	fn s3_rejection() {
		let policy = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["prod"])], Logic::And, false).unwrap();
		let err = enforce(r#"up{namespace="other"}"#, &policy).unwrap_err();
		assert_eq!(err.to_string(), "unauthorized namespace: other");
	}

	#[test]
	fn s6_cluster_wide_is_unchanged() {
		let policy = LabelPolicy::cluster_wide();
		let out = enforce(r#"up{job="app"}"#, &policy).unwrap();
		assert_eq!(out, r#"up{job="app"}"#);
	}

	#[test]
	fn idempotent_on_already_rewritten_query() {
		let policy = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["prod"])], Logic::And, false).unwrap();
		let once = enforce("up", &policy).unwrap();
		let twice = enforce(&once, &policy).unwrap();
		assert_eq!(once, twice);
	}
}
