//! Shared matcher model and validation/injection logic used by all three
//! rewriters (spec §4.4, "Value handling, common to all rewriters" and
//! "Validation of existing matchers").

use std::collections::HashSet;

use lbac_core::Error;

use crate::policy::{LabelPolicy, LabelRule, Operator};

/// A single `(name, operator, value)` triple, independent of any concrete
/// query language's surface syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
	pub name: String,
	pub op: Operator,
	pub value: String,
}

/// Builds the matcher a policy rule injects into a query. A single value is
/// emitted with the rule's own operator; multiple values are combined as
/// `v1|v2|...` and the operator is promoted to its regex form (`=` -> `=~`,
/// `!=` -> `!~`). `escape` is applied to each value before joining — only
/// TraceQL escapes regex metacharacters (spec §4.4).
pub fn rule_to_matcher(rule: &LabelRule, escape: impl Fn(&str) -> String) -> Matcher {
	if rule.values.len() == 1 {
		return Matcher {
			name: rule.name.clone(),
			op: rule.operator,
			value: escape(&rule.values[0]),
		};
	}
	let value = rule.values.iter().map(|v| escape(v)).collect::<Vec<_>>().join("|");
	Matcher {
		name: rule.name.clone(),
		op: rule.operator.promote_to_regex(),
		value,
	}
}

/// Validates one existing matcher against the policy's allow-list for its
/// label, if the policy constrains that label at all. Negative matchers
/// (`!=`, `!~`) are passed through unchecked — this is an open question
/// (spec §9, §4.4).
pub fn validate_matcher(policy: &LabelPolicy, matcher: &Matcher) -> Result<(), Error> {
	if !policy.rule_names().contains(matcher.name.as_str()) {
		return Ok(());
	}
	if matcher.op.is_negative() {
		return Ok(());
	}

	let allowed = policy.allowed_values(&matcher.name);
	let alternatives: Vec<&str> = match matcher.op {
		Operator::Equal => vec![matcher.value.as_str()],
		Operator::RegexMatch => matcher.value.split('|').collect(),
		_ => unreachable!("negative operators returned above"),
	};

	for alt in alternatives {
		if !allowed.contains(alt) {
			return Err(Error::Unauthorized {
				label: matcher.name.clone(),
				value: alt.to_string(),
			});
		}
	}
	Ok(())
}

/// Policy rules whose label is not already constrained by one of
/// `existing_names` (spec §4.4, "inject matchers for policy rules whose
/// label name is not already constrained").
pub fn missing_rules<'a>(policy: &'a LabelPolicy, existing_names: &HashSet<&str>) -> Vec<&'a LabelRule> {
	policy
		.rules
		.iter()
		.filter(|r| !r.is_cluster_wide() && !existing_names.contains(r.name.as_str()))
		.collect()
}

pub fn no_escape(value: &str) -> String {
	value.to_string()
}

/// Escapes TraceQL regex metacharacters in a single value before it is
/// joined with `|` across a multi-valued rule (spec §4.4, last paragraph).
/// Backslash first, so the escapes we add are not themselves re-escaped.
pub fn escape_traceql_regex(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for c in value.chars() {
		if matches!(c, '.' | '*' | '+' | '?' | '[' | ']' | '(' | ')' | '|' | '^' | '$' | '\\') {
			out.push('\\');
		}
		out.push(c);
	}
	out
}

#[cfg(test)]
mod tests {
	use test_case::test_case;

	use super::*;
	use crate::policy::{LabelPolicy, Logic};

	fn rule(name: &str, op: Operator, values: &[&str]) -> LabelRule {
		LabelRule::new(name.to_string(), op, values.iter().map(|v| v.to_string()).collect()).unwrap()
	}

	#[test]
	fn single_value_keeps_operator() {
		let r = rule("namespace", Operator::Equal, &["prod"]);
		let m = rule_to_matcher(&r, no_escape);
		assert_eq!(m.op, Operator::Equal);
		assert_eq!(m.value, "prod");
	}

	#[test]
	fn multi_value_promotes_operator_and_joins() {
		let r = rule("namespace", Operator::Equal, &["prod", "staging"]);
		let m = rule_to_matcher(&r, no_escape);
		assert_eq!(m.op, Operator::RegexMatch);
		assert_eq!(m.value, "prod|staging");
	}

	#[test]
	fn validate_rejects_unauthorized_equality_value() {
		let policy = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["prod"])], Logic::And, false).unwrap();
		let m = Matcher { name: "namespace".to_string(), op: Operator::Equal, value: "other".to_string() };
		let err = validate_matcher(&policy, &m).unwrap_err();
		assert_eq!(err.to_string(), "unauthorized namespace: other");
	}

	#[test]
	fn validate_checks_every_regex_alternative() {
		let policy = LabelPolicy::new(
			vec![rule("namespace", Operator::Equal, &["prod", "staging"])],
			Logic::And,
			false,
		)
		.unwrap();
		let ok = Matcher { name: "namespace".to_string(), op: Operator::RegexMatch, value: "prod|staging".to_string() };
		assert!(validate_matcher(&policy, &ok).is_ok());
		let bad = Matcher { name: "namespace".to_string(), op: Operator::RegexMatch, value: "prod|dev".to_string() };
		assert!(validate_matcher(&policy, &bad).is_err());
	}

	#[test]
	fn negative_matchers_pass_through_unchecked() {
		let policy = LabelPolicy::new(vec![rule("namespace", Operator::Equal, &["prod"])], Logic::And, false).unwrap();
		let m = Matcher { name: "namespace".to_string(), op: Operator::NotEqual, value: "anything".to_string() };
		assert!(validate_matcher(&policy, &m).is_ok());
	}

	#[test_case(".", r"\.")]
	#[test_case("*", r"\*")]
	#[test_case("+", r"\+")]
	#[test_case("?", r"\?")]
	#[test_case("[", r"\[")]
	#[test_case("]", r"\]")]
	#[test_case("(", r"\(")]
	#[test_case(")", r"\)")]
	#[test_case("|", r"\|")]
	#[test_case("^", r"\^")]
	#[test_case("$", r"\$")]
	#[test_case(r"\", r"\\")]
	#[test_case("prod-east", "prod-east")]
	fn traceql_regex_escape_covers_each_metacharacter(input: &str, expected: &str) {
		assert_eq!(escape_traceql_regex(input), expected);
	}

	#[test]
	fn traceql_regex_escape_handles_mixed_input() {
		assert_eq!(escape_traceql_regex("a.b*c"), "a\\.b\\*c");
		assert_eq!(escape_traceql_regex(r"a\b"), r"a\\b");
	}
}
