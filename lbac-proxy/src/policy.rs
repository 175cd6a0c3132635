//! In-memory policy model (spec §3, §4.1): `LabelRule`, `LabelPolicy`, and
//! the merge/consolidation logic used when a caller belongs to more than one
//! group (spec §4.2).

use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CLUSTER_WIDE_LABEL: &str = "#cluster-wide";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
	#[serde(rename = "=")]
	Equal,
	#[serde(rename = "!=")]
	NotEqual,
	#[serde(rename = "=~")]
	RegexMatch,
	#[serde(rename = "!~")]
	RegexNoMatch,
}

impl Operator {
	pub fn is_regex(self) -> bool {
		matches!(self, Operator::RegexMatch | Operator::RegexNoMatch)
	}

	pub fn is_negative(self) -> bool {
		matches!(self, Operator::NotEqual | Operator::RegexNoMatch)
	}

	/// Promotes a single-value operator to its multi-value regex form:
	/// `=` -> `=~`, `!=` -> `!~`. Regex operators are already their own
	/// promotion (spec §4.4, "Value handling, common to all rewriters").
	pub fn promote_to_regex(self) -> Operator {
		match self {
			Operator::Equal => Operator::RegexMatch,
			Operator::NotEqual => Operator::RegexNoMatch,
			other => other,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Operator::Equal => "=",
			Operator::NotEqual => "!=",
			Operator::RegexMatch => "=~",
			Operator::RegexNoMatch => "!~",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRule {
	pub name: String,
	pub operator: Operator,
	pub values: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
	#[error("rule name must not be empty")]
	EmptyName,
	#[error("rule values must not be empty")]
	EmptyValues,
	#[error("value {value:?} is not a valid regular expression: {source}")]
	InvalidRegex { value: String, source: String },
	#[error("{CLUSTER_WIDE_LABEL} must be the only rule and use operator `=` with value [\"true\"]")]
	InvalidClusterWideRule,
}

impl LabelRule {
	pub fn new(name: String, operator: Operator, values: Vec<String>) -> Result<Self, RuleError> {
		if name.is_empty() {
			return Err(RuleError::EmptyName);
		}
		if values.is_empty() {
			return Err(RuleError::EmptyValues);
		}
		if operator.is_regex() {
			for value in &values {
				Regex::new(value).map_err(|e| RuleError::InvalidRegex {
					value: value.clone(),
					source: e.to_string(),
				})?;
			}
		}
		if name == CLUSTER_WIDE_LABEL
			&& (operator != Operator::Equal || values != ["true".to_string()])
		{
			return Err(RuleError::InvalidClusterWideRule);
		}
		Ok(Self { name, operator, values })
	}

	pub fn is_cluster_wide(&self) -> bool {
		self.name == CLUSTER_WIDE_LABEL
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
	#[default]
	And,
	Or,
}

#[derive(Debug, Clone)]
pub struct LabelPolicy {
	pub rules: Vec<LabelRule>,
	pub logic: Logic,
	pub override_: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
	#[error("policy must have at least one rule")]
	NoRules,
	#[error(transparent)]
	Rule(#[from] RuleError),
}

impl LabelPolicy {
	pub fn new(rules: Vec<LabelRule>, logic: Logic, override_: bool) -> Result<Self, PolicyError> {
		if rules.is_empty() {
			return Err(PolicyError::NoRules);
		}
		Ok(Self { rules, logic, override_ })
	}

	/// A policy consisting solely of the `#cluster-wide` sentinel: grants
	/// unrestricted access, renders the rest of any rule set moot (spec §3).
	pub fn cluster_wide() -> Self {
		Self {
			rules: vec![LabelRule {
				name: CLUSTER_WIDE_LABEL.to_string(),
				operator: Operator::Equal,
				values: vec!["true".to_string()],
			}],
			logic: Logic::And,
			override_: false,
		}
	}

	pub fn is_cluster_wide(&self) -> bool {
		self.rules.iter().any(LabelRule::is_cluster_wide)
	}

	/// Union of allowed values across every rule bearing `name`, modeling
	/// the merged/OR semantics the rewriters validate against (spec §4.4,
	/// "Validation of existing matchers").
	pub fn allowed_values(&self, name: &str) -> BTreeSet<&str> {
		self
			.rules
			.iter()
			.filter(|r| r.name == name)
			.flat_map(|r| r.values.iter().map(String::as_str))
			.collect()
	}

	pub fn rule_names(&self) -> BTreeSet<&str> {
		self.rules.iter().map(|r| r.name.as_str()).collect()
	}
}

/// Merges candidate policies from a user's direct entry plus every group
/// they belong to (spec §4.2, steps 3-5).
///
/// - If any candidate is cluster-wide, the merge short-circuits to the
///   cluster-wide singleton.
/// - Otherwise rules are concatenated; a candidate with `override_ = true`
///   discards everything collected before it (override wins in the order
///   encountered).
/// - The merged logic is always OR: multiple group memberships widen
///   access.
/// - Per-label consolidation then folds repeated rules for the same label
///   into one: values are unioned (sorted, deduped), and the operator
///   becomes the positive form (`=~`) unless every contributor was
///   negative, in which case it stays negative (`!~`).
pub fn merge(candidates: &[LabelPolicy]) -> LabelPolicy {
	if candidates.iter().any(LabelPolicy::is_cluster_wide) {
		return LabelPolicy::cluster_wide();
	}

	let mut rules: Vec<LabelRule> = Vec::new();
	for candidate in candidates {
		if candidate.override_ {
			rules.clear();
		}
		rules.extend(candidate.rules.iter().cloned());
	}

	let mut by_name: HashMap<&str, Vec<&LabelRule>> = HashMap::new();
	for rule in &rules {
		by_name.entry(rule.name.as_str()).or_default().push(rule);
	}

	let mut consolidated = Vec::with_capacity(by_name.len());
	// Iterate in the original encounter order for stable output.
	let mut seen = BTreeSet::new();
	for rule in &rules {
		if !seen.insert(rule.name.as_str()) {
			continue;
		}
		let contributors = &by_name[rule.name.as_str()];
		if contributors.len() == 1 {
			consolidated.push(contributors[0].clone());
			continue;
		}
		let mut values: BTreeSet<String> = BTreeSet::new();
		let mut any_positive = false;
		for c in contributors {
			values.extend(c.values.iter().cloned());
			if !c.operator.is_negative() {
				any_positive = true;
			}
		}
		let operator = if any_positive {
			Operator::RegexMatch
		} else {
			Operator::RegexNoMatch
		};
		consolidated.push(LabelRule {
			name: rule.name.clone(),
			operator,
			values: values.into_iter().collect(),
		});
	}

	LabelPolicy {
		rules: consolidated,
		logic: Logic::Or,
		override_: false,
	}
}
