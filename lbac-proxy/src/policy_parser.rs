//! Extended `labels.yaml` entry parser (spec §4.1). Accepts only the
//! extended shape (a `_rules` list, plus optional `_logic`/`_override`) or a
//! bare `#cluster-wide` marker; anything else is the deprecated "simple"
//! format and is rejected fail-fast, with no silent coercion.

use std::collections::HashMap;

use lbac_core::StartupError;
use serde::Deserialize;
use serde_yaml::Value;

use crate::policy::{CLUSTER_WIDE_LABEL, LabelPolicy, LabelRule, Logic, Operator};

#[derive(Debug, Deserialize)]
struct RawRule {
	name: String,
	operator: String,
	values: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtendedEntry {
	#[serde(rename = "_rules")]
	rules: Vec<RawRule>,
	#[serde(rename = "_logic", default)]
	logic: Option<String>,
	#[serde(rename = "_override", default)]
	override_: bool,
}

fn parse_operator(raw: &str) -> Option<Operator> {
	match raw {
		"=" => Some(Operator::Equal),
		"!=" => Some(Operator::NotEqual),
		"=~" => Some(Operator::RegexMatch),
		"!~" => Some(Operator::RegexNoMatch),
		_ => None,
	}
}

fn parse_logic(raw: &str) -> Option<Logic> {
	match raw.to_ascii_uppercase().as_str() {
		"AND" => Some(Logic::And),
		"OR" => Some(Logic::Or),
		_ => None,
	}
}

/// Parses one `labels.yaml` top-level entry into a `LabelPolicy`.
///
/// `entry_name` is only used to build error messages that identify the
/// offending entry; `value` is the raw YAML mapping for that entry.
pub fn parse_entry(entry_name: &str, value: &Value) -> Result<LabelPolicy, StartupError> {
	if let Some(policy) = try_parse_cluster_wide_marker(value) {
		return Ok(policy);
	}

	let mapping = value.as_mapping().ok_or_else(|| StartupError::DeprecatedLabelFormat {
		entry: entry_name.to_string(),
	})?;

	if !mapping.contains_key(Value::String("_rules".to_string())) {
		return Err(StartupError::DeprecatedLabelFormat {
			entry: entry_name.to_string(),
		});
	}

	let raw: RawExtendedEntry =
		serde_yaml::from_value(value.clone()).map_err(|e| StartupError::InvalidLabelRule {
			entry: entry_name.to_string(),
			rule_index: 0,
			reason: e.to_string(),
		})?;

	let logic = match raw.logic {
		Some(raw_logic) => parse_logic(&raw_logic).ok_or_else(|| StartupError::InvalidLabelRule {
			entry: entry_name.to_string(),
			rule_index: 0,
			reason: format!("_logic must be AND or OR, got {raw_logic:?}"),
		})?,
		None => Logic::And,
	};

	let mut rules = Vec::with_capacity(raw.rules.len());
	for (index, raw_rule) in raw.rules.into_iter().enumerate() {
		let operator = parse_operator(&raw_rule.operator).ok_or_else(|| StartupError::InvalidLabelRule {
			entry: entry_name.to_string(),
			rule_index: index,
			reason: format!(
				"operator must be one of `=`, `!=`, `=~`, `!~`, got {:?}",
				raw_rule.operator
			),
		})?;
		let rule = LabelRule::new(raw_rule.name, operator, raw_rule.values).map_err(|e| {
			StartupError::InvalidLabelRule {
				entry: entry_name.to_string(),
				rule_index: index,
				reason: e.to_string(),
			}
		})?;
		rules.push(rule);
	}

	LabelPolicy::new(rules, logic, raw.override_).map_err(|e| StartupError::InvalidLabelRule {
		entry: entry_name.to_string(),
		rule_index: 0,
		reason: e.to_string(),
	})
}

/// Recognizes the one shorthand the extended format allows without a
/// `_rules` list: an entry that is purely the `#cluster-wide` marker, e.g.
/// `someuser: { '#cluster-wide': true }`.
fn try_parse_cluster_wide_marker(value: &Value) -> Option<LabelPolicy> {
	let mapping = value.as_mapping()?;
	if mapping.len() != 1 {
		return None;
	}
	let (key, val) = mapping.iter().next()?;
	if key.as_str()? != CLUSTER_WIDE_LABEL {
		return None;
	}
	let truthy = match val {
		Value::Bool(b) => *b,
		Value::String(s) => s == "true",
		_ => false,
	};
	truthy.then(LabelPolicy::cluster_wide)
}

pub fn parse_labels_file(contents: &str) -> Result<HashMap<String, LabelPolicy>, StartupError> {
	let top: HashMap<String, Value> =
		serde_yaml::from_str(contents).map_err(|e| StartupError::ConfigParse {
			path: "labels.yaml".to_string(),
			source: e,
		})?;

	let mut policies = HashMap::with_capacity(top.len());
	for (entry_name, value) in top {
		let policy = parse_entry(&entry_name, &value)?;
		policies.insert(entry_name, policy);
	}
	Ok(policies)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extended_format_parses() {
		let yaml = r#"
_rules:
  - name: namespace
    operator: "=~"
    values: ["prod", "staging"]
_logic: OR
"#;
		let value: Value = serde_yaml::from_str(yaml).unwrap();
		let policy = parse_entry("team-a", &value).unwrap();
		assert_eq!(policy.logic, Logic::Or);
		assert_eq!(policy.rules.len(), 1);
	}

	#[test]
	fn missing_rules_is_deprecated_format() {
		let yaml = r#"
namespace: prod
team: backend
"#;
		let value: Value = serde_yaml::from_str(yaml).unwrap();
		let err = parse_entry("legacy-user", &value).unwrap_err();
		assert!(matches!(err, StartupError::DeprecatedLabelFormat { .. }));
	}

	#[test]
	fn bare_cluster_wide_marker_is_accepted() {
		let yaml = "'#cluster-wide': true\n";
		let value: Value = serde_yaml::from_str(yaml).unwrap();
		let policy = parse_entry("admins", &value).unwrap();
		assert!(policy.is_cluster_wide());
	}

	#[test]
	fn invalid_operator_is_rejected() {
		let yaml = r#"
_rules:
  - name: namespace
    operator: "contains"
    values: ["prod"]
"#;
		let value: Value = serde_yaml::from_str(yaml).unwrap();
		let err = parse_entry("team-b", &value).unwrap_err();
		assert!(matches!(err, StartupError::InvalidLabelRule { .. }));
	}
}
