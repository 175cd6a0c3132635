//! Small text-scanning helpers shared by the LogQL and TraceQL rewriters,
//! both of which splice matcher lists into query text rather than mutating
//! a parsed AST (spec §4.4: "TraceQL has no mainstream Rust AST crate...
//! the rewrite is performed textually").

/// Finds the first top-level `{...}` span in `query`, honouring nested
/// braces and quoted strings (`"` and `` ` ``) so that a brace inside a
/// string literal doesn't throw off the balance count. Returns the byte
/// range `[start, end)` such that `query[start..end]` is `{...}` inclusive
/// of both braces.
pub fn find_selector_span(query: &str) -> Option<(usize, usize)> {
	let bytes = query.as_bytes();
	let mut depth = 0usize;
	let mut start = None;
	let mut in_quote: Option<u8> = None;

	let mut i = 0;
	while i < bytes.len() {
		let b = bytes[i];
		if let Some(q) = in_quote {
			if b == b'\\' {
				i += 2;
				continue;
			}
			if b == q {
				in_quote = None;
			}
			i += 1;
			continue;
		}
		match b {
			b'"' | b'`' => in_quote = Some(b),
			b'{' => {
				if depth == 0 {
					start = Some(i);
				}
				depth += 1;
			},
			b'}' => {
				depth = depth.saturating_sub(1);
				if depth == 0 {
					if let Some(s) = start {
						return Some((s, i + 1));
					}
				}
			},
			_ => {},
		}
		i += 1;
	}
	None
}

/// Splits `s` on `sep`, ignoring occurrences inside quoted strings or
/// nested brackets/parens/braces.
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut depth = 0i32;
	let mut in_quote: Option<char> = None;
	let mut start = 0;
	let mut chars = s.char_indices().peekable();

	while let Some((i, c)) = chars.next() {
		if let Some(q) = in_quote {
			if c == '\\' {
				chars.next();
				continue;
			}
			if c == q {
				in_quote = None;
			}
			continue;
		}
		match c {
			'"' | '`' => in_quote = Some(c),
			'{' | '(' | '[' => depth += 1,
			'}' | ')' | ']' => depth -= 1,
			_ if c == sep && depth == 0 => {
				parts.push(&s[start..i]);
				start = i + c.len_utf8();
			},
			_ => {},
		}
	}
	parts.push(&s[start..]);
	parts
}

/// Splits a single matcher expression (e.g. `namespace=~"prod|staging"`)
/// into `(name, operator, value)`, stripping the surrounding quotes from
/// the value. Recognises the four operators in longest-first order so
/// `!=`/`=~` aren't misread as a bare `=`.
pub fn split_matcher(part: &str) -> Option<(&str, &str, &str)> {
	const OPS: &[&str] = &["!=", "=~", "!~", "="];
	let mut best: Option<(usize, &str)> = None;
	for op in OPS {
		if let Some(idx) = part.find(op) {
			if best.is_none_or(|(best_idx, _)| idx < best_idx) {
				best = Some((idx, op));
			}
		}
	}
	let (idx, op) = best?;
	let name = part[..idx].trim();
	let rest = part[idx + op.len()..].trim();
	let value = rest.trim_matches(|c| c == '"' || c == '`');
	if name.is_empty() {
		return None;
	}
	Some((name, op, value))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn finds_simple_selector() {
		let (s, e) = find_selector_span(r#"{job="app"} |= "x""#).unwrap();
		assert_eq!(&r#"{job="app"} |= "x""#[s..e], r#"{job="app"}"#);
	}

	#[test]
	fn ignores_braces_inside_quotes() {
		let (s, e) = find_selector_span(r#"{job="{not a brace}"}"#).unwrap();
		assert_eq!(&r#"{job="{not a brace}"}"#[s..e], r#"{job="{not a brace}"}"#);
	}

	#[test]
	fn splits_on_commas_outside_quotes_and_brackets() {
		let parts = split_top_level(r#"a="1,2", b="3""#, ',');
		assert_eq!(parts, vec![r#"a="1,2""#, r#" b="3""#]);
	}

	#[test]
	fn matcher_operator_precedence_is_longest_match() {
		assert_eq!(split_matcher(r#"namespace!="prod""#), Some(("namespace", "!=", "prod")));
		assert_eq!(split_matcher(r#"namespace=~"prod""#), Some(("namespace", "=~", "prod")));
		assert_eq!(split_matcher(r#"namespace="prod""#), Some(("namespace", "=", "prod")));
	}
}
