//! Query rewriters (spec §4.4): one module per query language, sharing the
//! matcher model in [`common`] and, for LogQL/TraceQL, the text-scanning
//! helpers in [`scan`].

pub mod common;
pub mod logql;
pub mod promql;
pub mod scan;
pub mod traceql;

use lbac_core::Error;

use crate::policy::LabelPolicy;

/// The query language a route speaks, selected by the route table
/// (spec §4.7) and used to pick the right rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLanguage {
	PromQl,
	LogQl,
	TraceQl,
}

/// Rewrites `query` under `policy` using the rewriter for `lang`. Each
/// rewriter independently honours the cluster-wide bypass and the
/// empty-query synthesis rule (spec §4.4).
pub fn enforce(lang: QueryLanguage, query: &str, policy: &LabelPolicy) -> Result<String, Error> {
	match lang {
		QueryLanguage::PromQl => promql::enforce(query, policy),
		QueryLanguage::LogQl => logql::enforce(query, policy),
		QueryLanguage::TraceQl => traceql::enforce(query, policy),
	}
}
