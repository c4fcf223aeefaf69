//! Allow/deny filename filtering.
//!
//! A filename is accepted when the first allow pattern that matches it is
//! not contradicted by any deny pattern. Deny patterns are only consulted
//! after an allow pattern has matched; filenames no allow pattern matches
//! are dropped without consulting the deny list at all.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};

/// Compiled allow/deny chain over bare filenames.
#[derive(Debug, Clone)]
pub struct FilterChain {
    allow: Vec<(String, GlobMatcher)>,
    deny: Vec<(String, GlobMatcher)>,
}

/// Outcome of evaluating one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accepted { allow: String },
    Denied { allow: String, deny: String },
    Unmatched,
}

impl FilterChain {
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self> {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn evaluate(&self, filename: &str) -> FilterDecision {
        for (allow, matcher) in &self.allow {
            if !matcher.is_match(filename) {
                continue;
            }
            if let Some((deny, _)) = self.deny.iter().find(|(_, m)| m.is_match(filename)) {
                return FilterDecision::Denied {
                    allow: allow.clone(),
                    deny: deny.clone(),
                };
            }
            return FilterDecision::Accepted {
                allow: allow.clone(),
            };
        }
        FilterDecision::Unmatched
    }

    pub fn accepts(&self, filename: &str) -> bool {
        matches!(self.evaluate(filename), FilterDecision::Accepted { .. })
    }
}

fn compile(patterns: &[String]) -> Result<Vec<(String, GlobMatcher)>> {
    patterns
        .iter()
        .map(|p| {
            let glob = Glob::new(p).with_context(|| format!("invalid filter pattern: {}", p))?;
            Ok((p.clone(), glob.compile_matcher()))
        })
        .collect()
}
