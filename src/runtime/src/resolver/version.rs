//! Semantic version constraints.
//!
//! Accepts `semver` requirement syntax plus two common extensions:
//! space-separated comparators (`>=1.0.0 <2.0.0`) and `||` alternatives.
//! A leading `v` is tolerated on versions and in constraints.

use a3s_ocm_core::error::{OcmError, Result};
use semver::{Version, VersionReq};

/// Parse a version string, tolerating a leading `v`.
pub fn parse_version(version: &str) -> Result<Version> {
    let trimmed = version.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).map_err(|e| {
        OcmError::ValidationError(format!("Invalid semantic version '{}': {}", version, e))
    })
}

/// A disjunction of semver requirements.
#[derive(Debug, Clone)]
pub struct Constraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn parse(constraint: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for alternative in constraint.split("||") {
            let normalized = normalize_comparators(alternative);
            if normalized.is_empty() {
                return Err(OcmError::ValidationError(format!(
                    "Empty alternative in version constraint '{}'",
                    constraint
                )));
            }
            let req = VersionReq::parse(&normalized).map_err(|e| {
                OcmError::ValidationError(format!(
                    "Invalid version constraint '{}': {}",
                    constraint, e
                ))
            })?;
            alternatives.push(req);
        }
        Ok(Self {
            raw: constraint.trim().to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Highest version in `versions` satisfying `constraint`.
///
/// Every candidate must parse; one malformed version fails the whole
/// selection. Returns the version string as listed.
pub fn latest_matching(versions: &[String], constraint: &Constraint) -> Result<String> {
    let mut best: Option<(Version, &String)> = None;
    for raw in versions {
        let version = parse_version(raw)?;
        if !constraint.matches(&version) {
            continue;
        }
        if best.as_ref().map_or(true, |(b, _)| version > *b) {
            best = Some((version, raw));
        }
    }
    best.map(|(_, raw)| raw.clone()).ok_or_else(|| {
        OcmError::NotFound(format!(
            "no version satisfies constraint '{}' (candidates: {})",
            constraint.as_str(),
            versions.join(", ")
        ))
    })
}

/// `>= 1.0 <2.0` → `>=1.0, <2.0`; strips `v` prefixes from operands.
fn normalize_comparators(alternative: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alternative.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        let split = token
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
            .unwrap_or(0);
        let (op, operand) = token.split_at(split);
        let operand = operand.strip_prefix('v').unwrap_or(operand);
        comparators.push(format!("{}{}{}", pending_op, op, operand));
        pending_op.clear();
    }
    comparators.join(", ")
}
