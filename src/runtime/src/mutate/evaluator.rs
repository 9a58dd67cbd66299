//! Template expression evaluation.
//!
//! The mutation engine only depends on the narrow [`Evaluator`] contract.
//! [`CascadeEvaluator`] implements the subset of the cascade template
//! language ConfigData rules use: a scalar that consists of a single
//! `(( expression ))` is replaced by the expression's value.
//!
//! Expressions are one or more terms separated by `||`; the first term that
//! yields a value wins. A term is a quoted string, a number, `true`/`false`,
//! `~` (null) or a dotted reference into the template root.

use a3s_ocm_core::error::{OcmError, Result};
use serde_json::Value;

use super::substitute::DocPath;

/// Resolves template expressions inside a YAML document.
pub trait Evaluator: Send + Sync {
    /// Evaluate `template` (YAML) and return the resolved document (YAML).
    ///
    /// A reference to an undefined name fails with
    /// `OcmError::UnresolvedReference` carrying the name and the document
    /// path of the expression; `file` is left empty.
    fn evaluate(&self, template: &[u8]) -> Result<Vec<u8>>;
}

/// Built-in cascade evaluator.
#[derive(Debug, Clone)]
pub struct CascadeEvaluator {
    max_depth: usize,
}

impl Default for CascadeEvaluator {
    fn default() -> Self {
        Self { max_depth: 16 }
    }
}

impl CascadeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Evaluator for CascadeEvaluator {
    fn evaluate(&self, template: &[u8]) -> Result<Vec<u8>> {
        let root: Value = serde_yaml::from_slice(template)?;
        let resolved = self.resolve(&root, &root, String::new(), 0)?;
        Ok(serde_yaml::to_string(&resolved)?.into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Literal(Value),
    Reference(String),
}

impl CascadeEvaluator {
    fn resolve(&self, node: &Value, root: &Value, at: String, depth: usize) -> Result<Value> {
        match node {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    let child = if at.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", at, key)
                    };
                    out.insert(key.clone(), self.resolve(value, root, child, depth)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(list) => list
                .iter()
                .enumerate()
                .map(|(i, value)| self.resolve(value, root, format!("{}[{}]", at, i), depth))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::String(text) => match expression(text) {
                Some(expr) => self.evaluate_expression(expr, root, &at, depth),
                None => Ok(node.clone()),
            },
            _ => Ok(node.clone()),
        }
    }

    fn evaluate_expression(&self, expr: &str, root: &Value, at: &str, depth: usize) -> Result<Value> {
        if depth >= self.max_depth {
            return Err(OcmError::ValidationError(format!(
                "Expression '(( {} ))' at '{}' nests deeper than {}",
                expr, at, self.max_depth
            )));
        }

        let terms = parse_terms(expr)?;
        let mut unresolved = None;
        for term in &terms {
            match term {
                Term::Literal(value) => return Ok(value.clone()),
                Term::Reference(name) => {
                    let target = DocPath::parse(name)
                        .ok()
                        .and_then(|path| path.get(root).cloned());
                    match target {
                        // Referenced values may themselves be expressions.
                        Some(value) => return self.resolve(&value, root, at.to_string(), depth + 1),
                        None => {
                            unresolved.get_or_insert_with(|| name.clone());
                        }
                    }
                }
            }
        }

        Err(OcmError::UnresolvedReference {
            reference: unresolved.unwrap_or_else(|| expr.to_string()),
            file: String::new(),
            path: at.to_string(),
        })
    }
}

/// Inner text of a `(( ... ))` scalar.
fn expression(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix("((")?.strip_suffix("))")?;
    Some(inner.trim())
}

fn parse_terms(expr: &str) -> Result<Vec<Term>> {
    split_alternatives(expr)
        .into_iter()
        .map(|term| parse_term(term.trim(), expr))
        .collect()
}

/// Split at `||` outside quotes.
fn split_alternatives(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '|' && bytes.get(i + 1) == Some(&b'|') => {
                parts.push(&expr[start..i]);
                i += 2;
                start = i;
                continue;
            }
            None => {}
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

fn parse_term(term: &str, expr: &str) -> Result<Term> {
    if term.is_empty() {
        return Err(OcmError::ValidationError(format!(
            "Empty term in expression '(( {} ))'",
            expr
        )));
    }
    for q in ['"', '\''] {
        if term.len() >= 2 && term.starts_with(q) && term.ends_with(q) {
            return Ok(Term::Literal(Value::String(term[1..term.len() - 1].to_string())));
        }
    }
    match term {
        "true" => return Ok(Term::Literal(Value::Bool(true))),
        "false" => return Ok(Term::Literal(Value::Bool(false))),
        "~" | "nil" => return Ok(Term::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = term.parse::<i64>() {
        return Ok(Term::Literal(Value::from(n)));
    }
    if let Ok(f) = term.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Ok(Term::Literal(Value::Number(n)));
        }
    }
    let valid_reference = term
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']'));
    if !valid_reference {
        return Err(OcmError::ValidationError(format!(
            "Unsupported term '{}' in expression '(( {} ))'",
            term, expr
        )));
    }
    Ok(Term::Reference(term.to_string()))
}
