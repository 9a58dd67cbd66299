//! Structural edits of YAML and JSON documents in an extracted tree.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::Substitution;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One step of a document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parsed document path such as `spec.containers[0].image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath(Vec<Segment>);

impl DocPath {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || OcmError::ValidationError(format!("Invalid document path '{}'", path));
        if path.trim().is_empty() {
            return Err(invalid());
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if key.is_empty() && rest.is_empty() {
                return Err(invalid());
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                if !rest.starts_with('[') {
                    return Err(invalid());
                }
                let index = rest[1..close].parse::<usize>().map_err(|_| invalid())?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Value at this path, if present.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.0 {
            current = match segment {
                Segment::Key(key) => current.as_object()?.get(key)?,
                Segment::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }

    /// Set `value` at this path, creating intermediate maps.
    ///
    /// A list index may address an existing element or append one past the
    /// end; anything further is an error.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<()> {
        let mut current = doc;
        for segment in &self.0 {
            current = match segment {
                Segment::Key(key) => {
                    if !current.is_object() {
                        if !current.is_null() {
                            return Err(self.conflict(key));
                        }
                        *current = Value::Object(Map::new());
                    }
                    match current {
                        Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                        _ => return Err(self.conflict(key)),
                    }
                }
                Segment::Index(i) => {
                    if current.is_null() {
                        *current = Value::Array(Vec::new());
                    }
                    let Value::Array(list) = current else {
                        return Err(self.conflict(&format!("[{}]", i)));
                    };
                    if *i == list.len() {
                        list.push(Value::Null);
                    }
                    list.get_mut(*i).ok_or_else(|| {
                        OcmError::ValidationError(format!(
                            "Index {} out of range at '{}'",
                            i, self
                        ))
                    })?
                }
            };
        }
        *current = value;
        Ok(())
    }

    fn conflict(&self, at: &str) -> OcmError {
        OcmError::ValidationError(format!(
            "Cannot set '{}': '{}' is not a container",
            self, at
        ))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Document format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Json,
    Yaml,
}

impl DocFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocFormat::Json,
            _ => DocFormat::Yaml,
        }
    }
}

/// Resolve `file` inside `root`, refusing paths that leave it.
///
/// Links are followed, so the resolved file must also lie under `root`.
pub fn locate(root: &Path, file: &str) -> Result<PathBuf> {
    let relative = Path::new(file.trim_start_matches("./"));
    let valid = !file.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(OcmError::ValidationError(format!(
            "Invalid file path '{}'",
            file
        )));
    }
    let path = root.join(relative);
    if !path.is_file() {
        return Err(OcmError::ValidationError(format!(
            "file '{}' not found",
            file
        )));
    }
    let resolved = path.canonicalize()?;
    if !resolved.starts_with(root.canonicalize()?) {
        return Err(OcmError::ValidationError(format!(
            "file '{}' resolves outside the source tree",
            file
        )));
    }
    Ok(resolved)
}

/// Read every document of a file.
///
/// JSON files hold one document; YAML files may hold several separated by
/// `---`. Empty YAML documents are dropped, and a file without content
/// reads as a single null document. Mapping key order is kept; comments
/// are not.
pub fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let invalid =
        |e: &dyn fmt::Display| OcmError::ValidationError(format!("{}: {}", path.display(), e));
    let data = std::fs::read(path)?;
    let mut docs = match DocFormat::for_path(path) {
        DocFormat::Json => vec![serde_json::from_slice(&data).map_err(|e| invalid(&e))?],
        DocFormat::Yaml if data.iter().all(u8::is_ascii_whitespace) => Vec::new(),
        DocFormat::Yaml => {
            let mut docs = Vec::new();
            for document in serde_yaml::Deserializer::from_slice(&data) {
                let doc = Value::deserialize(document).map_err(|e| invalid(&e))?;
                if !doc.is_null() {
                    docs.push(doc);
                }
            }
            docs
        }
    };
    if docs.is_empty() {
        docs.push(Value::Null);
    }
    Ok(docs)
}

/// Write `docs` back to `path`; YAML documents are joined with `---`.
pub fn write_documents(path: &Path, docs: &[Value]) -> Result<()> {
    let data = match DocFormat::for_path(path) {
        DocFormat::Json => {
            let [doc] = docs else {
                return Err(OcmError::Invariant(format!(
                    "{} documents for JSON file {}",
                    docs.len(),
                    path.display()
                )));
            };
            let mut out = serde_json::to_vec_pretty(doc)?;
            out.push(b'\n');
            out
        }
        DocFormat::Yaml => {
            let mut out = String::new();
            for (i, doc) in docs.iter().enumerate() {
                if i > 0 {
                    out.push_str("---\n");
                }
                out.push_str(&serde_yaml::to_string(doc)?);
            }
            out.into_bytes()
        }
    };
    std::fs::write(path, data)?;
    Ok(())
}

/// Index of the document a path addresses: the first one in which the
/// path already resolves, otherwise the first document.
pub fn select_document(docs: &[Value], path: &DocPath) -> usize {
    docs.iter()
        .position(|doc| path.get(doc).is_some())
        .unwrap_or(0)
}

/// Apply substitutions to the tree under `root`.
///
/// Each file is read and written once; substitutions for the same file
/// apply in order.
pub fn apply(root: &Path, substitutions: &[Substitution]) -> Result<()> {
    let mut by_file: BTreeMap<&str, Vec<&Substitution>> = BTreeMap::new();
    for substitution in substitutions {
        by_file
            .entry(substitution.file.as_str())
            .or_default()
            .push(substitution);
    }

    for (file, edits) in by_file {
        let path = locate(root, file)?;
        let mut docs = read_documents(&path)?;
        for edit in &edits {
            let doc_path = DocPath::parse(&edit.path)?;
            let index = select_document(&docs, &doc_path);
            doc_path.set(&mut docs[index], edit.value.clone())?;
        }
        write_documents(&path, &docs)?;
        tracing::debug!(file = %file, edits = edits.len(), "Applied substitutions");
    }
    Ok(())
}
