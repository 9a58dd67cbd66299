//! Strategic merge patches applied to an extracted tree.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use a3s_ocm_core::error::{OcmError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::substitute::{locate, read_documents, write_documents};

/// Directive key controlling how a patch map is applied.
const DIRECTIVE: &str = "$patch";
/// Key list elements are matched by.
const MERGE_KEY: &str = "name";
/// Fields a patch uses to pick its document in a multi-document file.
const DOCUMENT_KEYS: [&str; 2] = ["/kind", "/metadata/name"];

/// Where patch documents come from.
#[async_trait]
pub trait PatchSource: Send + Sync {
    /// Read the document at `path` inside the source.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Patch documents in a checked-out directory.
pub struct DirPatchSource {
    root: PathBuf,
}

impl DirPatchSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PatchSource for DirPatchSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let relative = Path::new(path);
        if path.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(OcmError::ValidationError(format!(
                "Invalid patch path '{}'",
                path
            )));
        }
        match tokio::fs::read(self.root.join(relative)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcmError::NotFound(format!(
                "patch {} in {}",
                path,
                self.root.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// A patch document to merge onto `target` in the extracted tree.
#[derive(Clone)]
pub struct PatchSpec {
    pub source: Arc<dyn PatchSource>,
    /// Document path inside the source
    pub path: String,
    /// File in the extracted tree that receives the patch
    pub target: String,
}

impl std::fmt::Debug for PatchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchSpec")
            .field("path", &self.path)
            .field("target", &self.target)
            .finish()
    }
}

/// Merge `patch` onto `base`.
///
/// - maps merge recursively; a `null` value deletes the key
/// - `$patch: replace` replaces the map, `$patch: delete` removes it
/// - lists whose elements are maps with a `name` merge element-wise by
///   name; other lists are replaced
pub fn strategic_merge(base: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(changes)) = (&mut *base, patch) {
        merge_maps(target, changes);
        return;
    }
    if let (Value::Array(target), Value::Array(changes)) = (&mut *base, patch) {
        if keyed(target) && keyed(changes) {
            merge_lists(target, changes);
            return;
        }
    }
    *base = strip_directives(patch);
}

fn merge_maps(target: &mut Map<String, Value>, changes: &Map<String, Value>) {
    if directive(changes) == Some("replace") {
        *target = match strip_directives(&Value::Object(changes.clone())) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        return;
    }
    for (key, change) in changes {
        if key == DIRECTIVE {
            continue;
        }
        if change.is_null() || is_delete(change) {
            target.shift_remove(key);
            continue;
        }
        match target.get_mut(key) {
            Some(existing) => strategic_merge(existing, change),
            None => {
                target.insert(key.clone(), strip_directives(change));
            }
        }
    }
}

fn merge_lists(target: &mut Vec<Value>, changes: &[Value]) {
    for change in changes {
        let name = change.get(MERGE_KEY);
        let position = target.iter().position(|t| t.get(MERGE_KEY) == name);
        match (position, is_delete(change)) {
            (Some(i), true) => {
                target.remove(i);
            }
            (Some(i), false) => strategic_merge(&mut target[i], change),
            (None, true) => {}
            (None, false) => target.push(strip_directives(change)),
        }
    }
}

fn keyed(list: &[Value]) -> bool {
    !list.is_empty() && list.iter().all(|v| v.get(MERGE_KEY).is_some())
}

fn directive(map: &Map<String, Value>) -> Option<&str> {
    map.get(DIRECTIVE).and_then(Value::as_str)
}

fn is_delete(value: &Value) -> bool {
    value.as_object().and_then(directive) == Some("delete")
}

fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != DIRECTIVE)
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(list) => Value::Array(list.iter().map(strip_directives).collect()),
        other => other.clone(),
    }
}

/// Whether `doc` carries the `kind` and `metadata.name` the patch names.
fn addressed_by(doc: &Value, patch: &Value) -> bool {
    DOCUMENT_KEYS.iter().all(|key| match patch.pointer(key) {
        Some(wanted) => doc.pointer(key) == Some(wanted),
        None => true,
    })
}

/// Merge the YAML/JSON `patch` document onto `target` under `root`.
///
/// In a multi-document file the patch lands on the first document whose
/// `kind` and `metadata.name` match the patch's, or the first document if
/// none does.
pub fn apply(root: &Path, target: &str, patch: &[u8]) -> Result<()> {
    let path = locate(root, target)?;
    let patch: Value = serde_yaml::from_slice(patch)
        .map_err(|e| OcmError::ValidationError(format!("Invalid patch document: {}", e)))?;
    let mut docs = read_documents(&path)?;
    let index = docs
        .iter()
        .position(|doc| addressed_by(doc, &patch))
        .unwrap_or(0);
    strategic_merge(&mut docs[index], &patch);
    write_documents(&path, &docs)?;
    tracing::debug!(file = %target, document = index, "Applied strategic merge patch");
    Ok(())
}
