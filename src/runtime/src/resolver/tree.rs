//! Mirrored descriptor records and the resolved reference tree.

use std::collections::BTreeMap;
use std::sync::Arc;

use a3s_ocm_core::ComponentDescriptor;
use dashmap::DashMap;

/// Concurrent map of mirrored descriptors keyed by record name.
///
/// Records are immutable: inserting an existing record name keeps the
/// first descriptor.
#[derive(Default)]
pub struct DescriptorStore {
    records: DashMap<String, Arc<ComponentDescriptor>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable record name: `<name>-<version>-<8 hex of identity hash>`.
    pub fn record_name(
        name: &str,
        version: &str,
        extra_identity: &BTreeMap<String, String>,
    ) -> String {
        let mut identity = a3s_ocm_core::Identity::new()
            .with(a3s_ocm_core::identity::COMPONENT_NAME_KEY, name)
            .with(a3s_ocm_core::identity::COMPONENT_VERSION_KEY, version);
        identity.extend(extra_identity);
        let hash = identity.hash();
        format!(
            "{}-{}-{}",
            sanitize(name),
            sanitize(version),
            &hash[..8]
        )
    }

    /// Mirror a descriptor, returning its record name.
    pub fn insert(
        &self,
        descriptor: Arc<ComponentDescriptor>,
        extra_identity: &BTreeMap<String, String>,
    ) -> String {
        let record = Self::record_name(descriptor.name(), descriptor.version(), extra_identity);
        self.records.entry(record.clone()).or_insert(descriptor);
        record
    }

    pub fn get(&self, record: &str) -> Option<Arc<ComponentDescriptor>> {
        self.records.get(record).map(|r| r.value().clone())
    }

    pub fn contains(&self, record: &str) -> bool {
        self.records.contains_key(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record names, sorted.
    pub fn records(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

/// Lowercase alphanumerics, everything else becomes `-`.
fn sanitize(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// One resolved component reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceNode {
    /// Reference name as declared by the parent
    pub name: String,
    pub component_name: String,
    pub version: String,
    pub extra_identity: BTreeMap<String, String>,
    /// Record of the mirrored descriptor
    pub record: String,
    pub references: Vec<ReferenceNode>,
}

impl ReferenceNode {
    fn matches(&self, key: &str) -> bool {
        self.name == key || self.component_name == key
    }

    fn depth(&self) -> usize {
        1 + self.references.iter().map(|r| r.depth()).max().unwrap_or(0)
    }

    /// Depth-first search of the subtree below this node.
    fn find_below(&self, key: &str) -> Option<&ReferenceNode> {
        find_in(&self.references, key)
    }
}

fn find_in<'a>(nodes: &'a [ReferenceNode], key: &str) -> Option<&'a ReferenceNode> {
    for node in nodes {
        if node.matches(key) {
            return Some(node);
        }
        if let Some(found) = node.find_below(key) {
            return Some(found);
        }
    }
    None
}

/// Reference tree rooted at a resolved component version.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTree {
    /// Record of the root descriptor
    pub root: String,
    pub references: Vec<ReferenceNode>,
}

impl ReferenceTree {
    /// Length of the longest reference chain.
    pub fn depth(&self) -> usize {
        self.references.iter().map(|r| r.depth()).max().unwrap_or(0)
    }

    /// Record of the descriptor at `path`, `None` when no node matches.
    ///
    /// The empty path is the root. A node matches a key by reference name
    /// or component name. The whole path is tried as one key first, so
    /// dotted component names resolve directly. Otherwise the path is split
    /// at `.`: the first segment is searched from the root, each further
    /// segment inside the previous match.
    pub fn find(&self, path: &str) -> Option<&str> {
        let path = path.trim();
        if path.is_empty() {
            return Some(self.root.as_str());
        }
        if let Some(node) = find_in(&self.references, path) {
            return Some(node.record.as_str());
        }

        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = find_in(&self.references, first)?;
        for segment in segments {
            current = current.find_below(segment)?;
        }
        Some(current.record.as_str())
    }

    /// Every node, depth first.
    pub fn nodes(&self) -> Vec<&ReferenceNode> {
        fn walk<'a>(nodes: &'a [ReferenceNode], out: &mut Vec<&'a ReferenceNode>) {
            for node in nodes {
                out.push(node);
                walk(&node.references, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.references, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, component: &str, refs: Vec<ReferenceNode>) -> ReferenceNode {
        ReferenceNode {
            name: name.to_string(),
            component_name: component.to_string(),
            version: "1.0.0".to_string(),
            extra_identity: BTreeMap::new(),
            record: DescriptorStore::record_name(component, "1.0.0", &BTreeMap::new()),
            references: refs,
        }
    }

    fn tree() -> ReferenceTree {
        ReferenceTree {
            root: "root".to_string(),
            references: vec![
                node(
                    "backend",
                    "acme.org/backend",
                    vec![node("db", "acme.org/db", Vec::new())],
                ),
                node("frontend", "acme.org/frontend", Vec::new()),
            ],
        }
    }

    #[test]
    fn test_record_name_is_stable() {
        let extra = BTreeMap::new();
        let a = DescriptorStore::record_name("acme.org/web", "1.0.0+build.1", &extra);
        let b = DescriptorStore::record_name("acme.org/web", "1.0.0+build.1", &extra);
        assert_eq!(a, b);
        assert!(a.starts_with("acme-org-web-1-0-0-build-1-"));
        assert_eq!(a.rsplit('-').next().unwrap().len(), 8);
    }

    #[test]
    fn test_record_name_includes_extra_identity() {
        let mut extra = BTreeMap::new();
        extra.insert("arch".to_string(), "arm64".to_string());
        assert_ne!(
            DescriptorStore::record_name("a", "1", &extra),
            DescriptorStore::record_name("a", "1", &BTreeMap::new())
        );
    }

    #[test]
    fn test_store_records_are_immutable() {
        let store = DescriptorStore::new();
        let first = Arc::new(ComponentDescriptor::new("a", "1"));
        let mut second = ComponentDescriptor::new("a", "1");
        second.component.provider = serde_json::Value::String("other".to_string());

        let record = store.insert(first.clone(), &BTreeMap::new());
        store.insert(Arc::new(second), &BTreeMap::new());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&record).unwrap(), first);
    }

    #[test]
    fn test_depth() {
        assert_eq!(tree().depth(), 2);
        let empty = ReferenceTree {
            root: "root".to_string(),
            references: Vec::new(),
        };
        assert_eq!(empty.depth(), 0);
    }

    #[test]
    fn test_find_root() {
        assert_eq!(tree().find(""), Some("root"));
    }

    #[test]
    fn test_find_anywhere() {
        let tree = tree();
        let db = DescriptorStore::record_name("acme.org/db", "1.0.0", &BTreeMap::new());
        assert_eq!(tree.find("db"), Some(db.as_str()));
        assert_eq!(tree.find("acme.org/db"), Some(db.as_str()));
    }

    #[test]
    fn test_find_dotted_path() {
        let tree = tree();
        let db = DescriptorStore::record_name("acme.org/db", "1.0.0", &BTreeMap::new());
        assert_eq!(tree.find("backend.db"), Some(db.as_str()));
        assert_eq!(tree.find("frontend.db"), None);
    }

    #[test]
    fn test_find_missing() {
        assert_eq!(tree().find("nope"), None);
    }

    #[test]
    fn test_nodes_depth_first() {
        let names: Vec<String> = tree().nodes().iter().map(|n| n.name.clone()).collect();
        assert_eq!(names, vec!["backend", "db", "frontend"]);
    }
}
