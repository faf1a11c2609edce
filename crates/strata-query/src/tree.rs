//! Hierarchical tree reconstruction from flat records carrying a delimited
//! path field.

use crate::error::{Result, StoreError};
use crate::types::{Record, RecordId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Reserved key carrying the owning record's identifier on leaf nodes
pub const LEAF_ID_KEY: &str = "__id";

/// One node of the reconstructed tree
///
/// Serializes as a nested object keyed by path segment, with the reserved
/// `__id` entry on nodes where a record's path terminates. A node can be
/// both internal and a leaf: a record whose path is a strict prefix of
/// another's still marks its own node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeNode {
    #[serde(rename = "__id", skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    #[serde(flatten)]
    pub children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    /// Child lookup by segment
    pub fn child(&self, segment: &str) -> Option<&TreeNode> {
        self.children.get(segment)
    }

    /// Whether any record's path terminates at this node
    pub fn is_leaf(&self) -> bool {
        self.record_id.is_some()
    }
}

/// Builds a [`TreeNode`] from records whose hierarchy is encoded as
/// delimiter-joined path strings.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    pub path_field: String,
    pub id_field: String,
    pub delimiter: String,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            path_field: "path".to_string(),
            id_field: "id".to_string(),
            delimiter: ">>".to_string(),
        }
    }
}

impl TreeBuilder {
    pub fn new(
        path_field: impl Into<String>,
        id_field: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Self {
        Self {
            path_field: path_field.into(),
            id_field: id_field.into(),
            delimiter: delimiter.into(),
        }
    }

    /// Build the tree, optionally restricted to paths under `root`
    ///
    /// Sibling segments with the same name are unified into one node, so
    /// feeding the same records twice is idempotent. Records missing the
    /// path field fail with `SchemaMismatch`.
    pub fn build(&self, records: &[Record], root: Option<&str>) -> Result<TreeNode> {
        let mut tree = TreeNode::default();

        for record in records {
            let path = record
                .get(&self.path_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    StoreError::schema_mismatch(format!(
                        "record has no '{}' path field",
                        self.path_field
                    ))
                })?;

            if let Some(root) = root {
                if !path.starts_with(root) {
                    continue;
                }
            }

            let mut node = &mut tree;
            for segment in path.split(self.delimiter.as_str()).filter(|s| !s.is_empty()) {
                node = node.children.entry(segment.to_string()).or_default();
            }

            if let Some(id) = record.get(&self.id_field).and_then(RecordId::from_value) {
                node.record_id = Some(id);
            }
        }

        Ok(tree)
    }
}
