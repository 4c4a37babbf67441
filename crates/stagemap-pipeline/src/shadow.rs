//! Shadow metadata zipper.
//!
//! A value tree and a metadata tree are fetched separately and are expected
//! to share one shape. [`zip`] walks both in lock-step, in the same order as
//! [`crate::flatten::flatten`], and maps each value-tree item id to the
//! metadata payload at the same position. When the shapes diverge the walk
//! stops and the entries recorded so far come back with a [`ShadowMismatch`].

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use stagemap_types::NodePath;

use crate::node::{NodeTag, StructuralNode};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a value-tree item was declared. The stock metadata payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Document the item came from (template, file, ...).
    pub origin_path: String,
    /// Item name inside that document.
    #[serde(default)]
    pub local_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchKind {
    Tag { value: NodeTag, metadata: NodeTag },
    ChildCount { value: usize, metadata: usize },
    /// Nested steps present on one side only.
    Steps { value: bool, metadata: bool },
}

/// First position where the two trees disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowMismatch {
    pub path: NodePath,
    #[serde(flatten)]
    pub kind: MismatchKind,
}

impl fmt::Display for ShadowMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MismatchKind::Tag { value, metadata } => write!(
                f,
                "at {}: value is {value}, metadata is {metadata}",
                self.path
            ),
            MismatchKind::ChildCount { value, metadata } => write!(
                f,
                "at {}: value has {value} children, metadata has {metadata}",
                self.path
            ),
            MismatchKind::Steps { value, metadata } => write!(
                f,
                "at {}: steps present in value={value}, metadata={metadata}",
                self.path
            ),
        }
    }
}

/// Result of [`zip`]: every entry up to the first divergence.
#[derive(Debug)]
pub struct ZipOutcome<'m, M> {
    pub entries: IndexMap<String, &'m M>,
    pub mismatch: Option<ShadowMismatch>,
}

impl<'m, M> ZipOutcome<'m, M> {
    pub fn is_complete(&self) -> bool {
        self.mismatch.is_none()
    }

    pub fn get(&self, id: &str) -> Option<&'m M> {
        self.entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'m> ZipOutcome<'m, Provenance> {
    pub fn provenance(&self, id: &str) -> Option<&'m Provenance> {
        self.get(id)
    }
}

/// A value tree with its metadata shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize, M: Serialize",
    deserialize = "V: Deserialize<'de> + Default, M: Deserialize<'de> + Default"
))]
pub struct ShadowPair<V, M = Provenance> {
    pub value: StructuralNode<V>,
    pub metadata: StructuralNode<M>,
}

impl<V, M> ShadowPair<V, M> {
    pub fn new(value: StructuralNode<V>, metadata: StructuralNode<M>) -> Self {
        Self { value, metadata }
    }

    pub fn zip(&self) -> ZipOutcome<'_, M> {
        zip(&self.value, &self.metadata)
    }
}

// ---------------------------------------------------------------------------
// zip
// ---------------------------------------------------------------------------

/// Zip `value` with `metadata`.
///
/// Ids are assumed unique, as [`crate::flatten::flatten`] enforces. A repeated
/// value-tree id keeps its first position and takes the metadata of its last
/// occurrence; each replacement is logged at warn level.
pub fn zip<'m, V, M>(
    value: &StructuralNode<V>,
    metadata: &'m StructuralNode<M>,
) -> ZipOutcome<'m, M> {
    let mut entries = IndexMap::new();
    let mismatch = zip_node(value, metadata, NodePath::root(), &mut entries).err();

    if let Some(m) = &mismatch {
        tracing::warn!(
            path = %m.path,
            matched = entries.len(),
            "Metadata tree diverges from value tree: {m}"
        );
    }

    ZipOutcome { entries, mismatch }
}

fn zip_node<'m, V, M>(
    value: &StructuralNode<V>,
    metadata: &'m StructuralNode<M>,
    path: NodePath,
    entries: &mut IndexMap<String, &'m M>,
) -> Result<(), ShadowMismatch> {
    match (value, metadata) {
        (StructuralNode::Item(v), StructuralNode::Item(m)) => {
            if entries.insert(v.id.clone(), &m.payload).is_some() {
                tracing::warn!(
                    id = %v.id,
                    path = %path,
                    "Duplicate id in value tree, earlier metadata entry replaced"
                );
            }
            match (&v.steps, &m.steps) {
                (Some(vs), Some(ms)) => zip_node(vs, ms, path.child(0), entries),
                (None, None) => Ok(()),
                (vs, ms) => Err(ShadowMismatch {
                    path: path.child(0),
                    kind: MismatchKind::Steps {
                        value: vs.is_some(),
                        metadata: ms.is_some(),
                    },
                }),
            }
        }
        (StructuralNode::Parallel(vc), StructuralNode::Parallel(mc))
        | (
            StructuralNode::Group { children: vc, .. },
            StructuralNode::Group { children: mc, .. },
        ) => {
            for (offset, (v, m)) in vc.iter().zip(mc).enumerate() {
                zip_node(v, m, path.child(offset), entries)?;
            }
            if vc.len() != mc.len() {
                return Err(ShadowMismatch {
                    path: path.child(vc.len().min(mc.len())),
                    kind: MismatchKind::ChildCount {
                        value: vc.len(),
                        metadata: mc.len(),
                    },
                });
            }
            Ok(())
        }
        _ => Err(ShadowMismatch {
            path,
            kind: MismatchKind::Tag {
                value: value.tag(),
                metadata: metadata.tag(),
            },
        }),
    }
}
