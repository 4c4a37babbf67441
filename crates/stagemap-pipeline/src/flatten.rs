//! Flattening and indexing: turns a pipeline tree into linearly ordered,
//! id-addressable positions.
//!
//! Everything here is a pure function of the tree it is given. Nothing is
//! cached across calls; a [`PipelineIndex`] is only valid for the snapshot
//! it was built from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stagemap_types::{NodePath, StructureError};

use crate::node::{Item, StructuralNode};
use crate::stage::VariableScope;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Position of one item in traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub path: NodePath,
    pub depth: usize,
    /// Nearest enclosing named group, for display grouping.
    pub group: Option<String>,
    /// Owning stage for steps; `None` for stages.
    pub parent_stage_id: Option<String>,
}

impl IndexEntry {
    pub fn is_stage(&self) -> bool {
        self.parent_stage_id.is_none()
    }

    /// The stage this entry belongs to (itself, for a stage).
    pub fn stage_id(&self) -> &str {
        self.parent_stage_id.as_deref().unwrap_or(&self.id)
    }
}

/// A flattened item together with its index entry.
#[derive(Debug)]
pub struct FlatEntry<'a, P> {
    pub item: &'a Item<P>,
    pub index: IndexEntry,
}

// No `P: Clone` bound.
impl<P> Clone for FlatEntry<'_, P> {
    fn clone(&self) -> Self {
        Self {
            item: self.item,
            index: self.index.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// flatten
// ---------------------------------------------------------------------------

/// Depth-first, left-to-right list of every item, stages before their steps.
///
/// Fails with `EmptyGroup` on the first empty container and with
/// `DuplicateId` on the first repeated id, both in traversal order.
pub fn flatten<P>(tree: &StructuralNode<P>) -> Result<Vec<FlatEntry<'_, P>>, StructureError> {
    let mut entries = Vec::new();
    let mut seen: HashMap<&str, NodePath> = HashMap::new();

    tree.try_walk(&mut |visit| {
        match visit.node {
            StructuralNode::Item(item) => {
                if let Some(first) = seen.get(item.id.as_str()) {
                    return Err(StructureError::DuplicateId {
                        id: item.id.clone(),
                        first: first.clone(),
                        second: visit.path,
                    });
                }
                seen.insert(item.id.as_str(), visit.path.clone());
                entries.push(FlatEntry {
                    item,
                    index: IndexEntry {
                        id: item.id.clone(),
                        depth: visit.path.depth(),
                        path: visit.path,
                        group: visit.group.map(String::from),
                        parent_stage_id: visit.stage.map(String::from),
                    },
                });
            }
            StructuralNode::Parallel(children) | StructuralNode::Group { children, .. } => {
                if children.is_empty() {
                    return Err(StructureError::EmptyGroup { path: visit.path });
                }
            }
        }
        Ok(())
    })?;

    Ok(entries)
}

// ---------------------------------------------------------------------------
// PipelineIndex
// ---------------------------------------------------------------------------

/// One flatten plus an id lookup table, for callers doing several lookups
/// against the same snapshot.
#[derive(Debug, Clone)]
pub struct PipelineIndex<'a, P> {
    entries: Vec<FlatEntry<'a, P>>,
    positions: HashMap<String, usize>,
}

impl<'a, P> PipelineIndex<'a, P> {
    pub fn build(tree: &'a StructuralNode<P>) -> Result<Self, StructureError> {
        let entries = flatten(tree)?;
        let positions = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.index.id.clone(), pos))
            .collect();
        Ok(Self { entries, positions })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FlatEntry<'a, P>] {
        &self.entries
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&FlatEntry<'a, P>> {
        self.position(id).map(|pos| &self.entries[pos])
    }

    pub fn require(&self, id: &str) -> Result<&FlatEntry<'a, P>, StructureError> {
        self.get(id).ok_or_else(|| StructureError::not_found(id))
    }

    pub fn stages(&self) -> impl Iterator<Item = &FlatEntry<'a, P>> {
        self.entries.iter().filter(|e| e.index.is_stage())
    }

    pub fn steps_of<'s>(
        &'s self,
        stage_id: &'s str,
    ) -> impl Iterator<Item = &'s FlatEntry<'a, P>> {
        self.entries
            .iter()
            .filter(move |e| e.index.parent_stage_id.as_deref() == Some(stage_id))
    }

    /// The entry after `id` in traversal order.
    pub fn next(&self, id: &str) -> Option<&FlatEntry<'a, P>> {
        self.position(id).and_then(|pos| self.entries.get(pos + 1))
    }

    /// The entry before `id` in traversal order.
    pub fn previous(&self, id: &str) -> Option<&FlatEntry<'a, P>> {
        self.position(id)
            .and_then(|pos| pos.checked_sub(1))
            .map(|pos| &self.entries[pos])
    }
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Position of `id`, or `NotFound`.
pub fn index_of<P>(tree: &StructuralNode<P>, id: &str) -> Result<IndexEntry, StructureError> {
    let index = PipelineIndex::build(tree)?;
    Ok(index.require(id)?.index.clone())
}

/// Id of the stage owning `id`. A stage maps to itself.
pub fn nearest_enclosing_stage<P>(
    tree: &StructuralNode<P>,
    id: &str,
) -> Result<String, StructureError> {
    let entry = index_of(tree, id)?;
    Ok(entry.stage_id().to_string())
}

/// Position of the stage that `child_stage_id` propagates from.
///
/// `Ok(None)` when the child declares no propagation, or when the
/// referenced id is gone, names a step, or names the child itself. Those
/// are ordinary states while a document is being edited.
pub fn parent_stage_path<P: VariableScope>(
    pipeline: &StructuralNode<P>,
    child_stage_id: &str,
) -> Result<Option<IndexEntry>, StructureError> {
    let index = PipelineIndex::build(pipeline)?;
    Ok(index.parent_stage(child_stage_id)?.map(|e| e.index.clone()))
}

impl<'a, P: VariableScope> PipelineIndex<'a, P> {
    /// See [`parent_stage_path`].
    pub fn parent_stage(
        &self,
        child_stage_id: &str,
    ) -> Result<Option<&FlatEntry<'a, P>>, StructureError> {
        let child = self.require(child_stage_id)?;

        let Some(parent_id) = child.item.payload.propagate_from() else {
            return Ok(None);
        };

        if parent_id == child_stage_id {
            tracing::debug!(stage = %child_stage_id, "Stage propagates from itself, ignoring");
            return Ok(None);
        }

        match self.get(parent_id) {
            Some(parent) if parent.index.is_stage() => Ok(Some(parent)),
            Some(_) => {
                tracing::debug!(
                    stage = %child_stage_id,
                    parent = %parent_id,
                    "Propagation target is a step"
                );
                Ok(None)
            }
            None => {
                tracing::debug!(
                    stage = %child_stage_id,
                    parent = %parent_id,
                    "Propagation target no longer exists"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageSpec;
    use stagemap_types::ExecutionStatus;

    fn stage(id: &str, spec: StageSpec) -> StructuralNode<StageSpec> {
        StructuralNode::item(Item::new(id, id, ExecutionStatus::Success, spec))
    }

    fn step(id: &str) -> StructuralNode<StageSpec> {
        StructuralNode::item(Item::new(id, id, ExecutionStatus::Running, StageSpec::default()))
    }

    fn staged(
        id: &str,
        spec: StageSpec,
        steps: StructuralNode<StageSpec>,
    ) -> StructuralNode<StageSpec> {
        StructuralNode::item(Item::new(id, id, ExecutionStatus::Success, spec).with_steps(steps))
    }

    /// group "release" [ s1 { parallel [st1, st2] }, parallel [ s2, s3 ] ]
    fn pipeline() -> StructuralNode<StageSpec> {
        StructuralNode::group(
            "release",
            vec![
                staged(
                    "s1",
                    StageSpec::default(),
                    StructuralNode::parallel(vec![step("st1"), step("st2")]).unwrap(),
                ),
                StructuralNode::parallel(vec![
                    stage("s2", StageSpec::propagating_from("s1")),
                    stage("s3", StageSpec::propagating_from("st1")),
                ])
                .unwrap(),
            ],
        )
        .unwrap()
    }

    fn ids<P>(entries: &[FlatEntry<'_, P>]) -> Vec<String> {
        entries.iter().map(|e| e.index.id.clone()).collect()
    }

    #[test]
    fn flatten_orders_stage_before_steps() {
        let tree = pipeline();
        let entries = flatten(&tree).unwrap();
        assert_eq!(ids(&entries), vec!["s1", "st1", "st2", "s2", "s3"]);

        let paths: Vec<String> = entries.iter().map(|e| e.index.path.to_string()).collect();
        assert_eq!(paths, vec!["0", "0.0.0", "0.0.1", "1.0", "1.1"]);
    }

    #[test]
    fn flatten_paths_strictly_increase() {
        let tree = pipeline();
        let entries = flatten(&tree).unwrap();
        for pair in entries.windows(2) {
            assert!(pair[0].index.path < pair[1].index.path);
        }
    }

    #[test]
    fn flatten_attaches_group_and_parent_stage() {
        let tree = pipeline();
        let entries = flatten(&tree).unwrap();

        let s2 = &entries[3].index;
        assert_eq!(s2.group.as_deref(), Some("release"));
        assert!(s2.is_stage());
        assert_eq!(s2.depth, 2);

        let st2 = &entries[2].index;
        assert_eq!(st2.parent_stage_id.as_deref(), Some("s1"));
        assert_eq!(st2.group, None);
        assert_eq!(st2.stage_id(), "s1");
    }

    #[test]
    fn flatten_rejects_duplicate_ids() {
        let tree = StructuralNode::parallel(vec![step("a"), step("b"), step("a")]).unwrap();
        let err = flatten(&tree).unwrap_err();
        assert_eq!(
            err,
            StructureError::DuplicateId {
                id: "a".into(),
                first: NodePath::from(vec![0]),
                second: NodePath::from(vec![2]),
            }
        );
    }

    #[test]
    fn flatten_rejects_empty_group_from_document() {
        let tree: StructuralNode<StageSpec> = StructuralNode::Parallel(vec![
            step("a"),
            StructuralNode::Group {
                name: "hollow".into(),
                children: vec![],
            },
        ]);
        let err = flatten(&tree).unwrap_err();
        assert!(matches!(
            err,
            StructureError::EmptyGroup { path } if path == NodePath::from(vec![1])
        ));
    }

    #[test]
    fn single_item_root_has_root_path() {
        let tree = stage("only", StageSpec::default());
        let entry = index_of(&tree, "only").unwrap();
        assert!(entry.path.is_root());
        assert_eq!(entry.depth, 0);
    }

    #[test]
    fn index_of_missing_is_not_found() {
        let tree = pipeline();
        let err = index_of(&tree, "nope").unwrap_err();
        assert_eq!(err, StructureError::not_found("nope"));
    }

    #[test]
    fn nearest_stage_for_step_and_stage() {
        let tree = pipeline();
        assert_eq!(nearest_enclosing_stage(&tree, "st2").unwrap(), "s1");
        assert_eq!(nearest_enclosing_stage(&tree, "s3").unwrap(), "s3");
    }

    #[test]
    fn nested_step_structures_keep_owning_stage() {
        let inner = StructuralNode::item(
            Item::new("grp_step", "Group step", ExecutionStatus::Running, StageSpec::default())
                .with_steps(StructuralNode::parallel(vec![step("leaf")]).unwrap()),
        );
        let tree = staged("outer", StageSpec::default(), inner);
        assert_eq!(nearest_enclosing_stage(&tree, "leaf").unwrap(), "outer");
        assert_eq!(index_of(&tree, "leaf").unwrap().path, NodePath::from(vec![0, 0, 0]));
    }

    #[test]
    fn parent_stage_path_resolves_stage() {
        let tree = pipeline();
        let parent = parent_stage_path(&tree, "s2").unwrap().unwrap();
        assert_eq!(parent.id, "s1");
        assert_eq!(parent.path, NodePath::from(vec![0]));
    }

    #[test]
    fn parent_stage_path_ignores_step_target() {
        let tree = pipeline();
        assert_eq!(parent_stage_path(&tree, "s3").unwrap(), None);
    }

    #[test]
    fn parent_stage_path_without_propagation() {
        let tree = pipeline();
        assert_eq!(parent_stage_path(&tree, "s1").unwrap(), None);
    }

    #[test]
    fn parent_stage_path_missing_target_is_none() {
        let tree =
            StructuralNode::parallel(vec![stage("s2", StageSpec::propagating_from("deleted"))])
                .unwrap();
        assert_eq!(parent_stage_path(&tree, "s2").unwrap(), None);
    }

    #[test]
    fn parent_stage_path_self_reference_is_none() {
        let tree =
            StructuralNode::parallel(vec![stage("s2", StageSpec::propagating_from("s2"))]).unwrap();
        assert_eq!(parent_stage_path(&tree, "s2").unwrap(), None);
    }

    #[test]
    fn parent_stage_path_missing_child_is_error() {
        let tree = pipeline();
        assert!(parent_stage_path(&tree, "ghost").is_err());
    }

    #[test]
    fn index_navigation() {
        let tree = pipeline();
        let index = PipelineIndex::build(&tree).unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(index.next("st2").unwrap().index.id, "s2");
        assert_eq!(index.previous("s2").unwrap().index.id, "st2");
        assert!(index.previous("s1").is_none());
        assert!(index.next("s3").is_none());
        assert!(index.next("ghost").is_none());

        let stages: Vec<_> = index.stages().map(|e| e.index.id.as_str()).collect();
        assert_eq!(stages, vec!["s1", "s2", "s3"]);
        let steps: Vec<_> = index.steps_of("s1").map(|e| e.index.id.as_str()).collect();
        assert_eq!(steps, vec!["st1", "st2"]);
    }
}
