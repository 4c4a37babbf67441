//! The structural node model: a recursive tree of stages and steps.
//!
//! A pipeline is a [`StructuralNode`] whose leaves are [`Item`]s. Top-level
//! items are *stages*; a stage may own a nested step structure (`steps`),
//! whose items are *steps*. Containers are either [`StructuralNode::Parallel`]
//! (siblings that run concurrently in the modeled domain) or
//! [`StructuralNode::Group`] (a named container used for display).
//!
//! The serialized shape is externally tagged:
//! `{"item": {...}}`, `{"parallel": [...]}`, `{"group": {"name": .., "children": [..]}}`.

use std::convert::Infallible;
use std::fmt;

use serde::{Deserialize, Serialize};
use stagemap_types::{ExecutionStatus, NodePath, StructureError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(bound(deserialize = "P: Deserialize<'de> + Default"))]
pub enum StructuralNode<P> {
    Item(Item<P>),
    Parallel(Vec<StructuralNode<P>>),
    Group {
        name: String,
        children: Vec<StructuralNode<P>>,
    },
}

/// A stage or step leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de> + Default"))]
pub struct Item<P> {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub payload: P,
    /// Nested execution structure owned by a stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Box<StructuralNode<P>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTag {
    Item,
    Parallel,
    Group,
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeTag::Item => "item",
            NodeTag::Parallel => "parallel",
            NodeTag::Group => "group",
        };
        write!(f, "{name}")
    }
}

/// One node reached during a pre-order walk.
#[derive(Debug)]
pub struct Visit<'a, P> {
    pub node: &'a StructuralNode<P>,
    pub path: NodePath,
    /// Owning stage id when the node sits inside a stage's `steps`.
    pub stage: Option<&'a str>,
    /// Name of the nearest enclosing named group. Reset when descending
    /// into a stage's steps.
    pub group: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

impl<P> Item<P> {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        status: ExecutionStatus,
        payload: P,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            status,
            payload,
            steps: None,
        }
    }

    /// Attach a nested step structure.
    pub fn with_steps(mut self, steps: StructuralNode<P>) -> Self {
        self.steps = Some(Box::new(steps));
        self
    }
}

// ---------------------------------------------------------------------------
// StructuralNode
// ---------------------------------------------------------------------------

impl<P> StructuralNode<P> {
    pub fn item(item: Item<P>) -> Self {
        StructuralNode::Item(item)
    }

    pub fn parallel(children: Vec<StructuralNode<P>>) -> Result<Self, StructureError> {
        if children.is_empty() {
            return Err(StructureError::EmptyGroup {
                path: NodePath::root(),
            });
        }
        Ok(StructuralNode::Parallel(children))
    }

    pub fn group(
        name: impl Into<String>,
        children: Vec<StructuralNode<P>>,
    ) -> Result<Self, StructureError> {
        if children.is_empty() {
            return Err(StructureError::EmptyGroup {
                path: NodePath::root(),
            });
        }
        Ok(StructuralNode::Group {
            name: name.into(),
            children,
        })
    }

    pub fn tag(&self) -> NodeTag {
        match self {
            StructuralNode::Item(_) => NodeTag::Item,
            StructuralNode::Parallel(_) => NodeTag::Parallel,
            StructuralNode::Group { .. } => NodeTag::Group,
        }
    }

    /// Direct children of a container; empty for items.
    pub fn children(&self) -> &[StructuralNode<P>] {
        match self {
            StructuralNode::Item(_) => &[],
            StructuralNode::Parallel(children) | StructuralNode::Group { children, .. } => {
                children
            }
        }
    }

    /// Pre-order walk over every node, stopping at the first `Err`.
    ///
    /// Items are visited before their `steps`; container children are
    /// visited in their given order. No structural validation happens here.
    pub fn try_walk<'a, E>(
        &'a self,
        visitor: &mut dyn FnMut(Visit<'a, P>) -> Result<(), E>,
    ) -> Result<(), E> {
        self.walk_inner(NodePath::root(), None, None, visitor)
    }

    pub fn walk<'a>(&'a self, visitor: &mut dyn FnMut(Visit<'a, P>)) {
        let result: Result<(), Infallible> = self.try_walk(&mut |visit| {
            visitor(visit);
            Ok(())
        });
        match result {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    /// Pre-order walk over items only.
    pub fn walk_items<'a>(&'a self, visitor: &mut dyn FnMut(&'a Item<P>, &Visit<'a, P>)) {
        self.walk(&mut |visit| {
            if let StructuralNode::Item(item) = visit.node {
                visitor(item, &visit);
            }
        });
    }

    fn walk_inner<'a, E>(
        &'a self,
        path: NodePath,
        stage: Option<&'a str>,
        group: Option<&'a str>,
        visitor: &mut dyn FnMut(Visit<'a, P>) -> Result<(), E>,
    ) -> Result<(), E> {
        visitor(Visit {
            node: self,
            path: path.clone(),
            stage,
            group,
        })?;

        match self {
            StructuralNode::Item(item) => {
                if let Some(steps) = &item.steps {
                    // Only top-level items own steps; nested items keep their stage.
                    let owner = stage.or(Some(item.id.as_str()));
                    steps.walk_inner(path.child(0), owner, None, visitor)?;
                }
            }
            StructuralNode::Parallel(children) => {
                for (offset, child) in children.iter().enumerate() {
                    child.walk_inner(path.child(offset), stage, group, visitor)?;
                }
            }
            StructuralNode::Group { name, children } => {
                for (offset, child) in children.iter().enumerate() {
                    child.walk_inner(path.child(offset), stage, Some(name.as_str()), visitor)?;
                }
            }
        }
        Ok(())
    }

    pub fn item_count(&self) -> usize {
        let mut count = 0;
        self.walk_items(&mut |_, _| count += 1);
        count
    }

    pub fn find_item(&self, id: &str) -> Option<&Item<P>> {
        match self {
            StructuralNode::Item(item) => {
                if item.id == id {
                    return Some(item);
                }
                item.steps.as_deref().and_then(|steps| steps.find_item(id))
            }
            StructuralNode::Parallel(children) | StructuralNode::Group { children, .. } => {
                children.iter().find_map(|child| child.find_item(id))
            }
        }
    }

    pub fn find_item_mut(&mut self, id: &str) -> Option<&mut Item<P>> {
        match self {
            StructuralNode::Item(item) => {
                if item.id == id {
                    return Some(item);
                }
                item.steps
                    .as_deref_mut()
                    .and_then(|steps| steps.find_item_mut(id))
            }
            StructuralNode::Parallel(children) | StructuralNode::Group { children, .. } => {
                children.iter_mut().find_map(|child| child.find_item_mut(id))
            }
        }
    }

    /// Same shape, new payloads. Used to derive a shadow tree from a value tree.
    pub fn map_payload<Q>(&self, f: &mut dyn FnMut(&Item<P>) -> Q) -> StructuralNode<Q> {
        match self {
            StructuralNode::Item(item) => StructuralNode::Item(Item {
                id: item.id.clone(),
                label: item.label.clone(),
                status: item.status,
                payload: f(item),
                steps: item
                    .steps
                    .as_deref()
                    .map(|steps| Box::new(steps.map_payload(&mut *f))),
            }),
            StructuralNode::Parallel(children) => StructuralNode::Parallel(
                children.iter().map(|child| child.map_payload(&mut *f)).collect(),
            ),
            StructuralNode::Group { name, children } => StructuralNode::Group {
                name: name.clone(),
                children: children.iter().map(|child| child.map_payload(&mut *f)).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(id: &str, status: ExecutionStatus) -> StructuralNode<()> {
        StructuralNode::item(Item::new(id, id.to_uppercase(), status, ()))
    }

    fn sample() -> StructuralNode<()> {
        let build = Item::new("build", "Build", ExecutionStatus::Success, ()).with_steps(
            StructuralNode::parallel(vec![
                leaf("compile", ExecutionStatus::Success),
                leaf("lint", ExecutionStatus::Failed),
            ])
            .unwrap(),
        );
        StructuralNode::group(
            "ci",
            vec![
                StructuralNode::item(build),
                leaf("deploy", ExecutionStatus::NotStarted),
            ],
        )
        .unwrap()
    }

    #[test]
    fn empty_parallel_rejected() {
        let err = StructuralNode::<()>::parallel(vec![]).unwrap_err();
        assert!(matches!(err, StructureError::EmptyGroup { .. }));
    }

    #[test]
    fn empty_group_rejected() {
        let err = StructuralNode::<()>::group("g", vec![]).unwrap_err();
        assert!(matches!(err, StructureError::EmptyGroup { .. }));
    }

    #[test]
    fn walk_is_preorder_with_stage_and_group_context() {
        let tree = sample();
        let mut seen = Vec::new();
        tree.walk(&mut |visit| {
            if let StructuralNode::Item(item) = visit.node {
                seen.push((
                    item.id.clone(),
                    visit.path.to_string(),
                    visit.stage.map(String::from),
                    visit.group.map(String::from),
                ));
            }
        });

        assert_eq!(
            seen,
            vec![
                ("build".into(), "0".into(), None, Some("ci".into())),
                ("compile".into(), "0.0.0".into(), Some("build".into()), None),
                ("lint".into(), "0.0.1".into(), Some("build".into()), None),
                ("deploy".into(), "1".into(), None, Some("ci".into())),
            ]
        );
    }

    #[test]
    fn try_walk_stops_at_first_error() {
        let tree = sample();
        let mut visited = 0;
        let result: Result<(), String> = tree.try_walk(&mut |visit| {
            visited += 1;
            match visit.node {
                StructuralNode::Item(item) if item.id == "compile" => Err(item.id.clone()),
                _ => Ok(()),
            }
        });
        assert_eq!(result, Err("compile".to_string()));
        // group, build, parallel, compile
        assert_eq!(visited, 4);
    }

    #[test]
    fn deserialize_externally_tagged_shape() {
        let tree: StructuralNode<serde_json::Value> = serde_json::from_value(json!({
            "group": {
                "name": "release",
                "children": [
                    {"item": {"id": "s1", "label": "Build", "status": "success"}},
                    {"item": {
                        "id": "s2",
                        "label": "Deploy",
                        "status": "running",
                        "steps": {"parallel": [
                            {"item": {"id": "st1", "status": "success"}},
                            {"item": {"id": "st2"}}
                        ]}
                    }}
                ]
            }
        }))
        .unwrap();

        assert_eq!(tree.tag(), NodeTag::Group);
        assert_eq!(tree.item_count(), 4);
        let st2 = tree.find_item("st2").unwrap();
        assert_eq!(st2.status, ExecutionStatus::NotStarted);
        assert_eq!(st2.payload, serde_json::Value::Null);
    }

    #[test]
    fn find_item_mut_edits_nested_step() {
        let mut tree = sample();
        tree.find_item_mut("lint").unwrap().status = ExecutionStatus::Success;
        assert_eq!(tree.find_item("lint").unwrap().status, ExecutionStatus::Success);
        assert!(tree.find_item("missing").is_none());
    }

    #[test]
    fn map_payload_preserves_shape() {
        let tree = sample();
        let mapped = tree.map_payload(&mut |item| format!("src/{}.yaml", item.id));
        assert_eq!(mapped.item_count(), tree.item_count());
        assert_eq!(mapped.find_item("lint").unwrap().payload, "src/lint.yaml");
        assert_eq!(mapped.children().len(), 2);
    }

    #[test]
    fn node_tag_display() {
        assert_eq!(NodeTag::Parallel.to_string(), "parallel");
        assert_eq!(leaf("x", ExecutionStatus::Running).tag(), NodeTag::Item);
    }
}
