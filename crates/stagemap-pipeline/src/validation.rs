//! Pipeline validation: lint rules and diagnostics.
//!
//! Provides 9 built-in rules that check structural integrity and the
//! propagation/override-set configuration of a pipeline tree. Call
//! [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail on
//! any `Error`-severity issue.
//!
//! Rules run over a [`LintContext`], a flat summary of the tree collected in
//! one walk, so they never need to know the payload type.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use stagemap_types::NodePath;

use crate::node::StructuralNode;
use crate::stage::VariableScope;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub path: Option<NodePath>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// Lint context
// ---------------------------------------------------------------------------

/// What the rules need to know about one item.
#[derive(Debug, Clone)]
pub struct ItemFacts {
    pub id: String,
    pub path: NodePath,
    /// Owning stage for steps.
    pub stage: Option<String>,
    pub propagate_from: Option<String>,
    pub variable_names: Vec<String>,
    /// `(identifier, variable names)` per override set, in declaration order.
    pub override_sets: Vec<(String, Vec<String>)>,
}

impl ItemFacts {
    pub fn is_stage(&self) -> bool {
        self.stage.is_none()
    }
}

/// Flat view of a pipeline. Unlike flattening, collecting it never fails:
/// duplicates and empty groups are recorded for the rules to report.
#[derive(Debug, Clone, Default)]
pub struct LintContext {
    /// Every item in traversal order, duplicates included.
    pub items: Vec<ItemFacts>,
    pub empty_groups: Vec<NodePath>,
}

impl LintContext {
    pub fn collect<P: VariableScope>(pipeline: &StructuralNode<P>) -> Self {
        let mut ctx = LintContext::default();
        pipeline.walk(&mut |visit| match visit.node {
            StructuralNode::Item(item) => {
                let scope = &item.payload;
                ctx.items.push(ItemFacts {
                    id: item.id.clone(),
                    path: visit.path,
                    stage: visit.stage.map(String::from),
                    propagate_from: scope.propagate_from().map(String::from),
                    variable_names: scope.variables().iter().map(|v| v.name.clone()).collect(),
                    override_sets: scope
                        .override_sets()
                        .iter()
                        .map(|set| {
                            let names = set.variables.iter().map(|v| v.name.clone()).collect();
                            (set.identifier.clone(), names)
                        })
                        .collect(),
                });
            }
            StructuralNode::Parallel(children) | StructuralNode::Group { children, .. } => {
                if children.is_empty() {
                    ctx.empty_groups.push(visit.path);
                }
            }
        });
        ctx
    }

    /// First item with `id`, with its traversal position.
    fn find(&self, id: &str) -> Option<(usize, &ItemFacts)> {
        self.items.iter().enumerate().find(|(_, item)| item.id == id)
    }

    fn stages(&self) -> impl Iterator<Item = (usize, &ItemFacts)> {
        self.items.iter().enumerate().filter(|(_, item)| item.is_stage())
    }

    /// Stages whose propagation points at some other existing stage.
    fn propagating_stages(&self) -> impl Iterator<Item = (usize, &ItemFacts, usize, &ItemFacts)> {
        self.stages().filter_map(move |(pos, stage)| {
            let target_id = stage.propagate_from.as_deref()?;
            if target_id == stage.id {
                return None;
            }
            let (target_pos, target) = self.find(target_id)?;
            target.is_stage().then_some((pos, stage, target_pos, target))
        })
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic>;
}

fn diagnostic(
    rule: &dyn LintRule,
    severity: Severity,
    item: &ItemFacts,
    message: String,
) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity,
        message,
        node_id: Some(item.id.clone()),
        path: Some(item.path.clone()),
        fix: None,
    }
}

/// Names that occur more than once, in first-occurrence order.
fn repeated<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut repeated = Vec::new();
    for name in names {
        if !seen.insert(name) && !repeated.contains(&name) {
            repeated.push(name);
        }
    }
    repeated
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct UniqueIdsRule;
impl LintRule for UniqueIdsRule {
    fn name(&self) -> &str { "unique_ids" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let mut first_seen: HashMap<&str, &NodePath> = HashMap::new();
        let mut diags = Vec::new();
        for item in &ctx.items {
            match first_seen.get(item.id.as_str()) {
                Some(first) => diags.push(Diagnostic {
                    fix: Some(format!("Rename one of the nodes called '{}'", item.id)),
                    ..diagnostic(
                        self,
                        Severity::Error,
                        item,
                        format!("Node id '{}' at {} already used at {}", item.id, item.path, first),
                    )
                }),
                None => {
                    first_seen.insert(&item.id, &item.path);
                }
            }
        }
        diags
    }
}

struct NonEmptyGroupsRule;
impl LintRule for NonEmptyGroupsRule {
    fn name(&self) -> &str { "non_empty_groups" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        ctx.empty_groups
            .iter()
            .map(|path| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Group at {path} has no children"),
                node_id: None,
                path: Some(path.clone()),
                fix: Some("Remove the group or add a stage to it".into()),
            })
            .collect()
    }
}

struct SelfPropagationRule;
impl LintRule for SelfPropagationRule {
    fn name(&self) -> &str { "self_propagation" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        ctx.stages()
            .filter(|(_, stage)| stage.propagate_from.as_deref() == Some(stage.id.as_str()))
            .map(|(_, stage)| Diagnostic {
                fix: Some("Point propagate_from at another stage or remove it".into()),
                ..diagnostic(
                    self,
                    Severity::Error,
                    stage,
                    format!("Stage '{}' propagates from itself", stage.id),
                )
            })
            .collect()
    }
}

struct PropagationTargetExistsRule;
impl LintRule for PropagationTargetExistsRule {
    fn name(&self) -> &str { "propagation_target_exists" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        ctx.stages()
            .filter_map(|(_, stage)| {
                let target = stage.propagate_from.as_deref()?;
                if ctx.find(target).is_some() {
                    return None;
                }
                Some(diagnostic(
                    self,
                    Severity::Warning,
                    stage,
                    format!(
                        "Stage '{}' propagates from '{}', which does not exist; \
                         its variables resolve empty",
                        stage.id, target
                    ),
                ))
            })
            .collect()
    }
}

struct PropagationTargetIsStageRule;
impl LintRule for PropagationTargetIsStageRule {
    fn name(&self) -> &str { "propagation_target_is_stage" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        ctx.stages()
            .filter_map(|(_, stage)| {
                let target_id = stage.propagate_from.as_deref()?;
                let (_, target) = ctx.find(target_id)?;
                if target.is_stage() {
                    return None;
                }
                Some(Diagnostic {
                    fix: target
                        .stage
                        .as_ref()
                        .map(|owner| format!("Propagate from stage '{owner}' instead")),
                    ..diagnostic(
                        self,
                        Severity::Warning,
                        stage,
                        format!("Stage '{}' propagates from step '{}'", stage.id, target_id),
                    )
                })
            })
            .collect()
    }
}

struct PropagationFromEarlierStageRule;
impl LintRule for PropagationFromEarlierStageRule {
    fn name(&self) -> &str { "propagation_from_earlier_stage" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        ctx.propagating_stages()
            .filter(|(pos, _, target_pos, _)| target_pos > pos)
            .map(|(_, stage, _, target)| {
                diagnostic(
                    self,
                    Severity::Warning,
                    stage,
                    format!(
                        "Stage '{}' propagates from '{}', which comes after it",
                        stage.id, target.id
                    ),
                )
            })
            .collect()
    }
}

struct ChainedPropagationRule;
impl LintRule for ChainedPropagationRule {
    fn name(&self) -> &str { "chained_propagation" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        ctx.propagating_stages()
            .filter_map(|(_, stage, _, target)| {
                let next = target.propagate_from.as_deref()?;
                Some(Diagnostic {
                    fix: Some(format!("Propagate from '{next}' directly")),
                    ..diagnostic(
                        self,
                        Severity::Warning,
                        stage,
                        format!(
                            "Stage '{}' propagates from '{}', which itself propagates \
                             from '{}'; only one hop is followed",
                            stage.id, target.id, next
                        ),
                    )
                })
            })
            .collect()
    }
}

struct UniqueOverrideSetIdsRule;
impl LintRule for UniqueOverrideSetIdsRule {
    fn name(&self) -> &str { "unique_override_set_ids" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for item in &ctx.items {
            for identifier in repeated(item.override_sets.iter().map(|(id, _)| id.as_str())) {
                diags.push(diagnostic(
                    self,
                    Severity::Warning,
                    item,
                    format!(
                        "Node '{}' declares override set '{}' more than once; \
                         only the first is used",
                        item.id, identifier
                    ),
                ));
            }
        }
        diags
    }
}

struct DuplicateVariableNamesRule;
impl LintRule for DuplicateVariableNamesRule {
    fn name(&self) -> &str { "duplicate_variable_names" }
    fn apply(&self, ctx: &LintContext) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for item in &ctx.items {
            let sets = std::iter::once(("default", &item.variable_names))
                .chain(item.override_sets.iter().map(|(id, names)| (id.as_str(), names)));
            for (set, names) in sets {
                for name in repeated(names.iter().map(String::as_str)) {
                    diags.push(diagnostic(
                        self,
                        Severity::Info,
                        item,
                        format!(
                            "Variable '{}' repeats in set '{}' of '{}'; the last value wins",
                            name, set, item.id
                        ),
                    ));
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate<P: VariableScope>(pipeline: &StructuralNode<P>) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(UniqueIdsRule),
        Box::new(NonEmptyGroupsRule),
        Box::new(SelfPropagationRule),
        Box::new(PropagationTargetExistsRule),
        Box::new(PropagationTargetIsStageRule),
        Box::new(PropagationFromEarlierStageRule),
        Box::new(ChainedPropagationRule),
        Box::new(UniqueOverrideSetIdsRule),
        Box::new(DuplicateVariableNamesRule),
    ];

    let ctx = LintContext::collect(pipeline);
    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(&ctx));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise<P: VariableScope>(
    pipeline: &StructuralNode<P>,
) -> stagemap_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(pipeline);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(stagemap_types::StagemapError::ValidationError(
            messages.join("; "),
        ));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageSpec;
    use serde_json::json;

    fn parse_pipeline(value: serde_json::Value) -> StructuralNode<StageSpec> {
        serde_json::from_value(value).unwrap()
    }

    fn rule_hits<'a>(diags: &'a [Diagnostic], rule: &str) -> Vec<&'a Diagnostic> {
        diags.iter().filter(|d| d.rule == rule).collect()
    }

    #[test]
    fn valid_pipeline_passes() {
        let pipeline = parse_pipeline(json!({"parallel": [
            {"item": {"id": "s1", "status": "success", "payload": {
                "variables": [{"name": "region", "value": "us-east"}]
            }}},
            {"item": {"id": "s2", "payload": {"propagate_from": "s1"}}}
        ]}));
        let diags = validate(&pipeline);
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
    }

    #[test]
    fn duplicate_id_error() {
        let pipeline = parse_pipeline(json!({"parallel": [
            {"item": {"id": "s1"}},
            {"item": {"id": "s1"}}
        ]}));
        let diags = validate(&pipeline);
        let hits = rule_hits(&diags, "unique_ids");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, Severity::Error);
        assert_eq!(hits[0].path, Some(NodePath::from(vec![1])));
    }

    #[test]
    fn empty_group_error() {
        let pipeline = parse_pipeline(json!({"group": {"name": "g", "children": [
            {"item": {"id": "s1"}},
            {"parallel": []}
        ]}}));
        let diags = validate(&pipeline);
        let hits = rule_hits(&diags, "non_empty_groups");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, Some(NodePath::from(vec![1])));
    }

    #[test]
    fn self_propagation_error() {
        let pipeline =
            parse_pipeline(json!({"item": {"id": "s1", "payload": {"propagate_from": "s1"}}}));
        let diags = validate(&pipeline);
        assert_eq!(rule_hits(&diags, "self_propagation").len(), 1);
        assert!(rule_hits(&diags, "propagation_target_exists").is_empty());
    }

    #[test]
    fn missing_target_warning() {
        let pipeline =
            parse_pipeline(json!({"item": {"id": "s2", "payload": {"propagate_from": "gone"}}}));
        let diags = validate(&pipeline);
        let hits = rule_hits(&diags, "propagation_target_exists");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, Severity::Warning);
        assert_eq!(hits[0].node_id.as_deref(), Some("s2"));
    }

    #[test]
    fn step_target_warning_suggests_owner() {
        let pipeline = parse_pipeline(json!({"parallel": [
            {"item": {"id": "s1", "steps": {"item": {"id": "st1"}}}},
            {"item": {"id": "s2", "payload": {"propagate_from": "st1"}}}
        ]}));
        let diags = validate(&pipeline);
        let hits = rule_hits(&diags, "propagation_target_is_stage");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fix.as_deref(), Some("Propagate from stage 's1' instead"));
    }

    #[test]
    fn later_and_chained_targets_warn() {
        let pipeline = parse_pipeline(json!({"parallel": [
            {"item": {"id": "s1", "payload": {"propagate_from": "s2"}}},
            {"item": {"id": "s2", "payload": {"propagate_from": "s3"}}},
            {"item": {"id": "s3"}}
        ]}));
        let diags = validate(&pipeline);
        assert_eq!(rule_hits(&diags, "propagation_from_earlier_stage").len(), 2);
        let chained = rule_hits(&diags, "chained_propagation");
        assert_eq!(chained.len(), 1);
        assert_eq!(chained[0].node_id.as_deref(), Some("s1"));
    }

    #[test]
    fn override_set_and_variable_duplicates() {
        let pipeline = parse_pipeline(json!({"item": {"id": "s1", "payload": {
            "variables": [{"name": "x", "value": "1"}, {"name": "x", "value": "2"}],
            "override_sets": [
                {"identifier": "grpA", "variables": [
                    {"name": "y", "value": "1"},
                    {"name": "y", "value": "2"}
                ]},
                {"identifier": "grpA"}
            ]
        }}}));
        let diags = validate(&pipeline);
        assert_eq!(rule_hits(&diags, "unique_override_set_ids").len(), 1);
        let dup_vars = rule_hits(&diags, "duplicate_variable_names");
        assert_eq!(dup_vars.len(), 2);
        assert!(dup_vars.iter().all(|d| d.severity == Severity::Info));
        assert!(dup_vars[1].message.contains("grpA"));
    }

    #[test]
    fn validate_or_raise_ok_for_warnings_only() {
        let pipeline =
            parse_pipeline(json!({"item": {"id": "s2", "payload": {"propagate_from": "gone"}}}));
        let result = validate_or_raise(&pipeline);
        assert!(result.is_ok(), "Expected Ok, got: {result:?}");
    }

    #[test]
    fn validate_or_raise_errors_for_invalid_pipeline() {
        let pipeline = parse_pipeline(json!({"parallel": [
            {"item": {"id": "s1"}},
            {"item": {"id": "s1"}}
        ]}));
        let err = validate_or_raise(&pipeline).unwrap_err();
        assert!(err.to_string().contains("already used"));
    }
}
