//! Override-set resolution: the effective variable set of a stage, and the
//! matching write path.
//!
//! Resolution always reasons about stages. A step id is first normalized to
//! its owning stage. Propagating modes read from (and write to) the stage
//! named by the stage's `propagate_from` reference.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use stagemap_types::{OverrideSet, StructureError, Variable};

use crate::flatten::{FlatEntry, PipelineIndex};
use crate::node::StructuralNode;
use crate::stage::VariableScope;

// ---------------------------------------------------------------------------
// PropagationMode
// ---------------------------------------------------------------------------

/// Which variable set a stage reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PropagationMode {
    /// The stage's own default set.
    Own,
    /// The parent stage's default set.
    PropagateDefault,
    /// A named override set on the parent stage.
    PropagateNamed(String),
    /// A named override set on the stage itself.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseModeError {
    #[error("Unknown propagation mode '{0}'")]
    Unknown(String),

    #[error("Propagation mode '{0}' needs an override set id")]
    MissingSetId(String),
}

impl PropagationMode {
    pub fn is_propagating(&self) -> bool {
        matches!(
            self,
            PropagationMode::PropagateDefault | PropagationMode::PropagateNamed(_)
        )
    }

    /// Override set identifier for the named modes.
    pub fn set_id(&self) -> Option<&str> {
        match self {
            PropagationMode::PropagateNamed(id) | PropagationMode::Named(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationMode::Own => write!(f, "own"),
            PropagationMode::PropagateDefault => write!(f, "propagate-default"),
            PropagationMode::PropagateNamed(id) => write!(f, "propagate-named:{id}"),
            PropagationMode::Named(id) => write!(f, "named:{id}"),
        }
    }
}

impl FromStr for PropagationMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, set_id) = match s.split_once(':') {
            Some((head, id)) => (head, Some(id)),
            None => (s, None),
        };

        let named = |build: fn(String) -> PropagationMode| match set_id {
            Some(id) if !id.is_empty() => Ok(build(id.to_string())),
            _ => Err(ParseModeError::MissingSetId(s.to_string())),
        };

        match head {
            "own" if set_id.is_none() => Ok(PropagationMode::Own),
            "propagate-default" if set_id.is_none() => Ok(PropagationMode::PropagateDefault),
            "propagate-named" => named(PropagationMode::PropagateNamed),
            "named" => named(PropagationMode::Named),
            _ => Err(ParseModeError::Unknown(s.to_string())),
        }
    }
}

impl TryFrom<String> for PropagationMode {
    type Error = ParseModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropagationMode> for String {
    fn from(mode: PropagationMode) -> Self {
        mode.to_string()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Collapse repeated names in one left-to-right pass. A repeated name keeps
/// its first position and takes its last value.
pub fn last_write_wins(variables: &[Variable]) -> Vec<Variable> {
    let mut merged: IndexMap<&str, &str> = IndexMap::new();
    for var in variables {
        merged.insert(&var.name, &var.value);
    }
    merged
        .into_iter()
        .map(|(name, value)| Variable::new(name, value))
        .collect()
}

/// The stage whose storage `mode` addresses, starting from `id`.
///
/// `Ok(None)` when a propagating mode has no usable parent.
fn target_stage<'i, 'a, P: VariableScope>(
    index: &'i PipelineIndex<'a, P>,
    id: &str,
    mode: &PropagationMode,
) -> Result<Option<&'i FlatEntry<'a, P>>, StructureError> {
    let entry = index.require(id)?;
    let stage = index.require(entry.index.stage_id())?;

    if !mode.is_propagating() {
        return Ok(Some(stage));
    }

    let parent = index.parent_stage(&stage.index.id)?;
    if parent.is_none() {
        tracing::debug!(stage = %stage.index.id, mode = %mode, "No parent stage to propagate from");
    }
    Ok(parent)
}

/// Effective variables for `stage_id` under `mode`.
///
/// A missing parent stage or override set resolves to an empty list.
pub fn resolve_variables<P: VariableScope>(
    pipeline: &StructuralNode<P>,
    stage_id: &str,
    mode: &PropagationMode,
) -> Result<Vec<Variable>, StructureError> {
    let index = PipelineIndex::build(pipeline)?;
    let Some(target) = target_stage(&index, stage_id, mode)? else {
        return Ok(Vec::new());
    };

    let scope = &target.item.payload;
    let variables = match mode.set_id() {
        None => scope.variables(),
        Some(set_id) => match scope.override_set(set_id) {
            Some(set) => set.variables.as_slice(),
            None => {
                tracing::debug!(stage = %target.index.id, set = %set_id, "Override set not found");
                &[]
            }
        },
    };

    Ok(last_write_wins(variables))
}

/// Return a copy of `pipeline` with `new_variables` written to the set that
/// `mode` addresses.
///
/// Propagating modes write to the parent stage. A named set that does not
/// exist yet is created. `Ok(None)` when there is no parent to write to.
pub fn apply_variables<P: VariableScope + Clone>(
    pipeline: &StructuralNode<P>,
    stage_id: &str,
    mode: &PropagationMode,
    new_variables: Vec<Variable>,
) -> Result<Option<StructuralNode<P>>, StructureError> {
    let target_id = {
        let index = PipelineIndex::build(pipeline)?;
        match target_stage(&index, stage_id, mode)? {
            Some(target) => target.index.id.clone(),
            None => return Ok(None),
        }
    };

    let mut updated = pipeline.clone();
    let item = updated
        .find_item_mut(&target_id)
        .ok_or_else(|| StructureError::not_found(&target_id))?;
    let scope = &mut item.payload;

    match mode.set_id() {
        None => *scope.variables_mut() = new_variables,
        Some(set_id) => {
            let sets = scope.override_sets_mut();
            match sets.iter_mut().find(|set| set.identifier == set_id) {
                Some(set) => set.variables = new_variables,
                None => sets.push(OverrideSet::new(set_id, new_variables)),
            }
        }
    }

    tracing::debug!(stage = %stage_id, target = %target_id, mode = %mode, "Applied variables");
    Ok(Some(updated))
}
