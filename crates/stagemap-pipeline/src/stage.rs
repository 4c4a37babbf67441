//! Stage payloads that carry variables, override sets, and a propagation
//! reference.

use serde::{Deserialize, Serialize};
use stagemap_types::{OverrideSet, Variable};

/// Access to the variable storage of a stage payload.
///
/// The resolver and the lint rules only see payloads through this trait,
/// so hosts can keep their own stage types.
pub trait VariableScope {
    /// The implicit default variable set.
    fn variables(&self) -> &[Variable];
    fn variables_mut(&mut self) -> &mut Vec<Variable>;

    fn override_sets(&self) -> &[OverrideSet];
    fn override_sets_mut(&mut self) -> &mut Vec<OverrideSet>;

    /// Id of the stage this one propagates its configuration from.
    fn propagate_from(&self) -> Option<&str>;

    fn override_set(&self, identifier: &str) -> Option<&OverrideSet> {
        self.override_sets()
            .iter()
            .find(|set| set.identifier == identifier)
    }
}

/// The stock stage payload. Anything the model does not interpret is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub override_sets: Vec<OverrideSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagate_from: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StageSpec {
    pub fn with_variables(variables: Vec<Variable>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    pub fn propagating_from(stage_id: impl Into<String>) -> Self {
        Self {
            propagate_from: Some(stage_id.into()),
            ..Self::default()
        }
    }

    pub fn override_set_added(mut self, set: OverrideSet) -> Self {
        self.override_sets.push(set);
        self
    }
}

impl VariableScope for StageSpec {
    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn variables_mut(&mut self) -> &mut Vec<Variable> {
        &mut self.variables
    }

    fn override_sets(&self) -> &[OverrideSet] {
        &self.override_sets
    }

    fn override_sets_mut(&mut self) -> &mut Vec<OverrideSet> {
        &mut self.override_sets
    }

    fn propagate_from(&self) -> Option<&str> {
        self.propagate_from.as_deref()
    }
}
