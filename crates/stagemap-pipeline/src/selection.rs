//! Selection state for the open stage or step, with deep-link restore.
//!
//! The controller is the only stateful piece of the crate. Every request
//! is validated against the tree snapshot it is given; a request that fails
//! validation leaves the state untouched.

use serde::{Deserialize, Serialize};
use stagemap_types::{NotStartedGate, StatusGate};

use crate::address::Address;
use crate::flatten::PipelineIndex;
use crate::node::StructuralNode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Selection {
    #[default]
    Idle,
    Stage {
        stage_id: String,
    },
    Step {
        stage_id: String,
        step_id: String,
    },
}

impl Selection {
    pub fn is_idle(&self) -> bool {
        matches!(self, Selection::Idle)
    }

    pub fn stage_id(&self) -> Option<&str> {
        match self {
            Selection::Idle => None,
            Selection::Stage { stage_id } | Selection::Step { stage_id, .. } => Some(stage_id),
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            Selection::Step { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}

/// Tracks the current [`Selection`] and gates changes on node status.
#[derive(Debug, Clone)]
pub struct SelectionController<G = NotStartedGate> {
    state: Selection,
    gate: G,
}

impl Default for SelectionController<NotStartedGate> {
    fn default() -> Self {
        Self::new(NotStartedGate)
    }
}

impl<G: StatusGate> SelectionController<G> {
    pub fn new(gate: G) -> Self {
        Self {
            state: Selection::Idle,
            gate,
        }
    }

    pub fn state(&self) -> &Selection {
        &self.state
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    /// Address of the current state; `None` while idle.
    pub fn address(&self) -> Option<Address> {
        Address::from_selection(&self.state)
    }

    /// Open a stage. Returns the new address, or `None` if the request was
    /// ignored.
    pub fn select_stage<P>(&mut self, tree: &StructuralNode<P>, stage_id: &str) -> Option<Address> {
        let candidate = Selection::Stage {
            stage_id: stage_id.to_string(),
        };
        self.transition(tree, candidate)
    }

    /// Open a step of `stage_id`. The gate looks at the step's own status.
    pub fn select_step<P>(
        &mut self,
        tree: &StructuralNode<P>,
        stage_id: &str,
        step_id: &str,
    ) -> Option<Address> {
        let candidate = Selection::Step {
            stage_id: stage_id.to_string(),
            step_id: step_id.to_string(),
        };
        self.transition(tree, candidate)
    }

    pub fn clear(&mut self) {
        self.state = Selection::Idle;
    }

    /// Re-validate an address against `tree` as if the user had clicked it.
    /// Anything that does not validate leaves the controller idle.
    pub fn restore_from_address<P>(
        &mut self,
        tree: &StructuralNode<P>,
        address: &Address,
    ) -> &Selection {
        let candidate = address.candidate();
        let next = if self.accepts(tree, &candidate) {
            candidate
        } else {
            tracing::debug!(address = %address, "Address does not resolve, selection cleared");
            Selection::Idle
        };
        self.state = next;
        &self.state
    }

    pub fn restore_from_query<P>(&mut self, tree: &StructuralNode<P>, query: &str) -> &Selection {
        self.restore_from_address(tree, &Address::parse(query))
    }

    fn transition<P>(&mut self, tree: &StructuralNode<P>, candidate: Selection) -> Option<Address> {
        if !self.accepts(tree, &candidate) {
            tracing::debug!(?candidate, "Selection ignored");
            return None;
        }
        let address = Address::from_selection(&candidate);
        self.state = candidate;
        address
    }

    /// Whether `candidate` names existing, selectable nodes of `tree`.
    fn accepts<P>(&self, tree: &StructuralNode<P>, candidate: &Selection) -> bool {
        let index = match PipelineIndex::build(tree) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!(error = %e, "Tree does not index, selection rejected");
                return false;
            }
        };

        // An empty id has no address that parses back to it.
        let Some(stage_id) = candidate.stage_id().filter(|id| !id.is_empty()) else {
            return false;
        };
        if candidate.step_id().is_some_and(str::is_empty) {
            return false;
        }
        let Some(stage) = index.get(stage_id) else {
            return false;
        };
        if !stage.index.is_stage() {
            return false;
        }

        match candidate.step_id() {
            None => self.gate.is_selectable(stage.item.status),
            Some(step_id) => index.get(step_id).is_some_and(|step| {
                step.index.parent_stage_id.as_deref() == Some(stage_id)
                    && self.gate.is_selectable(step.item.status)
            }),
        }
    }
}
