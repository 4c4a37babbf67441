//! Pipeline structure model: flattening, shadow metadata, override sets,
//! and selection.
//!
//! This crate implements the structural core of stagemap: the recursive
//! stage/step tree, id-based indexing over it, the lock-step zipper that
//! attaches provenance metadata, override-set resolution with propagation,
//! the status-gated selection controller with its deep-link address, and
//! the 9 built-in lint rules.

pub mod address;
pub mod flatten;
pub mod node;
pub mod overrides;
pub mod selection;
pub mod shadow;
pub mod stage;
pub mod validation;

pub use address::{Address, STAGE_KEY, STEP_KEY};
pub use flatten::{
    flatten, index_of, nearest_enclosing_stage, parent_stage_path, FlatEntry, IndexEntry,
    PipelineIndex,
};
pub use node::{Item, NodeTag, StructuralNode, Visit};
pub use overrides::{
    apply_variables, last_write_wins, resolve_variables, ParseModeError, PropagationMode,
};
pub use selection::{Selection, SelectionController};
pub use shadow::{zip, MismatchKind, Provenance, ShadowMismatch, ShadowPair, ZipOutcome};
pub use stage::{StageSpec, VariableScope};
pub use validation::{validate, validate_or_raise, Diagnostic, LintContext, LintRule, Severity};
