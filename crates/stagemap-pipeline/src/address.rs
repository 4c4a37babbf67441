//! Deep-link address encoding.
//!
//! An address is a form-urlencoded query with two recognized keys,
//! `stage` and `step`. Unknown keys are ignored on parse and preserved by
//! [`Address::merge_into`].

use std::fmt;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::selection::Selection;

pub const STAGE_KEY: &str = "stage";
pub const STEP_KEY: &str = "step";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl Address {
    pub fn for_stage(stage_id: impl Into<String>) -> Self {
        Self {
            stage: Some(stage_id.into()),
            step: None,
        }
    }

    pub fn for_step(stage_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            stage: Some(stage_id.into()),
            step: Some(step_id.into()),
        }
    }

    /// Parse a query string, with or without its leading `?`.
    ///
    /// The first occurrence of a key wins; empty values count as absent.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut address = Address::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                STAGE_KEY => &mut address.stage,
                STEP_KEY => &mut address.step,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.into_owned());
            }
        }
        address
    }

    /// Form-urlencoded query without a leading `?`. Empty for an empty address.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if let Some(stage) = &self.stage {
            serializer.append_pair(STAGE_KEY, stage);
        }
        if let Some(step) = &self.step {
            serializer.append_pair(STEP_KEY, step);
        }
        serializer.finish()
    }

    /// The address for a selection. `None` for `Idle`.
    pub fn from_selection(selection: &Selection) -> Option<Self> {
        match selection {
            Selection::Idle => None,
            Selection::Stage { stage_id } => Some(Self::for_stage(stage_id.clone())),
            Selection::Step { stage_id, step_id } => {
                Some(Self::for_step(stage_id.clone(), step_id.clone()))
            }
        }
    }

    /// The selection this address asks for, before any validation against a tree.
    pub fn candidate(&self) -> Selection {
        match (&self.stage, &self.step) {
            (Some(stage_id), None) => Selection::Stage {
                stage_id: stage_id.clone(),
            },
            (Some(stage_id), Some(step_id)) => Selection::Step {
                stage_id: stage_id.clone(),
                step_id: step_id.clone(),
            },
            (None, _) => Selection::Idle,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stage.is_none() && self.step.is_none()
    }

    /// Rewrite the `stage`/`step` keys of a host query, keeping every other
    /// pair in its original order. Selection keys go last.
    pub fn merge_into(&self, existing_query: &str) -> String {
        let existing = existing_query.strip_prefix('?').unwrap_or(existing_query);
        let mut serializer = form_urlencoded::Serializer::new(String::new());

        for (key, value) in form_urlencoded::parse(existing.as_bytes()) {
            if key != STAGE_KEY && key != STEP_KEY {
                serializer.append_pair(&key, &value);
            }
        }
        if let Some(stage) = &self.stage {
            serializer.append_pair(STAGE_KEY, stage);
        }
        if let Some(step) = &self.step {
            serializer.append_pair(STEP_KEY, step);
        }
        serializer.finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stage_and_step() {
        let address = Address::parse("?stage=s1&step=st2");
        assert_eq!(address, Address::for_step("s1", "st2"));
        assert_eq!(
            address.candidate(),
            Selection::Step {
                stage_id: "s1".into(),
                step_id: "st2".into()
            }
        );
    }

    #[test]
    fn parse_ignores_unknown_keys_and_decodes() {
        let address = Address::parse("tab=logs&stage=Build%20%26%20Test&view=graph");
        assert_eq!(address.stage.as_deref(), Some("Build & Test"));
        assert_eq!(address.step, None);
    }

    #[test]
    fn first_occurrence_wins() {
        let address = Address::parse("stage=a&stage=b");
        assert_eq!(address.stage.as_deref(), Some("a"));
    }

    #[test]
    fn empty_value_is_absent() {
        assert_eq!(Address::parse("stage=&step=st1").candidate(), Selection::Idle);
        assert_eq!(
            Address::parse("stage=s1&step=").candidate(),
            Selection::Stage { stage_id: "s1".into() }
        );
    }

    #[test]
    fn step_without_stage_is_idle() {
        assert_eq!(Address::parse("step=st1").candidate(), Selection::Idle);
        assert_eq!(Address::parse("").candidate(), Selection::Idle);
        assert_eq!(Address::parse("%%%").candidate(), Selection::Idle);
    }

    #[test]
    fn encode_escapes_values() {
        let address = Address::for_step("deploy prod", "a&b");
        assert_eq!(address.encode(), "stage=deploy+prod&step=a%26b");
        assert_eq!(Address::parse(&address.encode()), address);
        assert_eq!(Address::default().encode(), "");
    }

    #[test]
    fn from_selection_matches_candidate() {
        let selection = Selection::Stage { stage_id: "s1".into() };
        let address = Address::from_selection(&selection).unwrap();
        assert_eq!(address.to_string(), "stage=s1");
        assert_eq!(address.candidate(), selection);
        assert!(Address::from_selection(&Selection::Idle).is_none());
    }

    #[test]
    fn merge_into_preserves_host_keys() {
        let merged = Address::for_stage("s2").merge_into("?tab=logs&stage=s1&step=st9&view=graph");
        assert_eq!(merged, "tab=logs&view=graph&stage=s2");

        let cleared = Address::default().merge_into("stage=s1&tab=logs");
        assert_eq!(cleared, "tab=logs");
    }
}
