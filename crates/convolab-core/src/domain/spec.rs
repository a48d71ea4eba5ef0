//! Experiment specifications produced by the design enumerator.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::behavior::BehaviorVariant;
use crate::domain::scenario::ScenarioDefinition;

/// Identity of a unit: `(behavior name, group size, scenario id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub behavior: String,
    pub group_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_group{}", self.behavior, self.group_size)?;
        if let Some(id) = &self.scenario_id {
            write!(f, "_{id}")?;
        }
        Ok(())
    }
}

/// One fully specified experiment unit.
///
/// Behavior and scenario are shared by reference so specs clone cheaply into
/// per-unit tasks.
#[derive(Debug, Clone)]
pub struct ExperimentSpec {
    pub behavior: Arc<BehaviorVariant>,
    pub group_size: u32,
    pub scenario: Option<Arc<ScenarioDefinition>>,
}

impl ExperimentSpec {
    pub fn key(&self) -> UnitKey {
        UnitKey {
            behavior: self.behavior.name.clone(),
            group_size: self.group_size,
            scenario_id: self.scenario.as_ref().map(|s| s.id.clone()),
        }
    }

    /// Human-readable label, e.g. `silent_group3`.
    pub fn label(&self) -> String {
        self.key().to_string()
    }
}

/// SHA-256 over the ordered unit identities and behavior configs of a design.
///
/// Two runs with the same digest were expanded from the same design.
pub fn design_digest(specs: &[ExperimentSpec]) -> String {
    let mut hasher = Sha256::new();
    for spec in specs {
        let key = spec.key();
        hasher.update(key.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(spec.behavior.agent_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(spec.behavior.prompt().as_bytes());
        hasher.update(b"\0");
        hasher.update(spec.behavior.model_settings.model.as_bytes());
        hasher.update(spec.behavior.model_settings.temperature.to_le_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::behavior::ModelSettings;

    fn behavior(name: &str) -> Arc<BehaviorVariant> {
        Arc::new(BehaviorVariant::new(
            name,
            &format!("agent_{name}"),
            "be helpful",
            ModelSettings::new("m", 0.5),
        ))
    }

    #[test]
    fn test_label_includes_scenario_when_present() {
        let spec = ExperimentSpec {
            behavior: behavior("silent"),
            group_size: 3,
            scenario: None,
        };
        assert_eq!(spec.label(), "silent_group3");

        let scenario = Arc::new(ScenarioDefinition {
            id: "downtown".to_string(),
            scenario_type: "group_chat".to_string(),
            narrative: "n".to_string(),
            participants: vec![],
        });
        let spec = ExperimentSpec {
            behavior: behavior("silent"),
            group_size: 3,
            scenario: Some(scenario),
        };
        assert_eq!(spec.label(), "silent_group3_downtown");
    }

    #[test]
    fn test_design_digest_is_order_sensitive() {
        let a = ExperimentSpec {
            behavior: behavior("a"),
            group_size: 1,
            scenario: None,
        };
        let b = ExperimentSpec {
            behavior: behavior("b"),
            group_size: 1,
            scenario: None,
        };
        let d1 = design_digest(&[a.clone(), b.clone()]);
        let d2 = design_digest(&[a.clone(), b.clone()]);
        let d3 = design_digest(&[b, a]);
        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
        assert_eq!(d1.len(), 64);
    }
}
