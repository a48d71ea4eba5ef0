//! Scenario definitions for the scenario design axis.
//!
//! Scenario lists are loaded from JSON. Two entry shapes are accepted:
//! - structured: `id`, `scenario_type`, `narrative`, `participants[]`
//! - legacy notebook output: `scenario`, `participants` as newline-separated
//!   `Name: description` lines, and `participant_names`

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::error::{ConvolabError, Result};

/// A simulated participant in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPersona {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
}

impl ParticipantPersona {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            pronouns: None,
        }
    }
}

/// A scenario: narrative plus the personas taking part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: String,
    #[serde(default = "default_scenario_type")]
    pub scenario_type: String,
    pub narrative: String,
    pub participants: Vec<ParticipantPersona>,
}

fn default_scenario_type() -> String {
    "group_chat".to_string()
}

impl ScenarioDefinition {
    pub fn group_size(&self) -> usize {
        self.participants.len()
    }
}

#[derive(Debug, Deserialize)]
struct LegacyScenario {
    scenario: String,
    participants: String,
    #[serde(default)]
    participant_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScenarioRecord {
    Structured(ScenarioDefinition),
    Legacy(LegacyScenario),
}

/// Parse `Name: description` lines into personas.
///
/// Blank lines and lines without a colon are skipped.
pub fn parse_persona_lines(text: &str) -> Vec<ParticipantPersona> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, description)| ParticipantPersona::new(name.trim(), description.trim()))
        .collect()
}

/// Parse a JSON scenario list. Legacy entries get ids `scenario-{n}`, 1-based.
pub fn parse_scenarios(json: &str) -> Result<Vec<ScenarioDefinition>> {
    let records: Vec<ScenarioRecord> = serde_json::from_str(json)?;
    let mut out = Vec::with_capacity(records.len());

    for (idx, record) in records.into_iter().enumerate() {
        let scenario = match record {
            ScenarioRecord::Structured(def) => def,
            ScenarioRecord::Legacy(legacy) => {
                let participants = parse_persona_lines(&legacy.participants);
                if !legacy.participant_names.is_empty()
                    && legacy.participant_names.len() != participants.len()
                {
                    warn!(
                        index = idx,
                        names = legacy.participant_names.len(),
                        parsed = participants.len(),
                        "participant_names disagrees with parsed persona lines"
                    );
                }
                ScenarioDefinition {
                    id: format!("scenario-{}", idx + 1),
                    scenario_type: default_scenario_type(),
                    narrative: legacy.scenario,
                    participants,
                }
            }
        };
        out.push(scenario);
    }

    Ok(out)
}

/// Load a scenario list from a JSON file.
pub fn load_scenarios(path: &Path) -> Result<Vec<ScenarioDefinition>> {
    let raw = std::fs::read_to_string(path)?;
    parse_scenarios(&raw).map_err(|e| ConvolabError::Config {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

/// Keep the first scenario for each group size in `sizes`, ordered by size.
///
/// Sizes with no matching scenario are skipped with a warning.
pub fn select_one_per_group_size(
    scenarios: &[ScenarioDefinition],
    sizes: RangeInclusive<usize>,
) -> Vec<ScenarioDefinition> {
    let mut selected: BTreeMap<usize, &ScenarioDefinition> = BTreeMap::new();
    for scenario in scenarios {
        let size = scenario.group_size();
        if sizes.contains(&size) {
            selected.entry(size).or_insert(scenario);
        }
    }

    for size in sizes {
        if !selected.contains_key(&size) {
            warn!(group_size = size, "no scenario found for group size");
        }
    }

    selected.into_values().cloned().collect()
}
