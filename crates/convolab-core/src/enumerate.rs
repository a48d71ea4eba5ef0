//! Design enumeration: expands behavior × group size (or behavior × scenario)
//! into an ordered list of independent experiment specs.
//!
//! Ordering is behaviors outer, sizes/scenarios inner. Window composition
//! depends on it, so it must stay stable.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::domain::behavior::BehaviorVariant;
use crate::domain::error::{ConvolabError, Result};
use crate::domain::scenario::ScenarioDefinition;
use crate::domain::spec::ExperimentSpec;

/// The inner axis of the factorial design.
#[derive(Debug, Clone)]
pub enum DesignAxis {
    GroupSizes(Vec<u32>),
    /// Each scenario's participant count becomes the unit's group size.
    Scenarios(Vec<ScenarioDefinition>),
}

/// Include/exclude filter on behavior names.
///
/// An empty include list means "all behaviors".
#[derive(Debug, Clone, Default)]
pub struct BehaviorFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl BehaviorFilter {
    pub fn include(names: &[&str]) -> Self {
        Self {
            include: names.iter().map(|s| s.to_string()).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn exclude(names: &[&str]) -> Self {
        Self {
            include: Vec::new(),
            exclude: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Apply the filter, preserving the order of `behaviors`.
    pub fn apply<'a>(&self, behaviors: &'a [BehaviorVariant]) -> Result<Vec<&'a BehaviorVariant>> {
        let universe: HashSet<&str> = behaviors.iter().map(|b| b.name.as_str()).collect();

        let unknown: BTreeSet<&str> = self
            .include
            .iter()
            .chain(self.exclude.iter())
            .map(String::as_str)
            .filter(|name| !universe.contains(name))
            .collect();
        if !unknown.is_empty() {
            let names: Vec<&str> = unknown.into_iter().collect();
            return Err(ConvolabError::setup(format!(
                "unknown behavior name(s): {}",
                names.join(", ")
            )));
        }

        let include: HashSet<&str> = self.include.iter().map(String::as_str).collect();
        let exclude: HashSet<&str> = self.exclude.iter().map(String::as_str).collect();

        Ok(behaviors
            .iter()
            .filter(|b| include.is_empty() || include.contains(b.name.as_str()))
            .filter(|b| !exclude.contains(b.name.as_str()))
            .collect())
    }
}

/// Expand the design into experiment specs.
///
/// Fails with a setup error when a filter names an unknown behavior, when a
/// group size or scenario is invalid, when two units share an identity, or
/// when nothing is left to run.
pub fn enumerate(
    behaviors: &[BehaviorVariant],
    axis: &DesignAxis,
    filter: &BehaviorFilter,
) -> Result<Vec<ExperimentSpec>> {
    let selected = filter.apply(behaviors)?;

    let mut specs = Vec::new();
    match axis {
        DesignAxis::GroupSizes(sizes) => {
            if let Some(bad) = sizes.iter().find(|&&n| n == 0) {
                return Err(ConvolabError::setup(format!("invalid group size: {bad}")));
            }
            for behavior in selected {
                let behavior = Arc::new(behavior.clone());
                for &group_size in sizes {
                    specs.push(ExperimentSpec {
                        behavior: Arc::clone(&behavior),
                        group_size,
                        scenario: None,
                    });
                }
            }
        }
        DesignAxis::Scenarios(scenarios) => {
            if let Some(empty) = scenarios.iter().find(|s| s.participants.is_empty()) {
                return Err(ConvolabError::setup(format!(
                    "scenario {} has no participants",
                    empty.id
                )));
            }
            let scenarios: Vec<Arc<ScenarioDefinition>> =
                scenarios.iter().cloned().map(Arc::new).collect();
            for behavior in selected {
                let behavior = Arc::new(behavior.clone());
                for scenario in &scenarios {
                    specs.push(ExperimentSpec {
                        behavior: Arc::clone(&behavior),
                        group_size: scenario.group_size() as u32,
                        scenario: Some(Arc::clone(scenario)),
                    });
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.key()) {
            return Err(ConvolabError::setup(format!(
                "duplicate unit identity: {}",
                spec.label()
            )));
        }
    }

    if specs.is_empty() {
        return Err(ConvolabError::setup("no specs to run"));
    }

    debug!(units = specs.len(), "design enumerated");
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::behavior::ModelSettings;
    use crate::domain::scenario::ParticipantPersona;

    fn behaviors(names: &[&str]) -> Vec<BehaviorVariant> {
        names
            .iter()
            .map(|n| BehaviorVariant::new(n, &format!("agent_{n}"), "p", ModelSettings::new("m", 0.5)))
            .collect()
    }

    fn scenario(id: &str, size: usize) -> ScenarioDefinition {
        ScenarioDefinition {
            id: id.to_string(),
            scenario_type: "group_chat".to_string(),
            narrative: "dinner".to_string(),
            participants: (0..size)
                .map(|i| ParticipantPersona::new(&format!("P{i}"), "d"))
                .collect(),
        }
    }

    fn labels(specs: &[ExperimentSpec]) -> Vec<String> {
        specs.iter().map(|s| s.label()).collect()
    }

    #[test]
    fn test_group_sizes_are_behavior_outer_size_inner() {
        let specs = enumerate(
            &behaviors(&["a", "b"]),
            &DesignAxis::GroupSizes(vec![1, 2, 3]),
            &BehaviorFilter::default(),
        )
        .unwrap();

        assert_eq!(specs.len(), 6);
        assert_eq!(
            labels(&specs),
            vec!["a_group1", "a_group2", "a_group3", "b_group1", "b_group2", "b_group3"]
        );
        let keys: HashSet<_> = specs.iter().map(|s| s.key()).collect();
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_scenario_mode_derives_group_size() {
        let specs = enumerate(
            &behaviors(&["a", "b"]),
            &DesignAxis::Scenarios(vec![scenario("s1", 2), scenario("s2", 4)]),
            &BehaviorFilter::default(),
        )
        .unwrap();

        assert_eq!(
            labels(&specs),
            vec!["a_group2_s1", "a_group4_s2", "b_group2_s1", "b_group4_s2"]
        );
        assert_eq!(specs[1].group_size, 4);
    }

    #[test]
    fn test_include_and_exclude_use_set_difference() {
        let all = behaviors(&["a", "b", "c"]);
        let filter = BehaviorFilter {
            include: vec!["c".into(), "a".into(), "b".into()],
            exclude: vec!["b".into()],
        };
        let specs = enumerate(&all, &DesignAxis::GroupSizes(vec![1]), &filter).unwrap();
        // Order follows the behavior universe, not the include list.
        assert_eq!(labels(&specs), vec!["a_group1", "c_group1"]);
    }

    #[test]
    fn test_excluding_every_behavior_is_a_setup_error() {
        let err = enumerate(
            &behaviors(&["a", "b"]),
            &DesignAxis::GroupSizes(vec![1, 2]),
            &BehaviorFilter::exclude(&["a", "b"]),
        )
        .unwrap_err();
        assert!(err.is_setup());
        assert!(err.to_string().contains("no specs to run"));
    }

    #[test]
    fn test_unknown_filter_name_is_a_setup_error() {
        let err = enumerate(
            &behaviors(&["a"]),
            &DesignAxis::GroupSizes(vec![1]),
            &BehaviorFilter::include(&["nope"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown behavior name(s): nope"));
    }

    #[test]
    fn test_duplicate_sizes_rejected() {
        let err = enumerate(
            &behaviors(&["a"]),
            &DesignAxis::GroupSizes(vec![2, 2]),
            &BehaviorFilter::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate unit identity: a_group2"));
    }

    #[test]
    fn test_zero_group_size_and_empty_scenario_rejected() {
        let all = behaviors(&["a"]);
        assert!(enumerate(&all, &DesignAxis::GroupSizes(vec![0]), &BehaviorFilter::default()).is_err());
        assert!(enumerate(
            &all,
            &DesignAxis::Scenarios(vec![scenario("empty", 0)]),
            &BehaviorFilter::default()
        )
        .is_err());
    }

    #[test]
    fn test_specs_share_behavior_allocation() {
        let specs = enumerate(
            &behaviors(&["a"]),
            &DesignAxis::GroupSizes(vec![1, 2]),
            &BehaviorFilter::default(),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&specs[0].behavior, &specs[1].behavior));
    }
}
