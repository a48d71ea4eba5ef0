//! Facilitator behavior variants.

use serde::{Deserialize, Serialize};

/// Model selection passed through to a remote agent participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
}

impl ModelSettings {
    pub fn new(model: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
        }
    }
}

/// One facilitator behavior in the design.
///
/// Loaded once from the design config and shared read-only by every unit
/// that uses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorVariant {
    /// Unique name within a design, used by include/exclude filters.
    pub name: String,
    /// Remote agent id for the facilitator.
    pub agent_id: String,
    pub prompt_template: String,
    pub model_settings: ModelSettings,
    /// Name shown for the facilitator in the conversation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl BehaviorVariant {
    pub fn new(name: &str, agent_id: &str, prompt_template: &str, model: ModelSettings) -> Self {
        Self {
            name: name.to_string(),
            agent_id: agent_id.to_string(),
            prompt_template: prompt_template.to_string(),
            model_settings: model,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    /// Prompt with surrounding whitespace from multi-line config strings removed.
    pub fn prompt(&self) -> &str {
        self.prompt_template.trim()
    }
}
