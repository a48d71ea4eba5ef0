//! Configuration for designs, the lab API and the batch scheduler.
//!
//! The design (behaviors, participant model, default group sizes) is
//! immutable configuration data loaded once at process start. A built-in
//! default is compiled in from `config/design.toml`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::behavior::{BehaviorVariant, ModelSettings};
use crate::domain::error::{ConvolabError, Result};

const BUILTIN_DESIGN: &str = include_str!("../config/design.toml");

/// Environment variable holding the lab API base URL.
pub const BASE_URL_ENV: &str = "CONVOLAB_BASE_URL";
/// Environment variable holding the lab API bearer token.
pub const API_KEY_ENV: &str = "CONVOLAB_API_KEY";

fn default_name_prefix() -> String {
    "Experiment".to_string()
}

fn default_chat_duration() -> u32 {
    10
}

fn default_generic_prompt() -> String {
    "You are {name}, a participant in a group discussion.".to_string()
}

/// Experiment design loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignConfig {
    /// Prefix for remote experiment names, e.g. `Restaurant`.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default = "default_chat_duration")]
    pub chat_duration_minutes: u32,
    /// Group sizes used when no scenario list is supplied.
    #[serde(default)]
    pub group_sizes: Vec<u32>,
    /// Prompt for generic participants; `{name}` is replaced per persona.
    #[serde(default = "default_generic_prompt")]
    pub generic_participant_prompt: String,
    pub participant_model: ModelSettings,
    pub behaviors: Vec<BehaviorVariant>,
}

impl DesignConfig {
    /// The compiled-in default design.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_DESIGN, "<builtin design>")
    }

    /// Load and validate a design file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw, &path.display().to_string())
    }

    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self> {
        let config: DesignConfig = toml::from_str(raw).map_err(|e| ConvolabError::Config {
            path: origin.to_string(),
            detail: e.to_string(),
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &str) -> Result<()> {
        let invalid = |detail: String| ConvolabError::Config {
            path: origin.to_string(),
            detail,
        };

        if self.behaviors.is_empty() {
            return Err(invalid("design defines no behaviors".to_string()));
        }

        let mut seen = HashSet::new();
        for behavior in &self.behaviors {
            if behavior.name.trim().is_empty() {
                return Err(invalid("behavior with empty name".to_string()));
            }
            if behavior.agent_id.trim().is_empty() {
                return Err(invalid(format!("behavior {} has no agent_id", behavior.name)));
            }
            if !seen.insert(behavior.name.as_str()) {
                return Err(invalid(format!("duplicate behavior name: {}", behavior.name)));
            }
        }

        if self.group_sizes.contains(&0) {
            return Err(invalid("group sizes must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn behavior_names(&self) -> Vec<&str> {
        self.behaviors.iter().map(|b| b.name.as_str()).collect()
    }

    /// Distinct facilitator display names, used by the dialogue quality checks.
    pub fn facilitator_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.behaviors.iter().filter_map(|b| b.display_name.clone()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// Lab API connection settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Per-request transport timeout. Provisioning and export calls have no
    /// other timeout.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: String::new(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
            user_agent: format!("convolab/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    /// Defaults with the endpoint and key taken from the environment.
    pub fn from_env() -> Self {
        ApiConfig {
            base_url: std::env::var(BASE_URL_ENV).unwrap_or_default(),
            api_key: std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            ..Self::default()
        }
    }

    pub fn new(base_url: &str, api_key: &str) -> Self {
        ApiConfig {
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fail with a setup error when credentials or the endpoint are missing.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConvolabError::setup(format!(
                "missing lab API base URL (set {BASE_URL_ENV} or --base-url)"
            )));
        }
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ConvolabError::setup(format!(
                "missing lab API key (set {API_KEY_ENV} or --api-key)"
            )));
        }
        Ok(())
    }
}

/// Completion polling parameters.
///
/// Stability is a best-effort signal: a conversation whose message count has
/// not moved for `stability_threshold` samples is assumed finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
    pub stability_threshold: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(20 * 60),
            stability_threshold: 15,
        }
    }
}

/// Batch scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Window size and peak number of units in flight.
    pub concurrency: usize,
    pub wait_for_completion: bool,
    pub poll: PollConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            wait_for_completion: false,
            poll: PollConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ConvolabError::setup("concurrency must be a positive integer"));
        }
        if self.wait_for_completion {
            if self.poll.interval.is_zero() {
                return Err(ConvolabError::setup("poll interval must be positive"));
            }
            if self.poll.stability_threshold == 0 {
                return Err(ConvolabError::setup("stability threshold must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_design_loads() {
        let design = DesignConfig::builtin().unwrap();
        assert_eq!(design.name_prefix, "Restaurant");
        assert_eq!(design.group_sizes, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            design.behavior_names(),
            vec![
                "silent",
                "short_responses",
                "clarifying_questions",
                "direct_fast_consensus",
                "explanatory"
            ]
        );
        assert_eq!(design.participant_model.model, "gemini-1.5-flash");
        assert_eq!(design.facilitator_names(), vec!["Gemini".to_string()]);
        assert!(design.behaviors[0].prompt().starts_with("You are Gemini"));
    }

    #[test]
    fn test_duplicate_behavior_names_rejected() {
        let raw = r#"
            [participant_model]
            model = "m"
            temperature = 0.5

            [[behaviors]]
            name = "a"
            agent_id = "x"
            prompt_template = "p"
            model_settings = { model = "m", temperature = 0.1 }

            [[behaviors]]
            name = "a"
            agent_id = "y"
            prompt_template = "p"
            model_settings = { model = "m", temperature = 0.1 }
        "#;
        let err = DesignConfig::from_toml_str(raw, "test.toml").unwrap_err();
        assert!(err.to_string().contains("duplicate behavior name: a"));
        assert!(err.is_setup());
    }

    #[test]
    fn test_design_defaults_fill_optional_fields() {
        let raw = r#"
            participant_model = { model = "m", temperature = 0.5 }

            [[behaviors]]
            name = "a"
            agent_id = "x"
            prompt_template = "p"
            model_settings = { model = "m", temperature = 0.1 }
        "#;
        let design = DesignConfig::from_toml_str(raw, "test.toml").unwrap();
        assert_eq!(design.name_prefix, "Experiment");
        assert_eq!(design.chat_duration_minutes, 10);
        assert!(design.group_sizes.is_empty());
    }

    #[test]
    fn test_api_config_requires_credentials() {
        let mut config = ApiConfig::new("https://lab.example.com/api/v1", "");
        assert!(config.validate().unwrap_err().is_setup());

        config.api_key = Some("secret".to_string());
        assert!(config.validate().is_ok());

        config.base_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_config_default_has_no_credentials() {
        let config = ApiConfig::default();
        assert!(config.base_url.is_empty());
        assert!(config.api_key.is_none());
        assert!(config.validate().unwrap_err().is_setup());
    }

    #[test]
    fn test_scheduler_config_rejects_zero_concurrency() {
        let config = SchedulerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(SchedulerConfig::default().validate().is_ok());
    }
}
