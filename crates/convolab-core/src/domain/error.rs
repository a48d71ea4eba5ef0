//! Batch-level error taxonomy for convolab.
//!
//! Only setup and checkpoint failures abort a run. Per-unit failures are
//! captured as [`crate::domain::UnitResult`] entries and never surface here.

/// convolab errors that abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum ConvolabError {
    /// Missing credentials, invalid design, or an empty unit set.
    #[error("setup error: {0}")]
    Setup(String),

    #[error("config error in {path}: {detail}")]
    Config { path: String, detail: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvolabError {
    pub fn setup(msg: impl Into<String>) -> Self {
        ConvolabError::Setup(msg.into())
    }

    /// True for errors raised before any remote call was attempted.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ConvolabError::Setup(_) | ConvolabError::Config { .. } | ConvolabError::Toml(_)
        )
    }
}

/// Result type for convolab batch operations.
pub type Result<T> = std::result::Result<T, ConvolabError>;
