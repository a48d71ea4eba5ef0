//! convolab core library
//!
//! Expands a factorial design of facilitator behaviors into experiment units,
//! provisions each unit on a remote conversation lab, optionally waits for the
//! conversations to settle, exports the transcripts and checkpoints the
//! accumulated results after every window.

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod enumerate;
pub mod export;
pub mod metrics;
pub mod obs;
pub mod poller;
pub mod provision;
pub mod quality;
pub mod render;
pub mod scheduler;
pub mod summary;
pub mod telemetry;

pub use api::{ApiError, ApiResult, ConversationApi, HttpLabClient, LabApi, ProvisioningApi};

pub use checkpoint::{load_results, BatchArtifact, CheckpointSink, FsCheckpoint};

pub use config::{ApiConfig, DesignConfig, PollConfig, SchedulerConfig};

pub use domain::{
    design_digest, BatchState, BehaviorVariant, CompletionOutcome, ConversationRecord,
    ConvolabError, ExperimentSpec, MessageRecord, ModelSettings, PartialHandle, Result,
    ScenarioDefinition, UnitHandle, UnitKey, UnitResult, UnitStatus,
};

pub use enumerate::{enumerate, BehaviorFilter, DesignAxis};

pub use export::export_unit;

pub use poller::{await_completion, StabilityTracker};

pub use provision::{provision, ProvisionFailure, ProvisionSettings, ProvisionStep};

pub use quality::{
    parse_dialogue, render_quality_report, FixStats, FixedDialogue, QualityChecker, QualityReport,
};

pub use render::{render_dialogue, render_dialogue_in};

pub use scheduler::BatchScheduler;

pub use summary::{render_results_csv, render_summary, render_summary_table, BatchSummary};

pub use metrics::{MetricsSnapshot, METRICS};

pub use obs::BatchSpan;

pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
