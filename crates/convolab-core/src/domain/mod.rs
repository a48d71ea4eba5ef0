//! Domain models for convolab.
//!
//! - `BehaviorVariant`: facilitator configuration, loaded once
//! - `ScenarioDefinition`: optional scenario axis
//! - `ExperimentSpec`: one enumerated unit
//! - `UnitResult` / `BatchState`: terminal per-unit records

pub mod behavior;
pub mod error;
pub mod result;
pub mod scenario;
pub mod spec;

pub use behavior::{BehaviorVariant, ModelSettings};
pub use error::{ConvolabError, Result};
pub use result::{
    BatchState, CompletionOutcome, ConversationRecord, MessageKind, MessageRecord, PartialHandle,
    SenderIdentity, UnitHandle, UnitResult, UnitStatus,
};
pub use scenario::{
    load_scenarios, parse_persona_lines, parse_scenarios, select_one_per_group_size,
    ParticipantPersona, ScenarioDefinition,
};
pub use spec::{design_digest, ExperimentSpec, UnitKey};
