//! Agent System
//!
//! A fixed discussion between specialised roles answers each query:
//!
//! ```text
//! User Query
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Retrieval  │  → knowledge bullets (+ sequence check), no LLM
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Design    │  → workflow proposal            <<STAGE_DONE>>
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Validation  │  → completeness critique        <<STAGE_DONE>>
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Synthesis  │  → final answer                 TERMINATE
//! └─────────────┘
//!      │
//!      ▼
//!  Answer ── or on NeedsFallback ──▶ direct two-call path ──▶ error message
//! ```

pub mod direct;
pub mod orchestrator;
pub mod stages;

pub use orchestrator::{
    FallbackReason, OrchestrationSession, Orchestrator, OrchestratorSettings, PipelineOutcome, StageOutcome,
};
pub use stages::{default_pipeline, PipelineStage, StageKind, STAGE_DONE_MARKER, TERMINATE_MARKER};
