pub mod commands;
pub mod enhance;
pub mod prompt_builder;
pub mod query;
mod runtime;
pub mod significance;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use commands::{AnalysisOutcome, CaptureRequest, Explanation, StatusReport};
pub use enhance::{
    AcceptAll, CaptureOutcome, CaptureSession, CaptureState, Decision, EnhancementPipeline, ReviewDecider,
};
pub use query::{Answer, AnswerResult, CommitFact, QueryEngine, QuerySettings, RankedCommit, SelectedContext, Source};
pub use runtime::{AUTO_ANALYZED_TAG, GitsmartRuntime};
pub use significance::{SignificanceDetector, SignificanceLevel, SignificanceScore};
pub use trigger::{CaptureTrigger, TriggerDecision};
