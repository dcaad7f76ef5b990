//! Per-document pipeline state machine.
//!
//! One structured state object holds the four stage statuses plus the
//! processing level. Transition validity is enforced here, centrally;
//! the store flattens this object into the per-stage columns of the
//! `documents` table and nowhere else mutates statuses.

use crate::models::{Stage, StageStatus};

/// Transition rejected by the state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum StateError {
    /// Stage is disabled by the document's processing level.
    StageDisabled(Stage),
    /// A prior enabled stage has not completed (or been skipped).
    GateNotSatisfied { stage: Stage, blocked_on: Stage },
    /// The requested transition would move a stage backwards.
    InvalidTransition {
        stage: Stage,
        from: StageStatus,
        to: StageStatus,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::StageDisabled(s) => {
                write!(f, "stage {} is disabled at this processing level", s)
            }
            StateError::GateNotSatisfied { stage, blocked_on } => {
                write!(f, "stage {} blocked: {} not completed", stage, blocked_on)
            }
            StateError::InvalidTransition { stage, from, to } => {
                write!(f, "invalid transition for {}: {} -> {}", stage, from, to)
            }
        }
    }
}

impl std::error::Error for StateError {}

/// Stage statuses for one document, gated by its processing level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub processing_level: i64,
    pub extraction: StageStatus,
    pub classification: StageStatus,
    pub metadata: StageStatus,
    pub chunking: StageStatus,
}

impl PipelineState {
    /// Fresh state for a newly created document: all stages pending.
    pub fn new(processing_level: i64) -> Self {
        Self {
            processing_level: processing_level.clamp(1, 4),
            extraction: StageStatus::Pending,
            classification: StageStatus::Pending,
            metadata: StageStatus::Pending,
            chunking: StageStatus::Pending,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Extraction => self.extraction,
            Stage::Classification => self.classification,
            Stage::Metadata => self.metadata,
            Stage::Chunking => self.chunking,
        }
    }

    fn status_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Extraction => &mut self.extraction,
            Stage::Classification => &mut self.classification,
            Stage::Metadata => &mut self.metadata,
            Stage::Chunking => &mut self.chunking,
        }
    }

    /// Whether the processing level enables this stage at all.
    pub fn enabled(&self, stage: Stage) -> bool {
        stage.level() <= self.processing_level
    }

    /// The prior enabled stage that is not yet completed/skipped, if any.
    fn blocking_stage(&self, stage: Stage) -> Option<Stage> {
        Stage::ALL
            .iter()
            .take_while(|s| **s != stage)
            .copied()
            .filter(|s| self.enabled(*s))
            .find(|s| !self.status(*s).satisfies_gate())
    }

    /// A stage may start iff it is enabled, currently `pending` or
    /// `failed` (manual re-run), and every prior enabled stage is
    /// `completed` or `skipped`.
    pub fn can_start(&self, stage: Stage) -> bool {
        self.enabled(stage)
            && matches!(
                self.status(stage),
                StageStatus::Pending | StageStatus::Failed
            )
            && self.blocking_stage(stage).is_none()
    }

    /// Transition a stage to `processing`.
    pub fn begin(&mut self, stage: Stage) -> Result<(), StateError> {
        if !self.enabled(stage) {
            return Err(StateError::StageDisabled(stage));
        }
        if let Some(blocked_on) = self.blocking_stage(stage) {
            return Err(StateError::GateNotSatisfied { stage, blocked_on });
        }
        let from = self.status(stage);
        if !matches!(from, StageStatus::Pending | StageStatus::Failed) {
            return Err(StateError::InvalidTransition {
                stage,
                from,
                to: StageStatus::Processing,
            });
        }
        *self.status_mut(stage) = StageStatus::Processing;
        Ok(())
    }

    /// Transition a stage to `completed`. Only valid from `processing`.
    pub fn complete(&mut self, stage: Stage) -> Result<(), StateError> {
        self.finish(stage, StageStatus::Completed)
    }

    /// Transition a stage to `failed`. Halts automatic progression but
    /// does not invalidate earlier completed stages.
    pub fn fail(&mut self, stage: Stage) -> Result<(), StateError> {
        self.finish(stage, StageStatus::Failed)
    }

    /// Mark a stage `skipped` (inapplicable for this document type).
    /// Counts as satisfying the gate for subsequent stages.
    pub fn skip(&mut self, stage: Stage) -> Result<(), StateError> {
        if !self.enabled(stage) {
            return Err(StateError::StageDisabled(stage));
        }
        let from = self.status(stage);
        if !matches!(
            from,
            StageStatus::Pending | StageStatus::Processing | StageStatus::Failed
        ) {
            return Err(StateError::InvalidTransition {
                stage,
                from,
                to: StageStatus::Skipped,
            });
        }
        *self.status_mut(stage) = StageStatus::Skipped;
        Ok(())
    }

    fn finish(&mut self, stage: Stage, to: StageStatus) -> Result<(), StateError> {
        let from = self.status(stage);
        if from != StageStatus::Processing {
            return Err(StateError::InvalidTransition { stage, from, to });
        }
        *self.status_mut(stage) = to;
        Ok(())
    }

    /// Explicit manual re-run: reset a `failed` stage back to `pending`.
    pub fn reset_failed(&mut self, stage: Stage) -> Result<(), StateError> {
        let from = self.status(stage);
        if from != StageStatus::Failed {
            return Err(StateError::InvalidTransition {
                stage,
                from,
                to: StageStatus::Pending,
            });
        }
        *self.status_mut(stage) = StageStatus::Pending;
        Ok(())
    }

    /// The next stage the orchestrator should attempt, if any.
    pub fn next_runnable(&self) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| {
            self.enabled(*s) && self.status(*s) == StageStatus::Pending && self.can_start(*s)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_all_pending() {
        let s = PipelineState::new(4);
        for stage in Stage::ALL {
            assert_eq!(s.status(stage), StageStatus::Pending);
        }
    }

    #[test]
    fn level_clamped_into_range() {
        assert_eq!(PipelineState::new(0).processing_level, 1);
        assert_eq!(PipelineState::new(9).processing_level, 4);
    }

    #[test]
    fn later_stage_blocked_until_prior_completes() {
        let mut s = PipelineState::new(4);
        assert!(!s.can_start(Stage::Classification));
        assert!(matches!(
            s.begin(Stage::Classification),
            Err(StateError::GateNotSatisfied { .. })
        ));

        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();
        assert!(s.can_start(Stage::Classification));
    }

    #[test]
    fn level_two_document_stops_after_classification() {
        let mut s = PipelineState::new(2);
        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();
        s.begin(Stage::Classification).unwrap();
        s.complete(Stage::Classification).unwrap();

        assert!(!s.enabled(Stage::Metadata));
        assert_eq!(s.begin(Stage::Metadata), Err(StateError::StageDisabled(Stage::Metadata)));
        assert_eq!(s.next_runnable(), None);
    }

    #[test]
    fn failed_stage_halts_chain_but_keeps_earlier_results() {
        let mut s = PipelineState::new(4);
        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();
        s.begin(Stage::Classification).unwrap();
        s.fail(Stage::Classification).unwrap();

        assert_eq!(s.extraction, StageStatus::Completed);
        assert_eq!(s.metadata, StageStatus::Pending);
        assert!(!s.can_start(Stage::Metadata));
        assert_eq!(s.next_runnable(), None);
    }

    #[test]
    fn skipped_stage_satisfies_gate() {
        let mut s = PipelineState::new(4);
        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();
        s.begin(Stage::Classification).unwrap();
        s.complete(Stage::Classification).unwrap();
        s.skip(Stage::Metadata).unwrap();

        assert!(s.can_start(Stage::Chunking));
    }

    #[test]
    fn completed_stage_never_regresses() {
        let mut s = PipelineState::new(4);
        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();

        assert!(s.begin(Stage::Extraction).is_err());
        assert!(s.fail(Stage::Extraction).is_err());
        assert!(s.skip(Stage::Extraction).is_err());
        assert!(s.reset_failed(Stage::Extraction).is_err());
        assert_eq!(s.extraction, StageStatus::Completed);
    }

    #[test]
    fn manual_retry_of_failed_stage() {
        let mut s = PipelineState::new(4);
        s.begin(Stage::Extraction).unwrap();
        s.fail(Stage::Extraction).unwrap();

        s.reset_failed(Stage::Extraction).unwrap();
        assert_eq!(s.extraction, StageStatus::Pending);
        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();
    }

    #[test]
    fn complete_only_from_processing() {
        let mut s = PipelineState::new(4);
        assert!(s.complete(Stage::Extraction).is_err());
    }

    #[test]
    fn next_runnable_walks_in_order() {
        let mut s = PipelineState::new(4);
        assert_eq!(s.next_runnable(), Some(Stage::Extraction));
        s.begin(Stage::Extraction).unwrap();
        s.complete(Stage::Extraction).unwrap();
        assert_eq!(s.next_runnable(), Some(Stage::Classification));
    }
}
