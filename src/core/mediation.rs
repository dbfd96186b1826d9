//! Runs a resource's in-sequence and, when it stops, its fault sequence.
//!
//! ```text
//! Pending -> Executing(inSequence) -> Succeeded
//!                     |
//!                     +-> Executing(faultSequence) -> Faulted
//! ```
//!
//! The engine keeps no state between messages; everything a mediator does is
//! visible only through the [`MessageContext`] it was handed.
use std::fmt;

use super::{
    artifacts::{MediationError, Position, Resource, Sequence},
    message_context::MessageContext,
};

/// How one pass over a sequence ended.
#[derive(Debug)]
pub enum SequenceResult {
    /// Every mediator asked to continue.
    Completed,
    /// A mediator returned `continue = false`.
    Halted {
        index: usize,
        mediator: &'static str,
        position: Position,
    },
    /// A mediator returned an error.
    Failed {
        index: usize,
        mediator: &'static str,
        error: MediationError,
    },
}

impl SequenceResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, SequenceResult::Completed)
    }
}

impl fmt::Display for SequenceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceResult::Completed => f.write_str("completed"),
            SequenceResult::Halted {
                index,
                mediator,
                position,
            } => write!(f, "halted by {mediator} #{index} at {position}"),
            SequenceResult::Failed {
                index,
                mediator,
                error,
            } => write!(f, "failed in {mediator} #{index}: {error}"),
        }
    }
}

/// Final state of a message.
#[derive(Debug)]
pub enum MediationOutcome {
    Succeeded,
    /// The in-sequence stopped; `fault` records how the fault sequence went.
    Faulted {
        cause: SequenceResult,
        fault: SequenceResult,
    },
}

impl MediationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MediationOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MediationEngine;

impl MediationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Execute `sequence` in declared order, stopping at the first mediator
    /// that halts or fails.
    pub fn run_sequence(&self, sequence: &Sequence, ctx: &mut MessageContext) -> SequenceResult {
        for (index, mediator) in sequence.mediators.iter().enumerate() {
            tracing::trace!(
                message_id = %ctx.id(),
                mediator = mediator.kind(),
                position = %mediator.position(),
                "executing mediator"
            );
            match mediator.execute(ctx) {
                Ok(true) => {}
                Ok(false) => {
                    return SequenceResult::Halted {
                        index,
                        mediator: mediator.kind(),
                        position: mediator.position().clone(),
                    };
                }
                Err(error) => {
                    return SequenceResult::Failed {
                        index,
                        mediator: mediator.kind(),
                        error,
                    };
                }
            }
        }
        SequenceResult::Completed
    }

    /// Run `in_sequence`; on halt or failure run `fault_sequence` against the
    /// same (already mutated) context. A failing fault sequence is final.
    pub fn mediate(
        &self,
        in_sequence: &Sequence,
        fault_sequence: &Sequence,
        ctx: &mut MessageContext,
    ) -> MediationOutcome {
        let message_id = ctx.id();
        tracing::debug!(
            %message_id,
            sequence = %in_sequence.position.hierarchy,
            "mediation started"
        );

        let cause = self.run_sequence(in_sequence, ctx);
        if cause.is_completed() {
            tracing::debug!(%message_id, "mediation succeeded");
            return MediationOutcome::Succeeded;
        }

        tracing::warn!(
            %message_id,
            sequence = %in_sequence.position.hierarchy,
            cause = %cause,
            "in-sequence stopped, running fault sequence"
        );
        let fault = self.run_sequence(fault_sequence, ctx);
        if !fault.is_completed() {
            tracing::error!(
                %message_id,
                sequence = %fault_sequence.position.hierarchy,
                result = %fault,
                "fault sequence did not complete"
            );
        }
        MediationOutcome::Faulted { cause, fault }
    }

    pub fn mediate_resource(
        &self,
        resource: &Resource,
        ctx: &mut MessageContext,
    ) -> MediationOutcome {
        self.mediate(&resource.in_sequence, &resource.fault_sequence, ctx)
    }
}
