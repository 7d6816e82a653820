//! The fixed pipeline graph.
//!
//! ```text
//! Start ──> Scanning ──(no errors)──> Done(clean)
//!               │
//!               └──> Fixing ──> Validating ──(approved)──> Done(approved)
//!                                   │
//!                                   ├──(cycle limit)──> Done(iteration limit)
//!                                   └──(retry)──> Scanning
//! ```
//!
//! `route` is called with `phase` naming the stage whose result was just
//! merged (or `Start`). It never mutates; the orchestrator applies the
//! returned transition and is the only place `iteration` changes.

use mender_common::Stage;

use crate::errors::InvariantViolation;
use crate::pipeline::state::{Outcome, Phase, RunState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Clean,
    Approved,
    IterationLimitReached,
}

impl Completion {
    pub fn outcome(self) -> Outcome {
        match self {
            Self::Clean => Outcome::Clean,
            Self::Approved => Outcome::Approved,
            Self::IterationLimitReached => Outcome::IterationLimitReached,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stage(Stage),
    Done(Completion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub target: Target,
    /// A Fixer→Validator cycle finished without approval; `iteration` grows by one.
    pub completes_cycle: bool,
}

impl Transition {
    fn to(stage: Stage) -> Self {
        Self {
            target: Target::Stage(stage),
            completes_cycle: false,
        }
    }

    fn done(completion: Completion) -> Self {
        Self {
            target: Target::Done(completion),
            completes_cycle: false,
        }
    }

    fn counted(mut self) -> Self {
        self.completes_cycle = true;
        self
    }
}

pub fn route(state: &RunState) -> Result<Transition, InvariantViolation> {
    match state.phase {
        Phase::Start => Ok(Transition::to(Stage::Scanner)),
        Phase::Scanning => {
            if state.errors.is_empty() {
                Ok(Transition::done(Completion::Clean))
            } else {
                Ok(Transition::to(Stage::Fixer))
            }
        }
        Phase::Fixing => Ok(Transition::to(Stage::Validator)),
        Phase::Validating => {
            let validation = state.validation.as_ref().ok_or_else(|| {
                InvariantViolation("routing after validation with no result".to_string())
            })?;
            if validation.status.is_approved() {
                Ok(Transition::done(Completion::Approved))
            } else if state.iteration >= state.max_iterations {
                Ok(Transition::done(Completion::IterationLimitReached))
            } else if state.iteration + 1 >= state.max_iterations {
                Ok(Transition::done(Completion::IterationLimitReached).counted())
            } else {
                Ok(Transition::to(Stage::Scanner).counted())
            }
        }
        Phase::Done => Err(InvariantViolation(format!(
            "run {} routed after Done",
            state.run_id
        ))),
    }
}
