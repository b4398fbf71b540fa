//! Pipeline state machine.
//!
//! ```text
//! Idle -> LoadingCatalog -> Fetching -> Parsing -> Reconciling -> Writing -> Done
//!              \______________\___________\____________\____________\-> Failed
//! ```
//!
//! `Failed` records the stage that failed and the last one that completed.
//! Both `Done` and `Failed` are terminal.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    LoadingCatalog,
    Fetching,
    Parsing,
    Reconciling,
    Writing,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Self::LoadingCatalog,
        Self::Fetching,
        Self::Parsing,
        Self::Reconciling,
        Self::Writing,
    ];

    /// Structured log event emitted on entering this stage.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::LoadingCatalog => "stage.loading_catalog",
            Self::Fetching => "stage.fetching",
            Self::Parsing => "stage.parsing",
            Self::Reconciling => "stage.reconciling",
            Self::Writing => "stage.writing",
        }
    }

    pub fn previous(self) -> Option<Stage> {
        match self {
            Self::LoadingCatalog => None,
            Self::Fetching => Some(Self::LoadingCatalog),
            Self::Parsing => Some(Self::Fetching),
            Self::Reconciling => Some(Self::Parsing),
            Self::Writing => Some(Self::Reconciling),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadingCatalog => "loading catalog",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Reconciling => "reconciling",
            Self::Writing => "writing report",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    LoadingCatalog,
    Fetching,
    Parsing,
    Reconciling,
    Writing,
    Done,
    Failed {
        stage: Stage,
        last_completed: Option<Stage>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal pipeline transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl PipelineState {
    pub fn running(stage: Stage) -> Self {
        match stage {
            Stage::LoadingCatalog => Self::LoadingCatalog,
            Stage::Fetching => Self::Fetching,
            Stage::Parsing => Self::Parsing,
            Stage::Reconciling => Self::Reconciling,
            Stage::Writing => Self::Writing,
        }
    }

    /// The stage being worked on, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::LoadingCatalog => Some(Stage::LoadingCatalog),
            Self::Fetching => Some(Stage::Fetching),
            Self::Parsing => Some(Stage::Parsing),
            Self::Reconciling => Some(Stage::Reconciling),
            Self::Writing => Some(Stage::Writing),
            Self::Idle | Self::Done | Self::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// Successor on the success path.
    pub fn successor(&self) -> Option<PipelineState> {
        match self {
            Self::Idle => Some(Self::LoadingCatalog),
            Self::LoadingCatalog => Some(Self::Fetching),
            Self::Fetching => Some(Self::Parsing),
            Self::Parsing => Some(Self::Reconciling),
            Self::Reconciling => Some(Self::Writing),
            Self::Writing => Some(Self::Done),
            Self::Done | Self::Failed { .. } => None,
        }
    }

    /// The `Failed` state reached by failing now.
    ///
    /// From `Idle` the failure is charged to the first stage.
    pub fn failure(&self) -> Option<PipelineState> {
        let stage = match self {
            Self::Idle => Stage::LoadingCatalog,
            _ => self.stage()?,
        };
        Some(Self::Failed {
            stage,
            last_completed: stage.previous(),
        })
    }

    /// Move to `to` if the machine allows it.
    pub fn transition(self, to: PipelineState) -> Result<PipelineState, TransitionError> {
        if self.successor() == Some(to) || self.failure() == Some(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Done => f.write_str("done"),
            Self::Failed { stage, .. } => write!(f, "failed while {stage}"),
            running => match running.stage() {
                Some(stage) => write!(f, "{stage}"),
                None => Ok(()),
            },
        }
    }
}
