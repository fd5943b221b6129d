use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of an application's preparation.
///
/// ```text
/// pending ──► preparing ──► ready
///                 │   ▲       │
///                 ▼   └───────┤ (re-run)
///              failed ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreparationStatus {
    Pending,
    Preparing,
    Ready,
    Failed,
}

impl PreparationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreparationStatus::Pending => "pending",
            PreparationStatus::Preparing => "preparing",
            PreparationStatus::Ready => "ready",
            PreparationStatus::Failed => "failed",
        }
    }

    /// Every path to `ready` or `failed` goes through `preparing`.
    pub fn can_transition_to(self, next: PreparationStatus) -> bool {
        use PreparationStatus::*;
        matches!(
            (self, next),
            (Pending, Preparing)
                | (Preparing, Ready)
                | (Preparing, Failed)
                | (Ready, Preparing)
                | (Failed, Preparing)
        )
    }
}

impl fmt::Display for PreparationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreparationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PreparationStatus::Pending),
            "preparing" => Ok(PreparationStatus::Preparing),
            "ready" => Ok(PreparationStatus::Ready),
            "failed" => Ok(PreparationStatus::Failed),
            other => Err(format!("unknown preparation status '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal preparation transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: PreparationStatus,
    pub to: PreparationStatus,
}

/// The generation steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparationStep {
    Analysis,
    TailoredCv,
    CoverLetter,
}

impl PreparationStep {
    pub fn key(&self) -> &'static str {
        match self {
            PreparationStep::Analysis => "analysis",
            PreparationStep::TailoredCv => "tailored_cv",
            PreparationStep::CoverLetter => "cover_letter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationState {
    pub application_id: Uuid,
    pub status: PreparationStatus,
    pub cover_letter: Option<String>,
    pub tailored_cv: Option<String>,
    pub metadata: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl PreparationState {
    pub fn new(application_id: Uuid) -> Self {
        Self {
            application_id,
            status: PreparationStatus::Pending,
            cover_letter: None,
            tailored_cv: None,
            metadata: Map::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, next: PreparationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
