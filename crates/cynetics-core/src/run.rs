use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// One end-to-end invocation of the workflow for a single project description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub description: String,
    /// Free-form tech-stack preferences, passed through to the Plan phase.
    #[serde(default)]
    pub tech_stack: Option<serde_json::Value>,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(description: impl Into<String>, tech_stack: Option<serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            tech_stack,
            phase: Phase::Specify,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to the next phase and bump `updated_at`.
    pub fn advance(&mut self) -> Phase {
        self.enter(self.phase.next());
        self.phase
    }

    /// Jump to an explicit phase (resume entry point).
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    pub fn is_done(&self) -> bool {
        self.phase.is_terminal()
    }
}
