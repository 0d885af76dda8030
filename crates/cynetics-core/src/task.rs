use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::attempt::ExecutionAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Validating,
    Succeeded,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub const ALL: &[TaskStatus] = &[
        TaskStatus::Pending,
        TaskStatus::Ready,
        TaskStatus::Running,
        TaskStatus::Validating,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Validating => "validating",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Ready => "Ready",
            TaskStatus::Running => "Running",
            TaskStatus::Validating => "Validating",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
            TaskStatus::Blocked => "Blocked",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "ready" => Some(TaskStatus::Ready),
            "running" => Some(TaskStatus::Running),
            "validating" => Some(TaskStatus::Validating),
            "succeeded" => Some(TaskStatus::Succeeded),
            "failed" => Some(TaskStatus::Failed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }

    /// Succeeded, Failed and Blocked never change again within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Blocked
        )
    }

    /// Running or Validating: an attempt is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Validating)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Blocked)
                | (Ready, Running)
                | (Running, Validating)
                | (Running, Ready)
                | (Running, Failed)
                | (Validating, Succeeded)
                | (Validating, Ready)
                | (Validating, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A task descriptor as produced by the Tasks phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "strings_or_numbers")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub estimated_complexity: Option<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub test_plan: Option<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            description: description.into(),
            dependencies: Vec::new(),
            acceptance_criteria: Vec::new(),
            estimated_complexity: None,
            files_to_modify: Vec::new(),
            test_plan: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }
}

/// An atomic unit of work inside a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(flatten)]
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Attempts made within the current attempt budget.
    #[serde(default)]
    pub attempt_count: u32,
    /// Every attempt ever made, across resumes.
    #[serde(default)]
    pub attempts: Vec<ExecutionAttempt>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// The implementation produced by the last successful attempt.
    #[serde(default)]
    pub output: Option<String>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        let status = if spec.dependencies.is_empty() {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        };
        Self {
            spec,
            status,
            attempt_count: 0,
            attempts: Vec::new(),
            last_error: None,
            output: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.spec.dependencies
    }
}

/// Generated task lists sometimes use bare integers as ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Int(i64),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Text(s) => s.trim().to_string(),
            IdRepr::Int(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer).map(String::from)
}

fn strings_or_numbers<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids: Option<Vec<IdRepr>> = Option::deserialize(deserializer)?;
    Ok(ids
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}
