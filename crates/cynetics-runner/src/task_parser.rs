//! Reduce free-form generation output to the JSON it carries.
//!
//! Models wrap JSON in prose or code fences. Everything from the first
//! opening bracket to the last matching closing bracket is taken as the
//! payload; text around it is discarded.

use cynetics_core::TaskSpec;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskListError {
    #[error("no task list found in response")]
    NotFound,

    #[error("task list is not valid: {0}")]
    Invalid(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskListDoc {
    List(Vec<TaskSpec>),
    Wrapped { tasks: Vec<TaskSpec> },
}

impl From<TaskListDoc> for Vec<TaskSpec> {
    fn from(doc: TaskListDoc) -> Self {
        match doc {
            TaskListDoc::List(tasks) | TaskListDoc::Wrapped { tasks } => tasks,
        }
    }
}

/// The span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    span(text, '{', '}')
}

/// The span from the first `[` to the last `]`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    span(text, '[', ']')
}

fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a Tasks-phase response: a bare array of task objects, or an object
/// with a `tasks` array.
pub fn parse_task_list(text: &str) -> Result<Vec<TaskSpec>, TaskListError> {
    let candidates = [
        Some(text.trim()),
        extract_json_array(text),
        extract_json_object(text),
    ];

    let mut last_error = None;
    let mut saw_json = false;
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str::<TaskListDoc>(candidate) {
            Ok(doc) => return Ok(doc.into()),
            Err(e) => {
                if serde_json::from_str::<Value>(candidate).is_ok() {
                    saw_json = true;
                    last_error = Some(e.to_string());
                }
            }
        }
    }

    match (saw_json, last_error) {
        (true, Some(message)) => Err(TaskListError::Invalid(message)),
        _ => Err(TaskListError::NotFound),
    }
}

/// Normalize a Specify/Plan response for storage: the embedded JSON object
/// when there is one, otherwise the raw text as a JSON string.
pub fn normalize_document(text: &str) -> Value {
    extract_json_object(text)
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::String(text.trim().to_string()))
}

/// Render a stored document back into prompt text.
pub fn render_document(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
