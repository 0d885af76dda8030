use cynetics_core::TaskSpec;

/// The slice of a task descriptor that is rendered into an Implement prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBrief {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub files_to_modify: Vec<String>,
    pub test_plan: Option<String>,
}

impl TaskBrief {
    pub fn from_spec(spec: &TaskSpec) -> Self {
        Self {
            id: spec.id.clone(),
            title: spec.title.clone(),
            description: spec.description.clone(),
            acceptance_criteria: spec.acceptance_criteria.clone(),
            files_to_modify: spec.files_to_modify.clone(),
            test_plan: spec.test_plan.clone(),
        }
    }
}

/// Output of a direct dependency, fed forward into its dependents' prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamOutput {
    pub id: String,
    pub title: String,
    pub output: String,
}

/// Everything accumulated so far in a run that a prompt may draw on.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub project_name: String,
    pub description: String,
    pub tech_stack: Option<String>,
    pub specification: Option<String>,
    pub plan: Option<String>,
    pub task: Option<TaskBrief>,
    pub upstream: Vec<UpstreamOutput>,
    /// Why the previous attempt at this task was rejected.
    pub previous_error: Option<String>,
}

impl PromptContext {
    pub fn new(project_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Render the shared preamble: project header, description, spec, plan, task.
    pub fn append_preamble(&self, prompt: &mut String) {
        if !self.project_name.is_empty() {
            prompt.push_str(&format!("# Project: {}\n\n", self.project_name));
        }
        prompt.push_str(&format!("## Description\n\n{}\n\n", self.description));

        if let Some(ref stack) = self.tech_stack {
            prompt.push_str("## Tech Preferences\n\n");
            prompt.push_str(stack);
            prompt.push_str("\n\n");
        }

        if let Some(ref spec) = self.specification {
            prompt.push_str("## Specification\n\n");
            prompt.push_str(spec);
            prompt.push_str("\n\n");
        }

        if let Some(ref plan) = self.plan {
            prompt.push_str("## Technical Plan\n\n");
            prompt.push_str(plan);
            prompt.push_str("\n\n");
        }

        if let Some(ref task) = self.task {
            if task.title.is_empty() || task.title == task.id {
                prompt.push_str(&format!("# Task: {}\n\n", task.id));
            } else {
                prompt.push_str(&format!("# Task: {} - {}\n\n", task.id, task.title));
            }
            prompt.push_str(&format!("{}\n\n", task.description));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ctx() -> PromptContext {
        PromptContext::new("TestProject", "Do the thing")
    }

    fn render(ctx: &PromptContext) -> String {
        let mut out = String::new();
        ctx.append_preamble(&mut out);
        out
    }

    #[test]
    fn preamble_minimal() {
        let out = render(&minimal_ctx());
        assert!(out.contains("# Project: TestProject"));
        assert!(out.contains("## Description"));
        assert!(out.contains("Do the thing"));
        assert!(!out.contains("## Specification"));
        assert!(!out.contains("# Task:"));
    }

    #[test]
    fn preamble_without_project_name() {
        let ctx = PromptContext::new("", "desc");
        assert!(!render(&ctx).contains("# Project:"));
    }

    #[test]
    fn preamble_with_spec_and_plan() {
        let mut ctx = minimal_ctx();
        ctx.specification = Some("The spec body".into());
        ctx.plan = Some("The plan body".into());
        let out = render(&ctx);
        assert!(out.contains("## Specification\n\nThe spec body"));
        assert!(out.contains("## Technical Plan\n\nThe plan body"));
        assert!(out.find("## Specification") < out.find("## Technical Plan"));
    }

    #[test]
    fn preamble_with_task_title() {
        let mut ctx = minimal_ctx();
        let mut spec = TaskSpec::new("3", "Add login form");
        spec.title = "Login".into();
        ctx.task = Some(TaskBrief::from_spec(&spec));
        let out = render(&ctx);
        assert!(out.contains("# Task: 3 - Login"));
        assert!(out.contains("Add login form"));
    }
}
