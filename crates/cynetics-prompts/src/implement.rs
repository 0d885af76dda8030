use crate::context::PromptContext;

/// Append implement-phase instructions: the task's criteria, the outputs of
/// its direct dependencies and, on a retry, why the last attempt was rejected.
pub fn append_instructions(prompt: &mut String, ctx: &PromptContext) {
    if let Some(ref task) = ctx.task {
        if !task.acceptance_criteria.is_empty() {
            prompt.push_str("## Acceptance Criteria\n\n");
            for criterion in &task.acceptance_criteria {
                prompt.push_str(&format!("- {criterion}\n"));
            }
            prompt.push('\n');
        }

        if !task.files_to_modify.is_empty() {
            prompt.push_str("## Files\n\n");
            for file in &task.files_to_modify {
                prompt.push_str(&format!("- {file}\n"));
            }
            prompt.push('\n');
        }

        if let Some(ref plan) = task.test_plan {
            prompt.push_str(&format!("## Test Plan\n\n{plan}\n\n"));
        }
    }

    if !ctx.upstream.is_empty() {
        prompt.push_str("## Completed Dependencies\n\n");
        for up in &ctx.upstream {
            prompt.push_str(&format!("### {} ({})\n\n{}\n\n", up.title, up.id, up.output));
        }
    }

    if let Some(ref error) = ctx.previous_error {
        prompt.push_str("## Previous Attempt\n\n");
        prompt.push_str(&format!(
            "The previous attempt was rejected: {error}\nFix these problems in this attempt.\n\n"
        ));
    }

    prompt.push_str("## Instructions\n\n");
    prompt.push_str(
        "Implement this task so that every acceptance criterion holds. \
         For each file you create or change, write a line of the form\n\n\
         #### FILE: relative/path\n\n\
         followed by a fenced code block with the complete file contents. \
         Paths are relative to the workspace root. \
         Explain briefly what you did after the files.\n",
    );
}
