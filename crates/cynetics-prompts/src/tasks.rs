/// Append tasks-phase instructions to the prompt.
pub fn append_instructions(prompt: &mut String) {
    prompt.push_str("## Instructions\n\n");
    prompt.push_str(
        "Break the plan above into atomic tasks that can each be implemented and \
         checked on their own. Tasks may depend on each other but the dependencies \
         must not form a cycle.\n\n\
         Respond with a JSON array of task objects with these keys:\n\
         - `id`: unique string\n\
         - `title`: string\n\
         - `description`: string\n\
         - `acceptance_criteria`: array of strings\n\
         - `dependencies`: array of task ids that must finish first\n\
         - `estimated_complexity`: one of `low`, `medium`, `high`\n\
         - `files_to_modify`: array of paths\n\
         - `test_plan`: string\n\n\
         Write acceptance criteria that can be checked mechanically where possible, \
         for example `exists: src/main.rs`, `contains: Cargo.toml: tokio` or \
         `run: cargo test`.\n\n\
         Output only the JSON array.\n",
    );
}
