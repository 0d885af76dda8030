/// Append specify-phase instructions to the prompt.
pub fn append_instructions(prompt: &mut String) {
    prompt.push_str("## Instructions\n\n");
    prompt.push_str(
        "Generate a detailed, user-centric specification for the description above. \
         Focus on who the users are and what they need, not on implementation.\n\n\
         Respond with a single JSON object with these keys:\n\
         - `problem_statement`: string\n\
         - `target_users`: array of strings\n\
         - `user_journeys`: array of objects with `journey` and `steps`\n\
         - `success_criteria`: array of strings\n\
         - `constraints`: array of strings\n\n\
         Output only the JSON object.\n",
    );
}
