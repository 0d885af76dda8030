/// Append plan-phase instructions to the prompt.
pub fn append_instructions(prompt: &mut String) {
    prompt.push_str("## Instructions\n\n");
    prompt.push_str(
        "Based on the specification above, create a technical plan. \
         Honor the tech preferences when they are given and record the \
         alternatives you rejected.\n\n\
         Respond with a single JSON object with these keys:\n\
         - `architecture`: string\n\
         - `tech_stack`: object\n\
         - `components`: array\n\
         - `data_models`: array\n\
         - `api_design`: object\n\
         - `infrastructure`: object\n\
         - `dependencies`: array\n\
         - `alternatives`: array\n\n\
         Output only the JSON object.\n",
    );
}
