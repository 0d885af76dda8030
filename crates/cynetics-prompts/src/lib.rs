pub mod context;
pub mod implement;
pub mod plan;
pub mod specify;
pub mod tasks;

pub use context::{PromptContext, TaskBrief, UpstreamOutput};
use cynetics_core::Phase;

/// Role text sent as the system message for each generated phase.
pub fn system_prompt(phase: Phase) -> &'static str {
    match phase {
        Phase::Specify => "You are a product specification expert.",
        Phase::Plan => "You are a software architect.",
        Phase::Tasks => "You are a project manager who breaks work into atomic tasks.",
        Phase::Implement => "You are a software engineer.",
        Phase::Done => "",
    }
}

/// Assemble the full prompt for a phase from the accumulated context.
pub fn assemble_prompt(ctx: &PromptContext, phase: Phase) -> String {
    let mut prompt = String::new();
    ctx.append_preamble(&mut prompt);

    match phase {
        Phase::Specify => specify::append_instructions(&mut prompt),
        Phase::Plan => plan::append_instructions(&mut prompt),
        Phase::Tasks => tasks::append_instructions(&mut prompt),
        Phase::Implement => implement::append_instructions(&mut prompt, ctx),
        Phase::Done => {}
    }

    prompt
}
