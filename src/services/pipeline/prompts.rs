//! Prompt construction for the generation stages.

use grounded_chat_retrieval::RetrievalResult;

/// Emitted by a stage whose generation failed twice
pub const FALLBACK_THOUGHT: &str = "I'm having trouble forming a thought right now";

fn context_section(context: &[String]) -> String {
    if context.is_empty() {
        "(no earlier conversation)".to_string()
    } else {
        context.join("\n")
    }
}

/// Analytical framing of the user's message. No retrieval.
pub fn plan_prompt(user_input: &str, context: &[String]) -> String {
    format!(
        "Analyse the latest user message and propose how to answer it.\n\
         Identify what is being asked, what is already known from the conversation, \
         and the key points an answer should cover. Be concise.\n\n\
         ## Conversation\n{}\n\n\
         ## Latest message\n{}",
        context_section(context),
        user_input.trim()
    )
}

/// Render successful retrievals as numbered sources.
///
/// Returns `None` when nothing was retrieved successfully.
pub fn grounding_section(results: &[RetrievalResult]) -> Option<String> {
    let sources: Vec<String> = results
        .iter()
        .filter(|r| r.success && !r.content.trim().is_empty())
        .enumerate()
        .map(|(i, r)| {
            let title = r
                .meta("title")
                .or_else(|| r.meta("name"))
                .or_else(|| r.meta("query"))
                .unwrap_or("Untitled");
            let mut header = format!("### Source {}: {}", i + 1, title);
            if let Some(url) = r.meta("url") {
                header.push_str(&format!(" ({})", url));
            }
            format!("{}\n{}", header, r.content.trim())
        })
        .collect();

    if sources.is_empty() {
        None
    } else {
        Some(sources.join("\n\n"))
    }
}

/// Second perspective on the analysis, grounded in retrieved content.
pub fn critique_prompt(
    user_input: &str,
    context: &[String],
    plan: &str,
    results: &[RetrievalResult],
    retrieval_attempted: bool,
) -> String {
    let grounding = match grounding_section(results) {
        Some(sources) => format!(
            "## Retrieved material\nPrefer these sources over memory when they disagree, \
             and note which claims they support.\n\n{}",
            sources
        ),
        None if retrieval_attempted => "## Retrieved material\nNothing could be retrieved. \
             Flag any claim that depends on current or external facts as unverified."
            .to_string(),
        None => String::new(),
    };

    let mut prompt = format!(
        "Review the analysis below. Point out gaps, mistakes or unsupported assumptions, \
         and offer an alternative angle where it helps.\n\n\
         ## Conversation\n{}\n\n\
         ## Latest message\n{}\n\n\
         ## Analysis\n{}",
        context_section(context),
        user_input.trim(),
        plan.trim()
    );
    if !grounding.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&grounding);
    }
    prompt
}

/// Final first-person reply. Earlier outputs are presented as the
/// assistant's own notes so the reply reads as a single voice.
pub fn synthesis_prompt(user_input: &str, context: &[String], plan: &str, critique: &str) -> String {
    format!(
        "Write your reply to the latest user message in the first person, as one coherent voice. \
         Use your notes below, resolve any disagreement between them, and do not mention the \
         notes or how they were produced.\n\n\
         ## Conversation\n{}\n\n\
         ## Latest message\n{}\n\n\
         ## Your notes\n{}\n\n{}",
        context_section(context),
        user_input.trim(),
        plan.trim(),
        critique.trim()
    )
}
