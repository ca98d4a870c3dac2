/// Retrieval query text and generation prompt composition.
use std::fmt::Write as _;

use crate::model::{ProjectBrief, RetrievedNeighbor, SectionSpec};

pub const SYSTEM_PROMPT: &str = "You are an expert tender document generator.";

/// Text embedded to find historical examples for a section: display name, title and
/// description, cut to the embedding provider's input limit.
pub fn query_text(spec: &SectionSpec, brief: &ProjectBrief, max_chars: usize) -> String {
    let text = format!(
        "{} {} {}",
        spec.display_name,
        brief.title.trim(),
        brief.description.trim()
    );
    truncate_chars(&text, max_chars).to_string()
}

/// Keep the first `max_chars` characters, never splitting a UTF-8 code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Full generation prompt for one section.
pub fn build_prompt(
    spec: &SectionSpec,
    brief: &ProjectBrief,
    neighbors: &[RetrievedNeighbor],
) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are an expert tender document writer. Generate the {name} section for a new tender \
         based on the following project details and example sections.",
        name = spec.display_name
    );
    let _ = writeln!(
        prompt,
        "The {name} section {purpose}.",
        name = spec.display_name,
        purpose = spec.purpose
    );

    prompt.push_str("\nProject Details:\n");
    let _ = writeln!(prompt, "Title: {}", brief.title.trim());
    let _ = writeln!(prompt, "Location: {}", brief.location.trim());
    let _ = writeln!(prompt, "Duration: {}", brief.duration.trim());
    let _ = writeln!(prompt, "Budget: {}", brief.budget_display());
    let _ = writeln!(prompt, "Description: {}", brief.description.trim());

    prompt.push_str("\nSimilar Examples from Other Tenders:\n");
    if neighbors.is_empty() {
        prompt.push_str("(no comparable historical sections were found)\n");
    }
    for (i, neighbor) in neighbors.iter().enumerate() {
        let _ = writeln!(prompt, "Example {}:\n{}\n", i + 1, neighbor.text.trim());
    }

    let _ = write!(
        prompt,
        "\nPlease generate a professional and detailed {name} section that follows the style and \
         format of the examples while being specific to this project. The content should be \
         practical, clear, and legally sound. Return only the section body.",
        name = spec.display_name
    );

    prompt
}
