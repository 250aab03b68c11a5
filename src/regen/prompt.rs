//! Regeneration prompt construction.

use crate::memory::MemoryEntry;

/// Keyword groups that turn free-text feedback into concrete instructions.
/// Within a group the first match wins.
const TONE_TRIGGERS: &[&str] = &["tone", "voice", "sounds"];
const TONE_GUIDANCE: &[(&[&str], &str)] = &[
    (&["formal", "professional", "business"], "Adjust tone to be more professional and business-like"),
    (&["casual", "friendly", "conversational"], "Make tone more casual and conversational"),
    (&["direct", "straightforward"], "Make tone more direct and straightforward"),
];
const LENGTH_GUIDANCE: &[(&[&str], &str)] = &[
    (&["long", "lengthy", "too much", "shorter"], "Make the post shorter and more concise"),
    (&["short", "brief", "not enough", "longer"], "Make the post longer with more detail"),
];
const CONTENT_GUIDANCE: &[(&[&str], &str)] = &[
    (&["story", "example", "experience", "personal"], "Include more personal stories or examples"),
    (&["tips", "advice", "strategies"], "Focus more on actionable tips and strategies"),
    (&["different", "another", "alternative"], "Take a completely different approach to the topic"),
];
const DEFAULT_GUIDANCE: &str = "Create a fresh take on the topic";

/// Concrete rewrite instructions derived from feedback. Never empty.
pub fn feedback_guidance(feedback: &str) -> Vec<&'static str> {
    let lower = feedback.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    let first_match = |table: &[(&[&str], &'static str)]| {
        table
            .iter()
            .find(|(words, _)| mentions(words))
            .map(|(_, guidance)| *guidance)
    };

    let mut guidance = Vec::new();
    if mentions(TONE_TRIGGERS) {
        guidance.extend(first_match(TONE_GUIDANCE));
    }
    guidance.extend(first_match(LENGTH_GUIDANCE));
    guidance.extend(first_match(CONTENT_GUIDANCE));

    if guidance.is_empty() {
        guidance.push(DEFAULT_GUIDANCE);
    }
    guidance
}

/// Numbered block of approved posts for style conditioning.
/// `None` when there is nothing to show.
pub fn exemplar_block(entries: &[MemoryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let mut block = String::from("Here are ALL past posts that the client approved:\n");
    for (i, entry) in entries.iter().enumerate() {
        block.push_str(&format!("\n[{}] Topic: {}\n{}\n", i + 1, entry.topic, entry.content.trim()));
    }
    block.push_str(
        "\nStudy these patterns and create a post that fits naturally with this collection. \
         Match their voice, sentence rhythm, formatting and length. Do not copy their content.\n",
    );
    Some(block)
}

/// Full prompt for regenerating `content` in response to `feedback`.
pub fn build_regeneration_prompt(
    topic: &str,
    content: &str,
    feedback: &str,
    exemplars: &[MemoryEntry],
    attempt: u32,
) -> String {
    let mut prompt = String::with_capacity(1024 + content.len());

    prompt.push_str("REGENERATE this post based on client feedback.\n\n");
    prompt.push_str(&format!("TOPIC:\n{topic}\n\n"));
    prompt.push_str(&format!("ORIGINAL POST:\n{}\n\n", content.trim()));
    prompt.push_str(&format!("CLIENT FEEDBACK:\n{}\n\n", feedback.trim()));

    if let Some(block) = exemplar_block(exemplars) {
        prompt.push_str(&block);
        prompt.push('\n');
    }

    prompt.push_str("INSTRUCTIONS:\n");
    prompt.push_str("- Create a NEW post on the same topic\n");
    for line in feedback_guidance(feedback) {
        prompt.push_str(&format!("- {line}\n"));
    }
    prompt.push_str("- Make it clearly different from the original\n");
    prompt.push_str("- Keep it engaging and authentic\n");
    if attempt > 1 {
        prompt.push_str(&format!(
            "- This is revision {attempt}; earlier revisions were also rejected\n"
        ));
    }
    prompt.push_str("\nReturn only the new post:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guidance_from_keywords() {
        assert_eq!(
            feedback_guidance("The tone is too formal and way too long"),
            vec![
                "Adjust tone to be more professional and business-like",
                "Make the post shorter and more concise"
            ]
        );
        assert_eq!(
            feedback_guidance("Needs a personal story"),
            vec!["Include more personal stories or examples"]
        );
        // "formal" without a tone trigger adds no tone line.
        assert_eq!(feedback_guidance("formal"), vec![DEFAULT_GUIDANCE]);
        assert_eq!(feedback_guidance(""), vec![DEFAULT_GUIDANCE]);
    }

    #[test]
    fn exemplar_block_lists_posts_in_order() {
        assert!(exemplar_block(&[]).is_none());

        let entries = vec![
            MemoryEntry::new("sam", "pricing", "Newest post"),
            MemoryEntry::new("sam", "hiring", "Older post"),
        ];
        let block = exemplar_block(&entries).unwrap();
        let newest = block.find("[1] Topic: pricing").unwrap();
        let older = block.find("[2] Topic: hiring").unwrap();
        assert!(newest < older);
        assert!(block.contains("Study these patterns"));
    }

    #[test]
    fn prompt_contains_all_parts() {
        let exemplars = vec![MemoryEntry::new("sam", "culture", "An approved post")];
        let prompt = build_regeneration_prompt(
            "remote work",
            "Old draft",
            "No, too generic, make it more personal",
            &exemplars,
            2,
        );
        assert!(prompt.contains("TOPIC:\nremote work"));
        assert!(prompt.contains("ORIGINAL POST:\nOld draft"));
        assert!(prompt.contains("CLIENT FEEDBACK:\nNo, too generic, make it more personal"));
        assert!(prompt.contains("An approved post"));
        assert!(prompt.contains("Include more personal stories or examples"));
        assert!(prompt.contains("revision 2"));
    }

    #[test]
    fn prompt_without_memory_omits_block() {
        let prompt = build_regeneration_prompt("t", "c", "redo", &[], 1);
        assert!(!prompt.contains("past posts"));
        assert!(!prompt.contains("revision"));
    }
}
