//! Keyword-lexicon feedback classifier.
//!
//! Three rule sets, evaluated in order:
//! 1. Negated approval ("no, ...", "not good", "don't like") → Reject,
//!    even if an approval word such as "good" appears later.
//! 2. Rejection terms → Reject. Wins over co-occurring approval terms.
//! 3. Approval terms → Approve.
//!
//! Nothing fired → Ambiguous. Matching is whole-word and case-insensitive.

use regex::Regex;
use tracing::debug;

use super::{Classifier, Verdict};

/// A single lexicon entry with its compiled pattern.
#[derive(Debug, Clone)]
pub struct LexiconRule {
    /// Human-readable phrase reported as the rejection reason.
    pub phrase: String,
    /// Compiled, case-insensitive, word-bounded regex.
    pub regex: Regex,
}

impl LexiconRule {
    /// Compile a rule. `pattern` is a regex fragment wrapped in word boundaries.
    pub fn new(phrase: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            phrase: phrase.to_string(),
            regex: Regex::new(&format!(r"(?i)\b(?:{pattern})\b"))?,
        })
    }
}

/// Default negated-approval patterns.
const NEGATIONS: &[(&str, &str)] = &[
    ("leading no", r"^no"),
    ("not good", r"not\s+(?:very\s+|that\s+|quite\s+)?(?:good|great|perfect|excellent|right|there)"),
    ("doesn't sound good", r"doesn'?t\s+(?:sound|look|feel|read)\s+(?:good|great|right)"),
    ("don't like", r"(?:don'?t|do\s+not|didn'?t)\s+(?:like|love)"),
    ("not what i wanted", r"not\s+what\s+i\s+(?:wanted|asked\s+for|had\s+in\s+mind)"),
    ("not happy", r"not\s+(?:happy|a\s+fan|convinced)"),
];

/// Default approval terms.
const APPROVALS: &[(&str, &str)] = &[
    ("yes", r"yes|yep|yeah"),
    ("approved", r"approved?"),
    ("like", r"like|likes|liked"),
    ("love", r"love|loved|loving"),
    ("great", r"great"),
    ("perfect", r"perfect"),
    ("excellent", r"excellent"),
    ("good", r"good"),
    ("amazing", r"amazing"),
    ("fantastic", r"fantastic"),
    ("wonderful", r"wonderful"),
    ("outstanding", r"outstanding"),
    ("publish", r"publish|published"),
    ("post it", r"post\s+it"),
    ("go ahead", r"go\s+ahead"),
    ("that works", r"that\s+works"),
    ("good to go", r"good\s+to\s+go"),
    ("ready to post", r"ready\s+to\s+post"),
    ("lgtm", r"lgtm"),
];

/// Default rejection terms.
const REJECTIONS: &[(&str, &str)] = &[
    ("no", r"no|nope"),
    ("reject", r"reject|rejected"),
    ("bad", r"bad"),
    ("terrible", r"terrible|awful"),
    ("regenerate", r"regenerate|redo"),
    ("rewrite", r"rewrite|re-write"),
    ("change", r"change|changes|changed"),
    ("modify", r"modify|modified"),
    ("edit", r"edit|edits"),
    ("fix", r"fix"),
    ("not right", r"not\s+right"),
    ("doesn't work", r"doesn'?t\s+work"),
    ("try again", r"try\s+again"),
    ("different", r"different"),
    ("not the right tone", r"not\s+the\s+right\s+tone"),
    ("too long", r"too\s+long"),
    ("too short", r"too\s+short"),
    ("too generic", r"too\s+(?:generic|bland|formal|casual|salesy|corporate)"),
    ("make it more", r"make\s+it\s+(?:more|less)"),
    ("shorter", r"shorter|longer"),
];

/// Regex-lexicon implementation of [`Classifier`].
pub struct LexiconClassifier {
    negations: Vec<LexiconRule>,
    approvals: Vec<LexiconRule>,
    rejections: Vec<LexiconRule>,
}

impl LexiconClassifier {
    /// Create a classifier with the default lexicons.
    pub fn default_lexicon() -> Self {
        Self {
            negations: compile(NEGATIONS),
            approvals: compile(APPROVALS),
            rejections: compile(REJECTIONS),
        }
    }

    /// Create a classifier with no rules (for testing).
    pub fn empty() -> Self {
        Self {
            negations: Vec::new(),
            approvals: Vec::new(),
            rejections: Vec::new(),
        }
    }

    /// Add a custom approval term.
    pub fn add_approval(&mut self, phrase: &str, pattern: &str) -> Result<(), regex::Error> {
        self.approvals.push(LexiconRule::new(phrase, pattern)?);
        Ok(())
    }

    /// Add a custom rejection term.
    pub fn add_rejection(&mut self, phrase: &str, pattern: &str) -> Result<(), regex::Error> {
        self.rejections.push(LexiconRule::new(phrase, pattern)?);
        Ok(())
    }

    /// Add a custom negated-approval pattern.
    pub fn add_negation(&mut self, phrase: &str, pattern: &str) -> Result<(), regex::Error> {
        self.negations.push(LexiconRule::new(phrase, pattern)?);
        Ok(())
    }
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::default_lexicon()
    }
}

impl Classifier for LexiconClassifier {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn classify(&self, text: &str) -> Verdict {
        let text = normalize(text);
        if text.is_empty() {
            return Verdict::Ambiguous;
        }

        if let Some(rule) = first_hit(&self.negations, &text) {
            debug!(phrase = %rule.phrase, "Negated approval, short-circuiting to reject");
            return Verdict::Reject {
                reason: rule.phrase.clone(),
            };
        }

        if let Some(rule) = first_hit(&self.rejections, &text) {
            return Verdict::Reject {
                reason: rule.phrase.clone(),
            };
        }

        if first_hit(&self.approvals, &text).is_some() {
            return Verdict::Approve;
        }

        Verdict::Ambiguous
    }
}

fn compile(table: &[(&str, &str)]) -> Vec<LexiconRule> {
    table
        .iter()
        .map(|(phrase, pattern)| {
            LexiconRule::new(phrase, pattern).expect("static lexicon pattern must compile")
        })
        .collect()
}

fn first_hit<'a>(rules: &'a [LexiconRule], text: &str) -> Option<&'a LexiconRule> {
    rules.iter().find(|rule| rule.regex.is_match(text))
}

/// Collapse whitespace, straighten typographic apostrophes and drop leading
/// punctuation so "- no, ..." still counts as a leading "no".
fn normalize(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Verdict {
        LexiconClassifier::default_lexicon().classify(text)
    }

    fn is_reject(v: &Verdict) -> bool {
        matches!(v, Verdict::Reject { .. })
    }

    #[test]
    fn empty_and_whitespace_are_ambiguous() {
        assert_eq!(classify(""), Verdict::Ambiguous);
        assert_eq!(classify("   \n\t"), Verdict::Ambiguous);
    }

    #[test]
    fn approval_phrases() {
        for text in [
            "Yes, I love this, publish it",
            "Looks good to me",
            "perfect",
            "Go ahead",
            "LGTM",
            "That works for me, thanks",
        ] {
            assert_eq!(classify(text), Verdict::Approve, "{text}");
        }
    }

    #[test]
    fn leading_no_beats_later_approval() {
        let verdict = classify("No, too generic, make it more personal");
        assert_eq!(
            verdict,
            Verdict::Reject {
                reason: "leading no".into()
            }
        );
        assert!(is_reject(&classify("no. it's good but not for us")));
    }

    #[test]
    fn negated_approval_is_reject() {
        for text in [
            "This is not good enough",
            "It doesn't sound good",
            "I don't like the opening",
            "Honestly not what I wanted, great effort though",
            "I don\u{2019}t love it",
        ] {
            assert!(is_reject(&classify(text)), "{text}");
        }
    }

    #[test]
    fn rejection_wins_over_approval() {
        let verdict = classify("Great start but too long");
        assert_eq!(
            verdict,
            Verdict::Reject {
                reason: "too long".into()
            }
        );
        assert!(is_reject(&classify("I like it, just change the ending")));
    }

    #[test]
    fn whole_word_matching_only() {
        // "know" and "nothing" must not fire "no"; "goodness" must not fire "good".
        assert_eq!(classify("I know nothing about this"), Verdict::Ambiguous);
        assert_eq!(classify("my goodness"), Verdict::Ambiguous);
    }

    #[test]
    fn unrelated_text_is_ambiguous() {
        assert_eq!(classify("Can we talk tomorrow?"), Verdict::Ambiguous);
    }

    #[test]
    fn custom_rules_extend_lexicon() {
        let mut classifier = LexiconClassifier::empty();
        assert_eq!(classifier.classify("ship it"), Verdict::Ambiguous);
        classifier.add_approval("ship it", r"ship\s+it").unwrap();
        assert_eq!(classifier.classify("Ship it!"), Verdict::Approve);
        classifier.add_rejection("meh", "meh").unwrap();
        assert!(is_reject(&classifier.classify("meh, ship it")));
    }
}
