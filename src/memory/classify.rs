//! Keyword heuristic picking a [`RecordKind`] when the caller gives none.
//!
//! Matching is on whole words (multi-word phrases allowed) against the
//! lowercased content. The first kind with a hit wins, in the order
//! postmortem, decision, learning, idea. Anything else is a learning.

use super::types::RecordKind;

const POSTMORTEM: &[&str] = &[
    "postmortem",
    "post mortem",
    "post-mortem",
    "incident",
    "outage",
    "root cause",
    "regression",
    "broke",
    "broken",
    "crash",
    "crashed",
    "went wrong",
    "downtime",
    "rollback",
    "rolled back",
];

const DECISION: &[&str] = &[
    "decided",
    "decide",
    "decision",
    "we will",
    "we'll",
    "chose",
    "choose",
    "use",
    "adopt",
    "adopted",
    "go with",
    "switch to",
    "migrate to",
    "instead of",
    "prefer",
    "standardize",
    "avoid",
    "never use",
];

const LEARNING: &[&str] = &[
    "learned",
    "learnt",
    "til",
    "turns out",
    "turned out",
    "discovered",
    "realized",
    "realised",
    "gotcha",
    "found that",
    "note that",
    "lesson",
];

const IDEA: &[&str] = &[
    "idea",
    "maybe",
    "what if",
    "consider",
    "could",
    "might",
    "would be nice",
    "propose",
    "someday",
    "perhaps",
];

/// Best-effort kind for free text. Never fails.
pub fn classify(content: &str) -> RecordKind {
    let padded = padded_words(content);
    let rules: [(RecordKind, &[&str]); 4] = [
        (RecordKind::Postmortem, POSTMORTEM),
        (RecordKind::Decision, DECISION),
        (RecordKind::Learning, LEARNING),
        (RecordKind::Idea, IDEA),
    ];
    rules
        .into_iter()
        .find(|(_, phrases)| phrases.iter().any(|p| contains_phrase(&padded, p)))
        .map(|(kind, _)| kind)
        .unwrap_or(RecordKind::Learning)
}

/// `" word word word "`: lowercased words joined by single spaces, with
/// hyphens splitting words and apostrophes kept inside them.
fn padded_words(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 2);
    out.push(' ');
    for word in content
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_lowercase());
        out.push(' ');
    }
    out
}

fn contains_phrase(padded: &str, phrase: &str) -> bool {
    let phrase = phrase.replace('-', " ");
    padded.contains(&format!(" {phrase} "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions() {
        assert_eq!(classify("We decided to keep SQLite"), RecordKind::Decision);
        assert_eq!(classify("Use Redis for caching"), RecordKind::Decision);
        assert_eq!(classify("Switch to tokio's mpsc instead of crossbeam"), RecordKind::Decision);
    }

    #[test]
    fn postmortem_outranks_decision() {
        assert_eq!(
            classify("Outage on Friday: root cause was the cache; we will add alerts"),
            RecordKind::Postmortem
        );
        assert_eq!(classify("The post-mortem is in the wiki"), RecordKind::Postmortem);
    }

    #[test]
    fn learnings_and_ideas() {
        assert_eq!(classify("TIL: FTS5 ranks are negative"), RecordKind::Learning);
        assert_eq!(classify("Turns out the parser skips macros"), RecordKind::Learning);
        assert_eq!(classify("What if the index were sharded?"), RecordKind::Idea);
        assert_eq!(classify("Maybe cache parsed trees"), RecordKind::Idea);
    }

    #[test]
    fn whole_words_only() {
        // "user" and "house" contain "use" but are not the word
        assert_eq!(classify("The user house is blue"), RecordKind::Learning);
        assert_eq!(classify(""), RecordKind::Learning);
    }
}
