//! Read-only analysis over a set of records: counts, recurring tags and
//! terms, and decisions that contradict each other.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::store::MemoryStore;
use super::types::{RecallFilter, Record, RecordKind};
use crate::error::StoreResult;

/// Terms reported at most.
const MAX_TERMS: usize = 10;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "been", "before", "being", "between", "both",
    "could", "does", "doing", "each", "from", "have", "having", "here", "into", "just", "like",
    "more", "most", "much", "must", "only", "other", "over", "same", "should", "since", "some",
    "such", "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "very", "want", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your",
];

/// Verb phrases that adopt the following word.
const ADOPT: &[&[&str]] = &[
    &["use"],
    &["uses"],
    &["using"],
    &["adopt"],
    &["chose"],
    &["choose"],
    &["prefer"],
    &["switch", "to"],
    &["go", "with"],
    &["migrate", "to"],
    &["standardize", "on"],
];

/// Phrases that reject the following word. Checked before [`ADOPT`] so
/// "do not use" is not read as "use".
const REJECT: &[&[&str]] = &[
    &["avoid"],
    &["reject"],
    &["rejected"],
    &["don't", "use"],
    &["do", "not", "use"],
    &["never", "use"],
    &["stop", "using"],
    &["instead", "of"],
];

const ARTICLES: &[&str] = &["a", "an", "the"];

/// Words that end a subject phrase.
const SUBJECT_END: &[&str] = &[
    "and", "or", "but", "because", "since", "instead", "so", "over", "rather", "than",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub total: usize,
    pub by_kind: BTreeMap<RecordKind, usize>,
    pub by_scope: BTreeMap<String, usize>,
    pub recurring_tags: Vec<Pattern>,
    pub recurring_terms: Vec<Pattern>,
    pub contradictions: Vec<Contradiction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    pub value: String,
    /// Records it occurs in.
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two decisions pick different options for one subject.
    ConflictingChoice,
    /// One decision adopts what another rejects.
    AdoptReject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    pub kind: ConflictKind,
    pub subject: String,
    pub first: String,
    pub second: String,
    pub detail: String,
}

/// One adopt-or-reject statement inside a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Stance {
    choice: String,
    subject: Option<String>,
    adopt: bool,
}

impl MemoryStore {
    /// Analyze every record matching `filter`. Query and limit are ignored.
    pub fn reflect(&self, filter: &RecallFilter) -> StoreResult<Reflection> {
        let records = self.records(filter)?;
        Ok(reflect_over(&records))
    }
}

pub fn reflect_over(records: &[Record]) -> Reflection {
    let mut by_kind = BTreeMap::new();
    let mut by_scope = BTreeMap::new();
    for record in records {
        *by_kind.entry(record.kind).or_insert(0) += 1;
        *by_scope.entry(record.scope.as_str().to_string()).or_insert(0) += 1;
    }

    let tag_sets = records.iter().map(|r| r.tags.iter().cloned().collect::<HashSet<_>>());
    let recurring_tags = recurring(tag_sets);

    let term_sets = records.iter().map(|r| terms(&r.content));
    let mut recurring_terms = recurring(term_sets);
    recurring_terms.truncate(MAX_TERMS);

    Reflection {
        total: records.len(),
        by_kind,
        by_scope,
        recurring_tags,
        recurring_terms,
        contradictions: contradictions(records),
    }
}

/// Values present in at least two sets, by descending count.
fn recurring(sets: impl Iterator<Item = HashSet<String>>) -> Vec<Pattern> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for set in sets {
        for value in set {
            *counts.entry(value).or_insert(0) += 1;
        }
    }
    let mut patterns: Vec<Pattern> = counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(value, count)| Pattern { value, count })
        .collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    patterns
}

fn terms(content: &str) -> HashSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

fn contradictions(records: &[Record]) -> Vec<Contradiction> {
    let decisions: Vec<(&Record, Vec<Stance>)> = records
        .iter()
        .filter(|r| r.kind == RecordKind::Decision)
        .map(|r| (r, stances(&r.content)))
        .filter(|(_, s)| !s.is_empty())
        .collect();

    let mut found: Vec<Contradiction> = Vec::new();
    for (i, (a, a_stances)) in decisions.iter().enumerate() {
        for (b, b_stances) in &decisions[i + 1..] {
            let mut seen: HashSet<(ConflictKind, String)> = HashSet::new();
            for x in a_stances {
                for y in b_stances {
                    let Some((kind, subject, detail)) = conflict(x, y) else {
                        continue;
                    };
                    if seen.insert((kind, subject.clone())) {
                        found.push(Contradiction {
                            kind,
                            subject,
                            first: a.id.clone(),
                            second: b.id.clone(),
                            detail,
                        });
                    }
                }
            }
        }
    }
    found
}

fn conflict(x: &Stance, y: &Stance) -> Option<(ConflictKind, String, String)> {
    match (x.adopt, y.adopt) {
        (true, true) => {
            let subject = x.subject.as_ref()?;
            (y.subject.as_ref() == Some(subject) && x.choice != y.choice).then(|| {
                (
                    ConflictKind::ConflictingChoice,
                    subject.clone(),
                    format!("'{}' vs '{}' for {}", x.choice, y.choice, subject),
                )
            })
        }
        (true, false) | (false, true) => (x.choice == y.choice).then(|| {
            (
                ConflictKind::AdoptReject,
                x.choice.clone(),
                format!("'{}' is both adopted and rejected", x.choice),
            )
        }),
        (false, false) => None,
    }
}

/// Lowercased words, each flagged when a clause ends after it.
fn words(content: &str) -> Vec<(String, bool)> {
    content
        .split_whitespace()
        .filter_map(|raw| {
            let ends = raw.ends_with(['.', ',', ';', ':', '!', '?', ')']);
            let word = raw
                .trim_matches(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '+' || c == '#'))
                .trim_matches('\'')
                .to_lowercase();
            (!word.is_empty()).then_some((word, ends))
        })
        .collect()
}

fn stances(content: &str) -> Vec<Stance> {
    let words = words(content);
    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let matched = match_phrase(&words, i, REJECT)
            .map(|len| (len, false))
            .or_else(|| match_phrase(&words, i, ADOPT).map(|len| (len, true)));
        let Some((len, adopt)) = matched else {
            i += 1;
            continue;
        };
        let mut j = i + len;
        // the phrase itself must not end the clause
        if words[j - 1].1 {
            i = j;
            continue;
        }
        while j < words.len() && ARTICLES.contains(&words[j].0.as_str()) && !words[j].1 {
            j += 1;
        }
        let Some((choice, choice_ends)) = words.get(j) else {
            break;
        };
        let subject = if *choice_ends { None } else { subject_after(&words, j + 1) };
        out.push(Stance {
            choice: choice.clone(),
            subject,
            adopt,
        });
        i = j + 1;
    }
    out
}

/// Length of the phrase in `phrases` starting at `words[at]`, if any.
fn match_phrase(words: &[(String, bool)], at: usize, phrases: &[&[&str]]) -> Option<usize> {
    phrases
        .iter()
        .filter(|phrase| {
            phrase.len() <= words.len() - at
                && phrase.iter().enumerate().all(|(k, w)| {
                    words[at + k].0 == *w && (k + 1 == phrase.len() || !words[at + k].1)
                })
        })
        .map(|phrase| phrase.len())
        .max()
}

/// Words after the next `for` or `as` in the same clause, up to three.
fn subject_after(words: &[(String, bool)], from: usize) -> Option<String> {
    let mut i = from;
    while i < words.len() {
        let (word, ends) = &words[i];
        if word == "for" || word == "as" {
            if *ends {
                return None;
            }
            let mut parts: Vec<&str> = Vec::new();
            for (w, end) in &words[i + 1..] {
                if SUBJECT_END.contains(&w.as_str()) {
                    break;
                }
                if !(parts.is_empty() && ARTICLES.contains(&w.as_str())) {
                    parts.push(w);
                }
                if *end || parts.len() == 3 {
                    break;
                }
            }
            return (!parts.is_empty()).then(|| parts.join(" "));
        }
        if *ends {
            return None;
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Scope;

    fn record(id: &str, kind: RecordKind, content: &str, tags: &[&str]) -> Record {
        Record {
            id: id.into(),
            content: content.into(),
            kind,
            scope: Scope::Palace,
            scope_path: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            origin: None,
            embedded: false,
        }
    }

    #[test]
    fn stances_read_choice_and_subject() {
        assert_eq!(
            stances("Use Redis for caching."),
            [Stance {
                choice: "redis".into(),
                subject: Some("caching".into()),
                adopt: true
            }]
        );
        assert_eq!(
            stances("We chose Postgres instead of MySQL for storage"),
            [
                Stance {
                    choice: "postgres".into(),
                    subject: Some("storage".into()),
                    adopt: true
                },
                Stance {
                    choice: "mysql".into(),
                    subject: Some("storage".into()),
                    adopt: false
                },
            ]
        );
        let negated = stances("Do not use the ORM");
        assert_eq!(negated.len(), 1);
        assert_eq!((negated[0].choice.as_str(), negated[0].adopt), ("orm", false));
    }

    #[test]
    fn different_choices_for_one_subject_conflict() {
        let records = [
            record("a", RecordKind::Decision, "Use Redis for caching", &[]),
            record("b", RecordKind::Decision, "Use Memcached for caching", &[]),
            record("c", RecordKind::Decision, "Use tracing for logging", &[]),
        ];
        let found = contradictions(&records);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConflictKind::ConflictingChoice);
        assert_eq!((found[0].first.as_str(), found[0].second.as_str()), ("a", "b"));
        assert_eq!(found[0].subject, "caching");
    }

    #[test]
    fn adopting_what_another_rejects_conflicts() {
        let records = [
            record("a", RecordKind::Decision, "Adopt GraphQL as the API layer", &[]),
            record("b", RecordKind::Decision, "Avoid GraphQL, it complicates caching", &[]),
        ];
        let found = contradictions(&records);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConflictKind::AdoptReject);
        assert_eq!(found[0].subject, "graphql");
    }

    #[test]
    fn non_decisions_never_conflict() {
        let records = [
            record("a", RecordKind::Idea, "Use Redis for caching", &[]),
            record("b", RecordKind::Decision, "Use Memcached for caching", &[]),
        ];
        assert!(contradictions(&records).is_empty());
    }

    #[test]
    fn counts_and_patterns() {
        let records = [
            record(
                "a",
                RecordKind::Decision,
                "The scanner skips vendored directories",
                &["scan", "perf"],
            ),
            record(
                "b",
                RecordKind::Learning,
                "Scanner throughput doubled with parallel parsing",
                &["scan"],
            ),
            record(
                "c",
                RecordKind::Learning,
                "The scanner ignores vendored code",
                &["perf", "scan"],
            ),
        ];
        let reflection = reflect_over(&records);
        assert_eq!(reflection.total, 3);
        assert_eq!(reflection.by_kind[&RecordKind::Learning], 2);
        assert_eq!(reflection.by_scope["palace"], 3);
        assert_eq!(
            reflection.recurring_tags,
            [
                Pattern {
                    value: "scan".into(),
                    count: 3
                },
                Pattern {
                    value: "perf".into(),
                    count: 2
                },
            ]
        );
        assert_eq!(reflection.recurring_terms[0].value, "scanner");
        assert!(reflection.recurring_terms.iter().any(|p| p.value == "vendored"));
        assert!(!reflection.recurring_terms.iter().any(|p| p.value == "the"));
    }
}
