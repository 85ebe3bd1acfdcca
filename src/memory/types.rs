//! Knowledge record types.
//!
//! A [`Record`] is free text about the codebase with a [`RecordKind`] and a
//! [`Scope`]: the whole workspace (`palace`), a directory (`room`), or one
//! file.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Idea,
    Decision,
    Learning,
    Postmortem,
    Custom,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        Self::Idea,
        Self::Decision,
        Self::Learning,
        Self::Postmortem,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Decision => "decision",
            Self::Learning => "learning",
            Self::Postmortem => "postmortem",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown record kind: {s}"))
    }
}

/// Granularity a record applies at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The whole workspace. Never carries a path.
    Palace,
    /// A directory subtree.
    Room,
    /// A single file.
    File,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Palace => "palace",
            Self::Room => "room",
            Self::File => "file",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "palace" => Ok(Self::Palace),
            "room" => Ok(Self::Room),
            "file" => Ok(Self::File),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// A stored record, matching the `records` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// UUID v7 (time-sortable).
    pub id: String,
    pub content: String,
    pub kind: RecordKind,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_path: Option<String>,
    pub tags: Vec<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Workspace root a corridor copy was promoted from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Whether a vector for the current content has been stored.
    pub embedded: bool,
}

/// Input to [`MemoryStore::store`](super::MemoryStore::store).
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub content: String,
    /// Classified from content when absent.
    pub kind: Option<RecordKind>,
    /// Inferred from `scope_path` when absent.
    pub scope: Option<Scope>,
    pub scope_path: Option<String>,
    pub tags: Vec<String>,
    pub origin: Option<String>,
}

impl NewRecord {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecallFilter {
    pub kind: Option<RecordKind>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    pub query: Option<String>,
    /// Workspace-relative file or directory the records must apply to.
    pub path: Option<String>,
    pub scope: Option<Scope>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallHit {
    #[serde(flatten)]
    pub record: Record,
    /// Relevance for query recalls; absent for plain listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// `"corridor"` for records from the cross-workspace store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_strings() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("memo".parse::<RecordKind>().is_err());
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = Record {
            id: "r1".into(),
            content: "Use Redis".into(),
            kind: RecordKind::Decision,
            scope: Scope::Room,
            scope_path: Some("src/cache".into()),
            tags: vec!["infra".into()],
            created_at: "2026-01-01T00:00:00Z".into(),
            origin: None,
            embedded: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["scopePath"], "src/cache");
        assert_eq!(json["kind"], "decision");
        assert!(json.get("origin").is_none());
    }
}
