//! `briefing`: records and symbols for one context, condensed into prose.
//!
//! The material is gathered the same way regardless of who writes the
//! summary. With a completion provider configured it gets a prompt built from
//! that material; without one (or when it fails and `briefing.fallback` is
//! set) a deterministic template renders the same material instead.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use super::{blocking, reply, PalaceTools};
use crate::error::{StoreResult, ToolError};
use crate::index::{IndexStats, IndexStore, SearchOptions, SymbolFilter};
use crate::memory::{
    reflect_over, Contradiction, MemoryStore, RecallFilter, Record, RecordKind, Reflection,
};
use crate::parser::Symbol;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BriefingContext {
    #[default]
    Workspace,
    File,
    Room,
    Task,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BriefingStyle {
    #[default]
    Summary,
    Detailed,
    Actionable,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BriefingParams {
    #[schemars(description = "workspace (default), file, room (a directory), or task.")]
    pub context: Option<BriefingContext>,

    #[schemars(description = "The file or directory, or a task description. Required unless context is workspace.")]
    pub context_path: Option<String>,

    #[schemars(description = "summary (default), detailed, or actionable.")]
    pub style: Option<BriefingStyle>,
}

/// Everything a briefing is written from.
#[derive(Debug, Clone)]
pub struct Material {
    pub context: BriefingContext,
    pub context_path: Option<String>,
    pub records: Vec<Record>,
    pub symbols: Vec<Symbol>,
    pub reflection: Reflection,
    pub stats: Option<IndexStats>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Briefing {
    context: BriefingContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_path: Option<String>,
    style: BriefingStyle,
    /// `"template"` or the completion model id.
    generated_by: String,
    summary: String,
    records: Vec<Record>,
    symbols: Vec<Symbol>,
    contradictions: Vec<Contradiction>,
}

/// Collect records and symbols for `context`. Blocking.
fn gather(
    memory: &MemoryStore,
    index: &IndexStore,
    context: BriefingContext,
    context_path: Option<String>,
    max_records: usize,
    max_symbols: usize,
) -> StoreResult<Material> {
    let (records, symbols, stats) = match context {
        BriefingContext::Workspace => {
            let records = memory.records(&RecallFilter::default())?;
            let symbols = index.list_symbols(&SymbolFilter {
                exported_only: true,
                limit: Some(max_symbols),
                ..Default::default()
            })?;
            (records, symbols, Some(index.stats()?))
        }
        BriefingContext::File | BriefingContext::Room => {
            let records = memory.records(&RecallFilter {
                path: context_path.clone(),
                ..Default::default()
            })?;
            let symbols = index.list_symbols(&SymbolFilter {
                path: context_path.clone(),
                limit: Some(max_symbols),
                ..Default::default()
            })?;
            (records, symbols, None)
        }
        BriefingContext::Task => {
            let task = context_path.clone().unwrap_or_default();
            let records = memory
                .recall(
                    &RecallFilter {
                        query: Some(task.clone()),
                        limit: Some(max_records),
                        ..Default::default()
                    },
                    None,
                )?
                .into_iter()
                .map(|hit| hit.record)
                .collect();
            let symbols = index
                .search(
                    &task,
                    &SearchOptions {
                        limit: Some(max_symbols),
                        fuzzy: true,
                        ..Default::default()
                    },
                    None,
                )?
                .into_iter()
                .map(|hit| hit.symbol)
                .collect();
            (records, symbols, None)
        }
    };

    // Contradictions are judged over everything in context, not just the
    // records that make the cut.
    let reflection = reflect_over(&records);
    let mut records = records;
    records.truncate(max_records);

    Ok(Material {
        context,
        context_path,
        records,
        symbols,
        reflection,
        stats,
    })
}

fn heading(material: &Material) -> String {
    match (material.context, material.context_path.as_deref()) {
        (BriefingContext::Workspace, _) | (_, None) => "Workspace briefing".to_string(),
        (BriefingContext::File, Some(path)) => format!("Briefing for file {path}"),
        (BriefingContext::Room, Some(path)) => format!("Briefing for {path}/"),
        (BriefingContext::Task, Some(task)) => format!("Briefing for task: {task}"),
    }
}

fn records_of<'a>(material: &'a Material, kind: RecordKind) -> impl Iterator<Item = &'a Record> {
    material.records.iter().filter(move |r| r.kind == kind)
}

fn symbol_line(symbol: &Symbol) -> String {
    format!(
        "{} {} ({}:{})",
        symbol.kind.as_str(),
        symbol.qualified_name,
        symbol.path,
        symbol.start_line
    )
}

/// Deterministic briefing used when no completion provider is available.
pub fn render_template(material: &Material, style: BriefingStyle) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", heading(material));

    if let Some(stats) = &material.stats {
        let languages: Vec<String> = stats
            .languages
            .iter()
            .map(|(language, n)| format!("{language} {n}"))
            .collect();
        let _ = writeln!(
            out,
            "\n{} files, {} symbols indexed{}.",
            stats.files,
            stats.symbols,
            if languages.is_empty() {
                String::new()
            } else {
                format!(" ({})", languages.join(", "))
            }
        );
    }

    if material.records.is_empty() && material.symbols.is_empty() {
        out.push_str("\nNothing recorded or indexed for this context yet.\n");
        return out;
    }

    let per_kind = match style {
        BriefingStyle::Summary => 3,
        BriefingStyle::Detailed | BriefingStyle::Actionable => usize::MAX,
    };

    let sections = match style {
        BriefingStyle::Actionable => {
            &[RecordKind::Postmortem, RecordKind::Decision, RecordKind::Learning][..]
        }
        _ => &RecordKind::ALL[..],
    };
    for &kind in sections {
        let matching: Vec<&Record> = records_of(material, kind).collect();
        if matching.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n## {} ({})", section_title(kind), matching.len());
        for record in matching.iter().take(per_kind) {
            let _ = writeln!(out, "- {}", record.content);
        }
        if matching.len() > per_kind {
            let _ = writeln!(out, "- and {} more", matching.len() - per_kind);
        }
    }

    if !material.reflection.contradictions.is_empty() {
        out.push_str("\n## Conflicting decisions\n");
        for c in &material.reflection.contradictions {
            let _ = writeln!(out, "- {}", c.detail);
        }
    }

    if style != BriefingStyle::Actionable && !material.symbols.is_empty() {
        let shown = if style == BriefingStyle::Summary { 5 } else { material.symbols.len() };
        let _ = writeln!(out, "\n## Symbols ({})", material.symbols.len());
        for symbol in material.symbols.iter().take(shown) {
            let _ = writeln!(out, "- {}", symbol_line(symbol));
        }
    }

    if style == BriefingStyle::Actionable {
        out.push_str("\n## Before you change anything\n");
        let mut any = false;
        for record in records_of(material, RecordKind::Postmortem) {
            let _ = writeln!(out, "- Do not repeat: {}", record.content);
            any = true;
        }
        if !material.reflection.contradictions.is_empty() {
            out.push_str("- Settle the conflicting decisions above first.\n");
            any = true;
        }
        if !any {
            out.push_str("- No recorded pitfalls for this context.\n");
        }
    }
    out
}

fn section_title(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Idea => "Ideas",
        RecordKind::Decision => "Decisions",
        RecordKind::Learning => "Learnings",
        RecordKind::Postmortem => "Postmortems",
        RecordKind::Custom => "Notes",
    }
}

/// Prompt handed to the completion provider.
pub fn prompt(material: &Material, style: BriefingStyle) -> String {
    let instruction = match style {
        BriefingStyle::Summary => "Write a short briefing (at most 6 sentences).",
        BriefingStyle::Detailed => "Write a thorough briefing covering every decision and learning.",
        BriefingStyle::Actionable => {
            "Write a checklist of concrete things a developer must do or avoid before changing this code."
        }
    };
    let mut out = format!(
        "You are briefing a developer about to work on a codebase. {instruction} \
         Use only the material below. Point out conflicting decisions.\n\n# {}\n",
        heading(material)
    );
    if !material.records.is_empty() {
        out.push_str("\n## Records\n");
        for record in &material.records {
            let _ = write!(out, "- [{}] {}", record.kind, record.content);
            if let Some(path) = &record.scope_path {
                let _ = write!(out, " (applies to {path})");
            }
            out.push('\n');
        }
    }
    if !material.reflection.contradictions.is_empty() {
        out.push_str("\n## Conflicts\n");
        for c in &material.reflection.contradictions {
            let _ = writeln!(out, "- {}", c.detail);
        }
    }
    if !material.symbols.is_empty() {
        out.push_str("\n## Symbols\n");
        for symbol in &material.symbols {
            let _ = write!(out, "- {}", symbol_line(symbol));
            if let Some(doc) = symbol.doc_comment.as_deref().and_then(|d| d.lines().next()) {
                let _ = write!(out, ": {doc}");
            }
            out.push('\n');
        }
    }
    out
}

impl PalaceTools {
    pub(super) async fn briefing(&self, params: BriefingParams) -> Result<Value, ToolError> {
        let context = params.context.unwrap_or_default();
        let style = params.style.unwrap_or_default();
        let context_path = params
            .context_path
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if context != BriefingContext::Workspace && context_path.is_none() {
            return Err(ToolError::missing("contextPath"));
        }

        let settings = &self.config.briefing;
        let (max_records, max_symbols) = (settings.max_records, settings.max_symbols);
        let memory = Arc::clone(&self.memory);
        let index = Arc::clone(&self.index);
        let path = context_path.clone();
        let material =
            blocking(move || gather(&memory, &index, context, path, max_records, max_symbols))
                .await?;

        let (summary, generated_by) = match self.complete(&material, style).await {
            Ok(written) => written,
            Err(reason) if settings.fallback => {
                if self.completer.is_some() {
                    tracing::warn!(%reason, "briefing provider failed, using template");
                }
                (render_template(&material, style), "template".to_string())
            }
            Err(reason) => return Err(ToolError::ProviderUnavailable(reason)),
        };

        reply(Briefing {
            context,
            context_path,
            style,
            generated_by,
            summary,
            contradictions: material.reflection.contradictions,
            records: material.records,
            symbols: material.symbols,
        })
    }

    /// Ask the completion provider for prose. `Err` carries a reason safe to
    /// show the caller.
    async fn complete(
        &self,
        material: &Material,
        style: BriefingStyle,
    ) -> Result<(String, String), String> {
        let Some(completer) = self.completer.clone() else {
            return Err("no briefing provider configured".into());
        };
        let model = completer.model_id().to_string();
        let text = prompt(material, style);
        let timeout = Duration::from_millis(self.config.briefing.timeout_ms);
        let task = tokio::task::spawn_blocking(move || completer.complete(&text));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(summary))) if !summary.trim().is_empty() => {
                Ok((summary.trim().to_string(), model))
            }
            Ok(Ok(Ok(_))) => Err(format!("{model} returned an empty briefing")),
            Ok(Ok(Err(e))) => {
                tracing::debug!(error = %e, "completion failed");
                Err(format!("{model} request failed"))
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "completion task panicked");
                Err(format!("{model} request failed"))
            }
            Err(_) => Err(format!("{model} timed out after {timeout:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Scope;
    use crate::parser::{Language, SymbolKind};

    fn record(kind: RecordKind, content: &str) -> Record {
        Record {
            id: content.to_string(),
            content: content.to_string(),
            kind,
            scope: Scope::Palace,
            scope_path: None,
            tags: Vec::new(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            origin: None,
            embedded: false,
        }
    }

    fn symbol(name: &str) -> Symbol {
        Symbol {
            id: format!("src/lib.rs#{name}"),
            path: "src/lib.rs".into(),
            language: Language::Rust,
            kind: SymbolKind::Function,
            name: name.into(),
            qualified_name: name.into(),
            signature: format!("fn {name}()"),
            doc_comment: Some("Does the thing.".into()),
            start_line: 3,
            end_line: 5,
            exported: true,
            parent_id: None,
            children: Vec::new(),
            annotations: Vec::new(),
        }
    }

    fn material(records: Vec<Record>, symbols: Vec<Symbol>) -> Material {
        Material {
            context: BriefingContext::File,
            context_path: Some("src/lib.rs".into()),
            reflection: reflect_over(&records),
            records,
            symbols,
            stats: None,
        }
    }

    #[test]
    fn template_groups_records_by_kind() {
        let m = material(
            vec![
                record(RecordKind::Decision, "Use Redis for caching"),
                record(RecordKind::Postmortem, "Deploy broke because migrations ran twice"),
            ],
            vec![symbol("run")],
        );
        let text = render_template(&m, BriefingStyle::Summary);
        assert!(text.starts_with("# Briefing for file src/lib.rs"));
        assert!(text.contains("## Decisions (1)\n- Use Redis for caching"));
        assert!(text.contains("## Postmortems (1)"));
        assert!(text.contains("- function run (src/lib.rs:3)"));
    }

    #[test]
    fn actionable_style_lists_pitfalls() {
        let m = material(
            vec![record(RecordKind::Postmortem, "Never bump the schema without a migration")],
            vec![symbol("run")],
        );
        let text = render_template(&m, BriefingStyle::Actionable);
        assert!(text.contains("Do not repeat: Never bump the schema"));
        assert!(!text.contains("## Symbols"));
    }

    #[test]
    fn contradictions_are_surfaced() {
        let m = material(
            vec![
                record(RecordKind::Decision, "Use Redis for caching"),
                record(RecordKind::Decision, "Use Memcached for caching"),
            ],
            Vec::new(),
        );
        assert_eq!(m.reflection.contradictions.len(), 1);
        assert!(render_template(&m, BriefingStyle::Detailed).contains("## Conflicting decisions"));
        assert!(prompt(&m, BriefingStyle::Summary).contains("## Conflicts"));
    }

    #[test]
    fn empty_context_says_so() {
        let m = material(Vec::new(), Vec::new());
        assert!(render_template(&m, BriefingStyle::Summary).contains("Nothing recorded"));
    }

    #[test]
    fn prompt_carries_material() {
        let mut r = record(RecordKind::Learning, "WAL needs a busy timeout");
        r.scope_path = Some("src/db".into());
        let text = prompt(&material(vec![r], vec![symbol("open")]), BriefingStyle::Actionable);
        assert!(text.contains("checklist"));
        assert!(text.contains("- [learning] WAL needs a busy timeout (applies to src/db)"));
        assert!(text.contains("- function open (src/lib.rs:3): Does the thing."));
    }
}
