//! `palace scan`: index the workspace from the terminal.
//!
//! Runs without the embedding pipeline. Symbols indexed here get their
//! vectors from the backfill the next `palace serve` performs.

use anyhow::Result;
use std::sync::Arc;

use crate::config::PalaceConfig;
use crate::index::scan::FileOutcome;
use crate::index::{IndexStore, Indexer};

pub async fn scan(config: &PalaceConfig, path: Option<&str>) -> Result<()> {
    let store = Arc::new(IndexStore::open(config)?);
    let indexer = Indexer::new(store, config.resolved_root(), config.workspace.max_file_bytes);
    let report = indexer.rescan(path).await?;

    for file in &report.files {
        match &file.outcome {
            FileOutcome::Indexed { symbols, diagnostics } if *diagnostics > 0 => {
                println!(
                    "  indexed   {} ({symbols} symbols, {diagnostics} parse errors)",
                    file.path
                )
            }
            FileOutcome::Indexed { symbols, .. } => {
                println!("  indexed   {} ({symbols} symbols)", file.path)
            }
            FileOutcome::Removed => println!("  removed   {}", file.path),
            FileOutcome::Skipped { reason } => println!("  skipped   {} ({reason})", file.path),
            FileOutcome::Failed { error } => println!("  failed    {} ({error})", file.path),
            FileOutcome::Unchanged | FileOutcome::Superseded => {}
        }
    }
    println!(
        "Scanned {} files in {} ms: {} indexed, {} unchanged, {} removed, {} skipped, {} failed",
        report.scanned,
        report.duration_ms,
        report.indexed,
        report.unchanged,
        report.removed,
        report.skipped,
        report.failed
    );
    Ok(())
}
