//! `palace doctor`: health report for every database the workspace uses.

use anyhow::{Context, Result};
use std::path::Path;

use super::format_bytes;
use crate::config::PalaceConfig;
use crate::db::schema::DatabaseKind;
use crate::db::{check_database_health, open_connection};

pub fn doctor(config: &PalaceConfig) -> Result<()> {
    println!("Palace Health Report");
    println!("====================");
    println!();
    println!("Workspace root:    {}", config.resolved_root().display());
    println!("Embedding model:   {} ({})", config.embedding.model, config.embedding.provider);

    let mut healthy = true;
    healthy &= check("Index", &config.index_db_path(), DatabaseKind::Index, config)?;
    healthy &= check("Memory", &config.memory_db_path(), DatabaseKind::Memory, config)?;
    if config.storage.corridor_enabled {
        healthy &= check("Corridor", &config.corridor_db_path(), DatabaseKind::Memory, config)?;
    } else {
        println!();
        println!("Corridor:          disabled");
    }

    if !healthy {
        println!();
        println!("Recovery steps:");
        println!("  The index is derived data: delete index.db and run `palace scan`.");
        println!("  For memory.db or corridor.db, restore from a backup copy.");
    }
    Ok(())
}

/// Print one database's section. Returns false when it failed its integrity check.
fn check(label: &str, path: &Path, kind: DatabaseKind, config: &PalaceConfig) -> Result<bool> {
    println!();
    if !path.exists() {
        println!("{label}: not found at {}", path.display());
        println!("  Created on first `palace serve` or `palace scan`.");
        return Ok(true);
    }

    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let conn = open_connection(path, kind, config.embedding.dimensions)
        .with_context(|| format!("failed to open {} (may be corrupt)", path.display()))?;
    let report = check_database_health(&conn, kind).context("failed to run health check")?;

    println!("{label}:");
    println!("  Path:            {}", path.display());
    println!("  File size:       {}", format_bytes(size));
    println!("  Schema version:  {}", report.schema_version);
    println!("  sqlite-vec:      {}", report.sqlite_vec_version);
    let stored = report.embedding_model.as_deref().unwrap_or("(not set)");
    println!("  Vectors from:    {stored}");
    if report
        .embedding_model
        .as_deref()
        .is_some_and(|m| m != "unset" && !m.ends_with(&config.embedding.model))
    {
        println!(
            "  WARNING: vectors were built with a different model; \
             they will be replaced as rows are re-embedded."
        );
    }
    for (table, count) in &report.row_counts {
        println!("  {table:<16} {count}");
    }
    if report.integrity_ok {
        println!("  Integrity:       PASSED");
    } else {
        println!("  Integrity:       FAILED ({})", report.integrity_details);
    }
    Ok(report.integrity_ok)
}
