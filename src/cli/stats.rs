use anyhow::Result;

use crate::config::PalaceConfig;
use crate::index::IndexStore;
use crate::memory::{MemoryStore, RecallFilter};

/// Print index and memory statistics.
pub fn stats(config: &PalaceConfig) -> Result<()> {
    let index = IndexStore::open(config)?;
    let stats = index.stats()?;

    println!("Index");
    println!("{}", "=".repeat(40));
    println!("  Files:               {}", stats.files);
    println!("  Symbols:             {}", stats.symbols);
    println!("  Relationships:       {}", stats.relationships);
    println!("  Embedded symbols:    {}", stats.embedded_symbols);
    for (language, count) in &stats.languages {
        println!("    {language:<18} {count}");
    }
    println!();

    let memory = MemoryStore::open_workspace(config)?;
    let reflection = memory.reflect(&RecallFilter::default())?;
    println!("Memory");
    println!("{}", "=".repeat(40));
    println!("  Records:             {}", reflection.total);
    for (kind, count) in &reflection.by_kind {
        println!("    {:<18} {count}", kind.as_str());
    }
    for (scope, count) in &reflection.by_scope {
        println!("    scope {scope:<12} {count}");
    }
    if !reflection.contradictions.is_empty() {
        println!("  Conflicting decisions: {}", reflection.contradictions.len());
    }

    if config.storage.corridor_enabled && config.corridor_db_path().exists() {
        let corridor = MemoryStore::open_corridor(config)?;
        println!();
        println!("Corridor records:      {}", corridor.count()?);
    }
    Ok(())
}
