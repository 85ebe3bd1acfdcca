//! Forward-only schema migrations.
//!
//! The schema version lives in `schema_meta` and each step runs in its own
//! transaction until the database reaches [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

use super::schema::DatabaseKind;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// The embedding model whose vectors this database holds, if recorded.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Record `model` on first use; warn when the stored model differs.
///
/// Returns `false` on mismatch. Existing vectors are kept but will rank poorly
/// until the rows are re-embedded.
pub fn check_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<bool> {
    match get_embedding_model(conn)? {
        Some(stored) if stored == model => Ok(true),
        Some(stored) if stored == UNSET_MODEL => {
            set_embedding_model(conn, model)?;
            Ok(true)
        }
        Some(stored) => {
            tracing::warn!(
                stored = %stored,
                configured = %model,
                "embedding model changed; existing vectors were produced by a different model"
            );
            Ok(false)
        }
        None => {
            set_embedding_model(conn, model)?;
            Ok(true)
        }
    }
}

const UNSET_MODEL: &str = "unset";

/// Run any pending migrations for a database of `kind`.
pub fn run_migrations(conn: &Connection, kind: DatabaseKind) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(
        kind = kind.as_str(),
        schema_version = version,
        target = CURRENT_SCHEMA_VERSION,
        "checking migrations"
    );

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(kind = kind.as_str(), from = version, to = next, "running migration");

        let tx = conn.unchecked_transaction()?;
        match next {
            2 => migrate_v1_to_v2(&tx, kind)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;
        version = next;
    }

    Ok(())
}

/// v1 -> v2: reserve the `embedding_model` key and backfill the tag index.
fn migrate_v1_to_v2(conn: &Connection, kind: DatabaseKind) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [UNSET_MODEL],
    )?;
    if kind == DatabaseKind::Memory {
        conn.execute(
            "INSERT OR IGNORE INTO record_tags (record_id, tag)
             SELECT records.id, json_each.value FROM records, json_each(records.tags)",
            [],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db(kind: DatabaseKind) -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn, kind, 8).unwrap();
        conn
    }

    #[test]
    fn fresh_db_starts_at_version_1() {
        let conn = test_db(DatabaseKind::Index);
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn run_migrations_upgrades_to_current() {
        for kind in [DatabaseKind::Index, DatabaseKind::Memory] {
            let conn = test_db(kind);
            run_migrations(&conn, kind).unwrap();
            assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db(DatabaseKind::Memory);
        run_migrations(&conn, DatabaseKind::Memory).unwrap();
        run_migrations(&conn, DatabaseKind::Memory).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn v2_backfills_record_tags() {
        let conn = test_db(DatabaseKind::Memory);
        conn.execute(
            "INSERT INTO records (id, content, kind, scope, tags, created_at, content_hash) \
             VALUES ('r1', 'use redis', 'decision', 'palace', '[\"cache\",\"infra\"]', '2024-01-01', 'h')",
            [],
        )
        .unwrap();
        run_migrations(&conn, DatabaseKind::Memory).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM record_tags WHERE record_id = 'r1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn first_model_is_recorded_then_mismatch_detected() {
        let conn = test_db(DatabaseKind::Index);
        run_migrations(&conn, DatabaseKind::Index).unwrap();

        assert!(check_embedding_model(&conn, "all-MiniLM-L6-v2").unwrap());
        assert_eq!(
            get_embedding_model(&conn).unwrap().as_deref(),
            Some("all-MiniLM-L6-v2")
        );
        assert!(!check_embedding_model(&conn, "text-embedding-3-small").unwrap());
    }
}
