//! SurrealDB schema migrations and initialization
//!
//! Sets up the three MergeGuard tables with the indexes their contracts
//! rely on. Safe to call on every connection.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize all MergeGuard tables in SurrealDB (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing MergeGuard SurrealDB schema");

    init_decisions_table(db).await?;
    init_applied_table(db).await?;
    init_outcomes_table(db).await?;

    info!("MergeGuard schema initialization complete");
    Ok(())
}

async fn run(db: &Surreal<Any>, sql: &str) -> StorageResult<()> {
    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `decisions` table
///
/// Schema:
/// ```text
/// TABLE decisions {
///   revision_id: STRING (unique)
///   change_id:   STRING (indexed)
///   digest:      STRING
///   payload:     OBJECT
///   recorded_at: DATETIME
/// }
/// ```
async fn init_decisions_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing decisions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS decisions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_decision_revision ON TABLE decisions COLUMNS revision_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_decision_change ON TABLE decisions COLUMNS change_id;
    "#;

    run(db, sql).await
}

/// Initialize `applied` table
///
/// Schema:
/// ```text
/// TABLE applied {
///   revision_id:     STRING (unique, the compare-and-set key)
///   decision_digest: STRING?
///   status:          STRING (pending | applied | failed | superseded)
///   result:          OBJECT
///   superseded_by:   STRING?
///   claimed_at:      DATETIME
///   completed_at:    DATETIME?
/// }
/// ```
///
/// Rows are never deleted; `status` only moves out of `pending`.
async fn init_applied_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing applied table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS applied SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_applied_revision ON TABLE applied COLUMNS revision_id UNIQUE;
    "#;

    run(db, sql).await
}

/// Initialize `outcomes` table (append-only)
async fn init_outcomes_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing outcomes table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS outcomes SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_outcome_seq ON TABLE outcomes COLUMNS seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_outcome_revision ON TABLE outcomes COLUMNS revision_id;
    "#;

    run(db, sql).await
}
