use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Ordered schema steps; `MIGRATIONS[n]` upgrades a database at version n.
const MIGRATIONS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    Ok(version as usize)
}

/// Walks the database up to the current schema inside one transaction. The
/// applied version lives in the `user_version` pragma.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let applied = schema_version(conn)?;
    if applied > MIGRATIONS.len() {
        bail!(
            "database schema {applied} is newer than this build supports ({})",
            MIGRATIONS.len()
        );
    }
    if applied == MIGRATIONS.len() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to begin migration transaction")?;
    for (step, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        tx.execute_batch(sql)
            .with_context(|| format!("schema step {} failed", step + 1))?;
    }
    tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)
        .context("failed to record schema version")?;
    tx.commit().context("failed to commit migrations")
}
