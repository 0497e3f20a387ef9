use rusqlite::{Connection, Transaction};

use crate::error::GatewayError;

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<(), GatewayError> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| GatewayError::storage("read user_version pragma", e))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(GatewayError::config(
            "cache.database_path",
            format!("schema v{}", version),
            format!(
                "database version ({}) is newer than supported schema ({})",
                version, CURRENT_SCHEMA_VERSION
            ),
        ));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| GatewayError::storage("open migration transaction", e))?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .map_err(|e| GatewayError::storage(format!("migration to version {next_version}"), e))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .map_err(|e| GatewayError::storage("update user_version pragma", e))?;
    tx.commit()
        .map_err(|e| GatewayError::storage("commit migrations", e))?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> rusqlite::Result<()> {
    match version {
        1 => tx.execute_batch(include_str!("schema_v1.sql")),
        _ => Err(rusqlite::Error::InvalidQuery),
    }
}
