use rusqlite::{Connection, Transaction};

use crate::ReadingDbError;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn schema_version(conn: &Connection) -> Result<i32, ReadingDbError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(Into::into)
}

pub fn run_migrations(conn: &mut Connection) -> Result<(), ReadingDbError> {
    let mut version = schema_version(conn)?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(ReadingDbError::SchemaVersion {
            found: version,
            expected: CURRENT_SCHEMA_VERSION,
        });
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        log::info!("Applied schema migration to version {next_version}");
        version = next_version;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), ReadingDbError> {
    match version {
        1 => tx
            .execute_batch(include_str!("schemas/schema_v1.sql"))
            .map_err(Into::into),
        _ => Err(ReadingDbError::SchemaVersion {
            found: version,
            expected: CURRENT_SCHEMA_VERSION,
        }),
    }
}
