use anyhow::{bail, Context, Result};
use rusqlite::Connection;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "store";

use crate::log_info;

/// Schema steps in order; step `n` takes `user_version` from `n` to `n + 1`.
const STEPS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

fn stored_version(conn: &Connection) -> Result<usize> {
    let raw: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("could not read store schema version")?;
    usize::try_from(raw).with_context(|| format!("store schema version {raw} is invalid"))
}

/// Bring the store up to the schema this build writes. Stores written by a
/// newer build are refused rather than guessed at.
pub fn upgrade(conn: &mut Connection) -> Result<()> {
    let found = stored_version(conn)?;
    let Some(pending) = STEPS.get(found..) else {
        bail!(
            "store uses schema {} but this build only knows up to {}",
            found,
            STEPS.len()
        );
    };
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction().context("could not start schema upgrade")?;
    for (offset, sql) in pending.iter().enumerate() {
        let target = found + offset + 1;
        tx.execute_batch(sql)
            .with_context(|| format!("schema step {target} failed"))?;
    }
    tx.pragma_update(None, "user_version", STEPS.len() as i64)
        .context("could not record store schema version")?;
    tx.commit().context("could not commit schema upgrade")?;

    log_info!("store schema upgraded from {} to {}", found, STEPS.len());
    Ok(())
}
