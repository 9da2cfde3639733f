//! `migrate`: bring the ledger schema up to date.

use std::path::Path;

use tracing::info;

/// Open the ledger, applying pending migrations. Returns the schema version.
pub async fn migrate(db_path: &Path) -> anyhow::Result<u32> {
    let db_path = db_path.to_path_buf();
    let version = tokio::task::spawn_blocking(move || -> anyhow::Result<u32> {
        let conn = tally_db::open(&db_path)?;
        Ok(tally_db::migrations::current_version(&conn)?)
    })
    .await??;
    info!(version, "Ledger schema is current");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_fresh_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.sqlite");
        let version = migrate(&path).await.expect("migrate");
        assert_eq!(version, tally_db::SCHEMA_VERSION);
        assert!(path.exists());

        let again = migrate(&path).await.expect("migrate again");
        assert_eq!(again, version);
    }
}
