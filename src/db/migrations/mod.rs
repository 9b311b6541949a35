//! Database schema migrations.
//!
//! Migration files live next to this module:
//! - `migration_NN_up.sql` upgrades the schema from version `NN-1` to `NN`
//! - `migration_NN_down.sql` downgrades the schema from version `NN` to `NN-1`

use crate::error::Res;
use anyhow::{bail, Context};
use sqlx::{Executor, SqlitePool};
use tracing::debug;

/// The schema version this build of the program expects.
pub(crate) const CURRENT_VERSION: i32 = 2;

struct Migration {
    /// The version this migration brings the database to when going up.
    version: i32,
    up_sql: &'static str,
    down_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        up_sql: include_str!("migration_01_up.sql"),
        down_sql: include_str!("migration_01_down.sql"),
    },
    Migration {
        version: 2,
        up_sql: include_str!("migration_02_up.sql"),
        down_sql: include_str!("migration_02_down.sql"),
    },
];

/// Brings the database from `current_ver` to `target_ver`, running "up" or "down" migrations in
/// sequence. Every required migration is checked for existence before any of them runs.
pub(crate) async fn run(pool: &SqlitePool, current_ver: i32, target_ver: i32) -> Res<()> {
    if current_ver == target_ver {
        debug!("Database already at version {target_ver}, no migrations needed");
        return Ok(());
    }

    validate_migrations(current_ver, target_ver)?;

    if current_ver < target_ver {
        for version in (current_ver + 1)..=target_ver {
            let migration = find(version)?;
            debug!("Running migration {version:02} (up)");
            run_single_migration(pool, migration.up_sql, version).await?;
        }
    } else {
        for version in (target_ver + 1..=current_ver).rev() {
            let migration = find(version)?;
            debug!("Running migration {version:02} (down)");
            run_single_migration(pool, migration.down_sql, version - 1).await?;
        }
    }

    debug!("Migration complete, schema now at version {target_ver}");
    Ok(())
}

fn find(version: i32) -> Res<&'static Migration> {
    MIGRATIONS
        .iter()
        .find(|m| m.version == version)
        .with_context(|| format!("Migration {version} not found"))
}

/// Executes one migration and records the new schema version in the same transaction.
async fn run_single_migration(pool: &SqlitePool, sql: &str, new_version: i32) -> Res<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin migration transaction")?;

    tx.execute(sql)
        .await
        .context("Failed to execute migration SQL")?;

    sqlx::query("DELETE FROM schema_version")
        .execute(&mut *tx)
        .await
        .context("Failed to clear schema_version")?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(new_version)
        .execute(&mut *tx)
        .await
        .context("Failed to update schema_version")?;

    tx.commit()
        .await
        .context("Failed to commit migration transaction")
}

fn validate_migrations(current_version: i32, target_version: i32) -> Res<()> {
    let (start, end) = if current_version < target_version {
        (current_version + 1, target_version)
    } else {
        (target_version + 1, current_version)
    };

    for version in start..=end {
        if !MIGRATIONS.iter().any(|m| m.version == version) {
            bail!(
                "Migration {version} is missing but required to migrate from version \
                {current_version} to {target_version}"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    /// Creates an empty database with `schema_version` bootstrapped at version 0.
    async fn create_test_db() -> Res<(TempDir, SqlitePool)> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let db_path = temp_dir.path().join("test.sqlite");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
            .execute(&pool)
            .await?;
        Ok((temp_dir, pool))
    }

    async fn get_schema_version(pool: &SqlitePool) -> i32 {
        let row: (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    async fn table_exists(pool: &SqlitePool, table_name: &str) -> bool {
        let row: (i32,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table_name)
                .fetch_one(pool)
                .await
                .unwrap();
        row.0 > 0
    }

    #[tokio::test]
    async fn test_migration_up_creates_tables() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        assert_eq!(get_schema_version(&pool).await, 0);

        run(&pool, 0, CURRENT_VERSION).await.unwrap();

        assert_eq!(get_schema_version(&pool).await, CURRENT_VERSION);
        assert!(table_exists(&pool, "transactions").await);
        assert!(table_exists(&pool, "interpretation_cache").await);
    }

    #[tokio::test]
    async fn test_migration_step_by_step() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();

        run(&pool, 0, 1).await.unwrap();
        assert!(table_exists(&pool, "transactions").await);
        assert!(!table_exists(&pool, "interpretation_cache").await);

        run(&pool, 1, 2).await.unwrap();
        assert_eq!(get_schema_version(&pool).await, 2);
        assert!(table_exists(&pool, "interpretation_cache").await);
    }

    #[tokio::test]
    async fn test_migration_down_drops_tables() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        run(&pool, 0, CURRENT_VERSION).await.unwrap();

        run(&pool, CURRENT_VERSION, 0).await.unwrap();

        assert_eq!(get_schema_version(&pool).await, 0);
        assert!(!table_exists(&pool, "transactions").await);
        assert!(!table_exists(&pool, "interpretation_cache").await);
    }

    #[tokio::test]
    async fn test_migration_no_op_when_already_at_target() {
        let (_temp_dir, pool) = create_test_db().await.unwrap();
        run(&pool, 0, CURRENT_VERSION).await.unwrap();
        run(&pool, CURRENT_VERSION, CURRENT_VERSION).await.unwrap();
        assert_eq!(get_schema_version(&pool).await, CURRENT_VERSION);
    }

    #[test]
    fn test_validate_migrations() {
        assert!(validate_migrations(0, 2).is_ok());
        assert!(validate_migrations(2, 0).is_ok());
        assert!(validate_migrations(0, 3).is_err());
        assert!(validate_migrations(1, 4).is_err());
    }
}
