//! Module-contributed schema migrations.
//!
//! Each module hands the registry a list of [`Migration`]s. The runner records
//! applied `(module, id)` pairs in `schema_migrations` and runs every pending
//! migration in its own transaction, so a failed script leaves no trace.

use time::OffsetDateTime;

use crate::{to_micros, Database, DbError, DbResult};

const BOOKKEEPING_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    module     TEXT    NOT NULL,
    id         TEXT    NOT NULL,
    applied_at INTEGER NOT NULL,
    PRIMARY KEY (module, id)
);
"#;

/// Migration definition for modules
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

impl Database {
    /// Apply every migration not yet recorded, in the order given.
    ///
    /// Returns the number of migrations applied by this call.
    pub async fn migrate(&self, migrations: &[(String, Migration)]) -> DbResult<usize> {
        sqlx::raw_sql(BOOKKEEPING_SQL).execute(self.pool()).await?;

        let mut applied = 0;
        for (module, migration) in migrations {
            if self.is_applied(module, migration.id).await? {
                tracing::debug!(target: "lectern-db", %module, id = migration.id, "migration already applied");
                continue;
            }

            let wrap = |source: sqlx::Error| DbError::Migration {
                module: module.clone(),
                id: migration.id.to_string(),
                source,
            };

            let mut tx = self.begin().await.map_err(wrap)?;
            sqlx::raw_sql(migration.up)
                .execute(&mut *tx)
                .await
                .map_err(wrap)?;
            sqlx::query("INSERT INTO schema_migrations (module, id, applied_at) VALUES (?, ?, ?)")
                .bind(module)
                .bind(migration.id)
                .bind(to_micros(OffsetDateTime::now_utc()))
                .execute(&mut *tx)
                .await
                .map_err(wrap)?;
            tx.commit().await.map_err(wrap)?;

            tracing::info!(target: "lectern-db", %module, id = migration.id, "migration applied");
            applied += 1;
        }

        Ok(applied)
    }

    async fn is_applied(&self, module: &str, id: &str) -> DbResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM schema_migrations WHERE module = ? AND id = ?")
                .bind(module)
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(found.is_some())
    }
}
