//! Idempotent creation of the shared table, the namespace registry and
//! per-namespace tables.
//!
//! DDL runs inside a transaction holding a Postgres advisory lock keyed on the
//! target table, so replicas racing on a brand-new namespace serialize instead
//! of tripping over each other's `CREATE TABLE`. A namespace table is claimed
//! in the registry in the same transaction, which is how two raw namespaces
//! that sanitize to one table name are detected across processes.

use std::collections::HashMap;

use observability::VectorStoreMetrics;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, SqlErr, Statement,
    TransactionTrait,
};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::SchemaError;
use crate::models::GENERAL_NAMESPACE;
use crate::sanitize::{sanitize, TableName};

pub struct SchemaManager {
    db: DatabaseConnection,
    config: StoreConfig,
    shared_ready: OnceCell<()>,
    /// sanitized table name -> raw namespace that owns it
    registry: RwLock<HashMap<String, String>>,
}

impl SchemaManager {
    pub fn new(db: DatabaseConnection, config: StoreConfig) -> Self {
        Self {
            db,
            config,
            shared_ready: OnceCell::new(),
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared_table(&self) -> TableName {
        TableName::new(&self.config.schema, &self.config.shared_table)
    }

    fn registry_table(&self) -> TableName {
        TableName::new(&self.config.schema, &self.config.registry_table)
    }

    /// Table name `namespace` maps to, rejecting names that would alias an internal table
    pub fn table_for(&self, namespace: &str) -> Result<TableName, SchemaError> {
        let table = sanitize(namespace);
        if table == self.config.shared_table || table == self.config.registry_table {
            return Err(SchemaError::ReservedName {
                namespace: namespace.to_string(),
                table,
            });
        }
        Ok(TableName::new(&self.config.schema, table))
    }

    /// Create the extension, schema, shared table, its indexes and the registry.
    ///
    /// Runs once per process; later calls return immediately.
    pub async fn ensure_shared_table(&self) -> Result<(), SchemaError> {
        self.shared_ready
            .get_or_try_init(|| self.create_shared_table())
            .await
            .map(|_| ())
    }

    /// Create the table for `namespace` if needed and claim it in the registry
    pub async fn ensure_namespace_table(&self, namespace: &str) -> Result<TableName, SchemaError> {
        let table = self.table_for(namespace)?;
        if self.cached_owner(namespace, &table).await? {
            return Ok(table);
        }

        self.ensure_shared_table().await?;

        let txn = self.db.begin().await.map_err(|e| create_err(&table, e))?;
        self.lock(&txn, &table).await?;

        let claimed = txn
            .execute_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                format!(
                    "INSERT INTO {} (table_name, namespace) VALUES ($1, $2) \
                     ON CONFLICT (table_name) DO NOTHING",
                    self.registry_table().qualified()
                ),
                [table.table().into(), namespace.into()],
            ))
            .await
            .map_err(|e| create_err(&table, e))?
            .rows_affected()
            == 1;

        if !claimed {
            let owner = self.registered_owner(&txn, &table).await?;
            if let Some(owner) = owner.filter(|owner| owner != namespace) {
                return Err(SchemaError::NamespaceConflict {
                    requested: namespace.to_string(),
                    table: table.table().to_string(),
                    owner,
                });
            }
        }

        self.create_chunk_table(&txn, &table).await?;
        txn.commit().await.map_err(|e| create_err(&table, e))?;

        if claimed {
            info!(namespace, table = %table.table(), "Created namespace table");
            VectorStoreMetrics::record_table_created();
        }

        self.registry
            .write()
            .await
            .insert(table.table().to_string(), namespace.to_string());
        Ok(table)
    }

    /// Table already holding `namespace` rows, without creating anything.
    ///
    /// Returns `None` when nothing was ever written under the namespace.
    pub async fn resolve_existing(&self, namespace: &str) -> Result<Option<TableName>, SchemaError> {
        let Ok(table) = self.table_for(namespace) else {
            return Ok(None);
        };
        if self.cached_owner(namespace, &table).await? {
            return Ok(Some(table));
        }

        match self.registered_owner(&self.db, &table).await? {
            Some(owner) if owner == namespace => {
                self.registry
                    .write()
                    .await
                    .insert(table.table().to_string(), owner);
                Ok(Some(table))
            }
            Some(owner) => Err(SchemaError::NamespaceConflict {
                requested: namespace.to_string(),
                table: table.table().to_string(),
                owner,
            }),
            // tables created before the registry existed
            None if self.table_exists(&table).await? => Ok(Some(table)),
            None => Ok(None),
        }
    }

    async fn cached_owner(&self, namespace: &str, table: &TableName) -> Result<bool, SchemaError> {
        match self.registry.read().await.get(table.table()) {
            Some(owner) if owner == namespace => Ok(true),
            Some(owner) => Err(SchemaError::NamespaceConflict {
                requested: namespace.to_string(),
                table: table.table().to_string(),
                owner: owner.clone(),
            }),
            None => Ok(false),
        }
    }

    async fn create_shared_table(&self) -> Result<(), SchemaError> {
        // Needs superuser on some hosts; the extension is usually preinstalled there.
        if let Err(e) = self
            .db
            .execute_unprepared("CREATE EXTENSION IF NOT EXISTS vector")
            .await
        {
            warn!(error = %e, "Could not create pgvector extension, assuming it is installed");
        }

        let shared = self.shared_table();
        let txn = self.db.begin().await.map_err(|e| create_err(&shared, e))?;
        self.lock(&txn, &shared).await?;

        self.execute(
            &txn,
            &shared,
            &format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                crate::sanitize::quote_ident(shared.schema())
            ),
        )
        .await?;

        self.create_chunk_table(&txn, &shared).await?;

        self.execute(
            &txn,
            &shared,
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (namespace)",
                shared.index("namespace"),
                shared.qualified()
            ),
        )
        .await?;
        self.execute(
            &txn,
            &shared,
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (namespace, source)",
                shared.index("namespace_source"),
                shared.qualified()
            ),
        )
        .await?;

        let registry = self.registry_table();
        self.execute(
            &txn,
            &registry,
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                     table_name TEXT PRIMARY KEY, \
                     namespace TEXT NOT NULL, \
                     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
                registry.qualified()
            ),
        )
        .await?;

        txn.commit().await.map_err(|e| create_err(&shared, e))?;
        self.check_dimension(&shared).await?;

        info!(
            table = %shared.qualified(),
            dimension = self.config.embedding_dimension,
            "Shared table ready"
        );
        Ok(())
    }

    /// Table with the chunk columns plus a unique `chunk_id` index
    async fn create_chunk_table(
        &self,
        txn: &DatabaseTransaction,
        table: &TableName,
    ) -> Result<(), SchemaError> {
        self.ensure_not_other_relation(txn, table).await?;

        self.execute(
            txn,
            table,
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                     id BIGSERIAL PRIMARY KEY, \
                     chunk_id TEXT NOT NULL, \
                     source TEXT NOT NULL, \
                     chunk_index INTEGER NOT NULL, \
                     text TEXT NOT NULL, \
                     embedding vector({}) NOT NULL, \
                     namespace TEXT NOT NULL DEFAULT '{}', \
                     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
                table.qualified(),
                self.config.embedding_dimension,
                GENERAL_NAMESPACE
            ),
        )
        .await?;

        // Tables written by older deployments may predate these columns
        self.execute(
            txn,
            table,
            &format!(
                "ALTER TABLE {t} \
                 ADD COLUMN IF NOT EXISTS namespace TEXT NOT NULL DEFAULT '{}', \
                 ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
                GENERAL_NAMESPACE,
                t = table.qualified()
            ),
        )
        .await?;

        self.execute(
            txn,
            table,
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (source)",
                table.index("source"),
                table.qualified()
            ),
        )
        .await?;

        self.create_unique_index(txn, table).await
    }

    /// Unique `chunk_id` index, deduplicating legacy rows once if they block it
    async fn create_unique_index(
        &self,
        txn: &DatabaseTransaction,
        table: &TableName,
    ) -> Result<(), SchemaError> {
        if self.has_unique_chunk_id(txn, table).await? {
            return Ok(());
        }

        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (chunk_id)",
            table.index("chunk_id"),
            table.qualified()
        );

        let savepoint = txn.begin().await.map_err(|e| create_err(table, e))?;
        match savepoint.execute_unprepared(&sql).await {
            Ok(_) => {
                savepoint.commit().await.map_err(|e| create_err(table, e))?;
                return self.verify_unique_chunk_id(txn, table).await;
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await.map_err(|e| create_err(table, e))?;
            }
            Err(e) => return Err(create_err(table, e)),
        }

        // Keep the newest row per chunk_id, physical order breaks ties
        let removed = txn
            .execute_unprepared(&format!(
                "DELETE FROM {t} a USING {t} b \
                 WHERE a.chunk_id = b.chunk_id \
                   AND (a.created_at < b.created_at \
                        OR (a.created_at = b.created_at AND a.ctid < b.ctid))",
                t = table.qualified()
            ))
            .await
            .map_err(|e| create_err(table, e))?
            .rows_affected();

        warn!(
            table = %table.qualified(),
            removed,
            "Removed duplicate chunk_id rows before creating unique index"
        );

        self.execute(txn, table, &sql).await?;
        self.verify_unique_chunk_id(txn, table).await
    }

    /// `IF NOT EXISTS` skips silently when the name is taken, so check the catalog
    async fn verify_unique_chunk_id(
        &self,
        txn: &DatabaseTransaction,
        table: &TableName,
    ) -> Result<(), SchemaError> {
        if self.has_unique_chunk_id(txn, table).await? {
            return Ok(());
        }
        Err(SchemaError::Create {
            object: table.qualified(),
            message: "unique index on chunk_id is missing after creation".to_string(),
        })
    }

    /// Whether `table` has a valid, non-partial, single-column unique index on `chunk_id`
    async fn has_unique_chunk_id(
        &self,
        txn: &DatabaseTransaction,
        table: &TableName,
    ) -> Result<bool, SchemaError> {
        let row = txn
            .query_one_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT EXISTS (\
                     SELECT 1 FROM pg_index i \
                     JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = i.indkey[0] \
                     WHERE i.indrelid = to_regclass($1) \
                       AND i.indisunique AND i.indisvalid AND i.indpred IS NULL \
                       AND i.indnatts = 1 AND a.attname = 'chunk_id'\
                 ) AS present",
                [table.qualified().into()],
            ))
            .await
            .map_err(|e| create_err(table, e))?;

        match row {
            Some(row) => row.try_get("", "present").map_err(|e| create_err(table, e)),
            None => Ok(false),
        }
    }

    /// Reject a name already held by a sequence, view or index
    async fn ensure_not_other_relation(
        &self,
        txn: &DatabaseTransaction,
        table: &TableName,
    ) -> Result<(), SchemaError> {
        let row = txn
            .query_one_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT c.relkind::text AS kind FROM pg_class c \
                 JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = $1 AND c.relname = $2",
                [table.schema().into(), table.table().into()],
            ))
            .await
            .map_err(|e| create_err(table, e))?;

        let Some(row) = row else {
            return Ok(());
        };
        let kind: String = row.try_get("", "kind").map_err(|e| create_err(table, e))?;
        match relation_kind(&kind) {
            None => Ok(()),
            Some(kind) => Err(SchemaError::NotATable {
                table: table.qualified(),
                kind: kind.to_string(),
            }),
        }
    }

    async fn check_dimension(&self, table: &TableName) -> Result<(), SchemaError> {
        let row = self
            .db
            .query_one_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT atttypmod AS dimension FROM pg_attribute \
                 WHERE attrelid = to_regclass($1) AND attname = 'embedding' AND NOT attisdropped",
                [table.qualified().into()],
            ))
            .await
            .map_err(|e| create_err(table, e))?;

        let Some(row) = row else {
            return Ok(());
        };
        let found: i32 = row
            .try_get("", "dimension")
            .map_err(|e| create_err(table, e))?;

        // -1 means the column was declared without a dimension
        if found > 0 && found as usize != self.config.embedding_dimension {
            return Err(SchemaError::DimensionMismatch {
                table: table.qualified(),
                expected: self.config.embedding_dimension,
                found: found as usize,
            });
        }
        Ok(())
    }

    async fn registered_owner<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &TableName,
    ) -> Result<Option<String>, SchemaError> {
        let registry = self.registry_table();
        let row = conn
            .query_one_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                format!(
                    "SELECT namespace FROM {} WHERE table_name = $1",
                    registry.qualified()
                ),
                [table.table().into()],
            ))
            .await
            .map_err(|e| create_err(&registry, e))?;

        row.map(|r| r.try_get::<String>("", "namespace"))
            .transpose()
            .map_err(|e| create_err(&registry, e))
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool, SchemaError> {
        let row = self
            .db
            .query_one_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT to_regclass($1) IS NOT NULL AS present",
                [table.qualified().into()],
            ))
            .await
            .map_err(|e| create_err(table, e))?;

        match row {
            Some(row) => row.try_get("", "present").map_err(|e| create_err(table, e)),
            None => Ok(false),
        }
    }

    /// Serialize DDL on `table` across connections until the transaction ends
    async fn lock(&self, txn: &DatabaseTransaction, table: &TableName) -> Result<(), SchemaError> {
        debug!(table = %table.qualified(), "Acquiring schema lock");
        txn.execute_raw(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            [table.qualified().into()],
        ))
        .await
        .map(|_| ())
        .map_err(|e| create_err(table, e))
    }

    async fn execute(
        &self,
        txn: &DatabaseTransaction,
        table: &TableName,
        sql: &str,
    ) -> Result<(), SchemaError> {
        txn.execute_unprepared(sql)
            .await
            .map(|_| ())
            .map_err(|e| create_err(table, e))
    }
}

/// `None` for ordinary and partitioned tables, otherwise what the relation is
fn relation_kind(relkind: &str) -> Option<&'static str> {
    match relkind {
        "r" | "p" => None,
        "S" => Some("sequence"),
        "i" | "I" => Some("index"),
        "v" => Some("view"),
        "m" => Some("materialized view"),
        "f" => Some("foreign table"),
        "c" => Some("composite type"),
        _ => Some("relation"),
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        || err.to_string().contains("could not create unique index")
}

fn create_err(table: &TableName, err: DbErr) -> SchemaError {
    SchemaError::Create {
        object: table.qualified(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn manager() -> SchemaManager {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        SchemaManager::new(db, StoreConfig::default())
    }

    #[test]
    fn test_table_for_sanitizes() {
        let table = manager().table_for("Project-A").unwrap();
        assert_eq!(table.table(), "project_a");
        assert_eq!(table.schema(), "public");
    }

    #[test]
    fn test_reserved_names_rejected() {
        let manager = manager();
        assert!(matches!(
            manager.table_for("Embeddings"),
            Err(SchemaError::ReservedName { .. })
        ));
        assert!(matches!(
            manager.table_for("namespace.tables"),
            Err(SchemaError::ReservedName { .. })
        ));
    }

    #[tokio::test]
    async fn test_cached_conflict_detected_without_io() {
        let manager = manager();
        manager
            .registry
            .write()
            .await
            .insert("proj_a".to_string(), "proj-a".to_string());

        let err = manager.ensure_namespace_table("proj.a").await.unwrap_err();
        match err {
            SchemaError::NamespaceConflict {
                requested, owner, ..
            } => {
                assert_eq!(requested, "proj.a");
                assert_eq!(owner, "proj-a");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let table = manager.ensure_namespace_table("proj-a").await.unwrap();
        assert_eq!(table.table(), "proj_a");
    }

    #[test]
    fn test_relation_kind() {
        assert_eq!(relation_kind("r"), None);
        assert_eq!(relation_kind("p"), None);
        assert_eq!(relation_kind("S"), Some("sequence"));
        assert_eq!(relation_kind("i"), Some("index"));
        assert_eq!(relation_kind("v"), Some("view"));
    }

    #[tokio::test]
    async fn test_resolve_existing_reserved_is_none() {
        assert!(manager().resolve_existing("embeddings").await.unwrap().is_none());
    }
}
