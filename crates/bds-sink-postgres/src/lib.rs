// # PostgreSQL Warehouse
//
// `Warehouse` implementation for PostgreSQL.
//
// ## Batch transaction
//
// Rows repeating a primary key are collapsed to the last one first, since a
// single `ON CONFLICT` upsert cannot touch the same row twice.
//
// ```text
// BEGIN
//   CREATE TEMP TABLE "tmp_<t>" AS SELECT * FROM "<t>" LIMIT 0
//   COPY "tmp_<t>" FROM STDIN WITH (FORMAT CSV)      -- header-less batch
//   <merge statement>                                -- configured or derived
//   DROP TABLE "tmp_<t>"
// COMMIT
// ```
//
// Any failure drops the transaction, which rolls the whole batch back and
// discards the staging relation with it.

pub mod sql;

use async_trait::async_trait;
use bds_core::batch::CsvBatch;
use bds_core::config::{DatabaseConfig, DatasetDescriptor};
use bds_core::traits::{LoadTarget, Warehouse};
use bds_core::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Column, Executor, PgPool, Statement};
use std::time::Duration;

/// Connections kept by the pool; loads are strictly sequential
const MAX_CONNECTIONS: u32 = 2;

/// How long to wait for a pooled connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL warehouse
#[derive(Clone)]
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresWarehouse")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresWarehouse {
    /// Connect using discrete connection parameters
    #[tracing::instrument(
        level = "debug",
        skip(config),
        fields(host = %config.host, database = %config.database)
    )]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| Error::config(format!("Failed to connect to PostgreSQL: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Column names of `table`, in ordinal order
    async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let probe = sql::probe(table);
        let statement = (&self.pool)
            .prepare(&probe)
            .await
            .map_err(|e| Error::load(table, format!("column probe failed: {}", e)))?;

        Ok(statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(sql::PRIMARY_KEY_COLUMNS)
            .bind(sql::quote_ident(table))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::load(table, format!("primary key lookup failed: {}", e)))
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn prepare_target(&self, descriptor: &DatasetDescriptor) -> Result<LoadTarget> {
        let table = descriptor.table.as_str();
        let staging = LoadTarget::staging_name(table);

        let columns = self.column_names(table).await?;
        if columns.is_empty() {
            return Err(Error::load(table, "table has no columns"));
        }

        let primary_key = self.primary_key(table).await?;
        let merge_sql = match &descriptor.merge_sql {
            Some(merge_sql) => merge_sql.clone(),
            None => {
                let derived = sql::default_merge(table, &staging, &columns, &primary_key)?;
                tracing::debug!("Derived merge statement for {}: {}", table, derived);
                derived
            }
        };

        Ok(LoadTarget {
            table: table.to_string(),
            staging_table: staging,
            num_columns: columns.len(),
            key_columns: sql::key_positions(&columns, &primary_key),
            merge_sql,
        })
    }

    async fn merge_batch(&self, target: &LoadTarget, batch: &CsvBatch) -> Result<u64> {
        let table = target.table.as_str();
        let fail = |step: &str, e: sqlx::Error| Error::load(table, format!("{}: {}", step, e));

        let batch = batch.last_per_key(&target.key_columns);
        let data = batch
            .to_csv()
            .map_err(|e| Error::load(table, format!("encode batch: {}", e)))?;

        let create_sql = sql::create_staging(table, &target.staging_table);
        let copy_sql = sql::copy_into(&target.staging_table);
        let drop_sql = sql::drop_staging(&target.staging_table);

        let mut tx = self.pool.begin().await.map_err(|e| fail("begin", e))?;

        (&mut *tx)
            .execute(sqlx::raw_sql(&create_sql))
            .await
            .map_err(|e| fail("create staging table", e))?;

        let mut copy = tx
            .copy_in_raw(&copy_sql)
            .await
            .map_err(|e| fail("start copy", e))?;
        copy.send(data).await.map_err(|e| fail("copy batch", e))?;
        let rows = copy.finish().await.map_err(|e| fail("finish copy", e))?;

        (&mut *tx)
            .execute(sqlx::raw_sql(&target.merge_sql))
            .await
            .map_err(|e| fail("merge", e))?;

        (&mut *tx)
            .execute(sqlx::raw_sql(&drop_sql))
            .await
            .map_err(|e| fail("drop staging table", e))?;

        tx.commit().await.map_err(|e| fail("commit", e))?;

        tracing::trace!("Merged {} staged rows into {}", rows, table);
        Ok(rows)
    }

    fn warehouse_name(&self) -> &'static str {
        "postgres"
    }
}
