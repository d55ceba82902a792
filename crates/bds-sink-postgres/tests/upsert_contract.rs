//! Contract Test: PostgreSQL batch merge
//!
//! Runs against a live database only when `BDS_TEST_DATABASE_URL` is set;
//! otherwise every test returns early.
//!
//! Constraints verified:
//! - Existing keys are updated, new keys inserted
//! - Replaying a batch leaves the table unchanged
//! - A key repeated within one batch resolves to its last row
//! - A failing batch leaves no trace, not even the staging table
//! - Configured merge statements are used verbatim

use bds_core::batch::CsvBatch;
use bds_core::config::DatasetDescriptor;
use bds_core::traits::Warehouse;
use bds_core::Error;
use bds_sink_postgres::PostgresWarehouse;
use sqlx::PgPool;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("BDS_TEST_DATABASE_URL").ok()?;
    Some(PgPool::connect(&url).await.expect("test database reachable"))
}

async fn fresh_table(pool: &PgPool, table: &str) {
    sqlx::raw_sql(&format!(
        "DROP TABLE IF EXISTS {table}; \
         CREATE TABLE {table} (id integer PRIMARY KEY, name text NOT NULL)"
    ))
    .execute(pool)
    .await
    .unwrap();
}

async fn rows(pool: &PgPool, table: &str) -> Vec<(i32, String)> {
    sqlx::query_as::<_, (i32, String)>(&format!("SELECT id, name FROM {table} ORDER BY id"))
        .fetch_all(pool)
        .await
        .unwrap()
}

fn batch(rows: &[(&str, &str)]) -> CsvBatch {
    CsvBatch::new(
        rows.iter()
            .map(|(id, name)| vec![id.to_string(), name.to_string()])
            .collect(),
    )
}

#[tokio::test]
async fn upsert_updates_and_inserts_and_is_idempotent() {
    let Some(pool) = test_pool().await else { return };
    fresh_table(&pool, "bds_test_users").await;
    sqlx::raw_sql("INSERT INTO bds_test_users VALUES (1, 'Alice')")
        .execute(&pool)
        .await
        .unwrap();

    let warehouse = PostgresWarehouse::new(pool.clone());
    let target = warehouse
        .prepare_target(&DatasetDescriptor::new("ds", "bds_test_users"))
        .await
        .expect("target resolves");
    assert_eq!(target.num_columns, 2);
    assert_eq!(target.staging_table, "tmp_bds_test_users");

    let data = batch(&[("1", "Alicia"), ("2", "Bob")]);
    assert_eq!(warehouse.merge_batch(&target, &data).await.unwrap(), 2);

    let expected = vec![(1, "Alicia".to_string()), (2, "Bob".to_string())];
    assert_eq!(rows(&pool, "bds_test_users").await, expected);

    warehouse.merge_batch(&target, &data).await.unwrap();
    assert_eq!(rows(&pool, "bds_test_users").await, expected);
}

#[tokio::test]
async fn repeated_key_in_one_batch_keeps_last_row() {
    let Some(pool) = test_pool().await else { return };
    fresh_table(&pool, "bds_test_repeats").await;

    let warehouse = PostgresWarehouse::new(pool.clone());
    let target = warehouse
        .prepare_target(&DatasetDescriptor::new("ds", "bds_test_repeats"))
        .await
        .unwrap();
    assert_eq!(target.key_columns, vec![0]);

    let data = batch(&[("1", "Alice"), ("2", "Bob"), ("1", "Alicia")]);
    let merged = warehouse
        .merge_batch(&target, &data)
        .await
        .expect("batch with a repeated key merges");

    assert_eq!(merged, 2);
    assert_eq!(
        rows(&pool, "bds_test_repeats").await,
        vec![(1, "Alicia".to_string()), (2, "Bob".to_string())]
    );
}

#[tokio::test]
async fn failed_batch_rolls_back_completely() {
    let Some(pool) = test_pool().await else { return };
    fresh_table(&pool, "bds_test_rollback").await;

    let warehouse = PostgresWarehouse::new(pool.clone());
    let target = warehouse
        .prepare_target(&DatasetDescriptor::new("ds", "bds_test_rollback"))
        .await
        .unwrap();

    warehouse
        .merge_batch(&target, &batch(&[("1", "first")]))
        .await
        .unwrap();

    let result = warehouse
        .merge_batch(&target, &batch(&[("2", "fine"), ("not-a-number", "bad")]))
        .await;

    assert!(matches!(result, Err(Error::Load { .. })));
    assert_eq!(rows(&pool, "bds_test_rollback").await, vec![(1, "first".to_string())]);

    // The staging table went down with the transaction, so the next batch works
    warehouse
        .merge_batch(&target, &batch(&[("3", "third")]))
        .await
        .expect("next batch succeeds");
    assert_eq!(rows(&pool, "bds_test_rollback").await.len(), 2);
}

#[tokio::test]
async fn configured_merge_statement_is_used() {
    let Some(pool) = test_pool().await else { return };
    fresh_table(&pool, "bds_test_custom").await;

    let descriptor = DatasetDescriptor::new("ds", "bds_test_custom").with_merge_sql(
        "INSERT INTO bds_test_custom SELECT id, upper(name) FROM tmp_bds_test_custom \
         ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
    );

    let warehouse = PostgresWarehouse::new(pool.clone());
    let target = warehouse.prepare_target(&descriptor).await.unwrap();
    warehouse
        .merge_batch(&target, &batch(&[("1", "quiet")]))
        .await
        .unwrap();

    assert_eq!(rows(&pool, "bds_test_custom").await, vec![(1, "QUIET".to_string())]);
}

#[tokio::test]
async fn missing_table_is_a_load_error() {
    let Some(pool) = test_pool().await else { return };

    let warehouse = PostgresWarehouse::new(pool);
    let result = warehouse
        .prepare_target(&DatasetDescriptor::new("ds", "bds_test_does_not_exist"))
        .await;

    assert!(matches!(result, Err(Error::Load { .. })));
}
