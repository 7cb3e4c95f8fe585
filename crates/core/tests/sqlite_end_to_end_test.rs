use querygate_core::backend::{
    ConnectionResolver, EnvConnectionResolver, QueryExecutor, SqliteExecutor,
};
use querygate_core::gateway::{QueryGateway, QueryOutcome, SecurityOptions};
use serde_json::json;
use std::sync::Arc;

async fn setup() -> (tempfile::TempDir, QueryGateway) {
    setup_with(SecurityOptions::default()).await
}

async fn setup_with(options: SecurityOptions) -> (tempfile::TempDir, QueryGateway) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.db");
    std::fs::File::create(&path).unwrap();

    let resolver = EnvConnectionResolver::from_vars([(
        "QUERYGATE_INVENTORY_URI".to_string(),
        format!("sqlite://{}", path.display()),
    )]);
    let descriptor = resolver.resolve("inventory").unwrap();

    let executor = SqliteExecutor::default();
    executor
        .execute(
            &descriptor,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, qty INTEGER)",
            &[],
            10,
        )
        .await
        .unwrap();
    executor
        .execute(
            &descriptor,
            "INSERT INTO items (name, qty) VALUES ('bolt', 40), ('nut', 75)",
            &[],
            10,
        )
        .await
        .unwrap();

    let executor = executor.with_read_only(options.read_only);
    let gateway = QueryGateway::new(options, Arc::new(resolver), Arc::new(executor));
    (dir, gateway)
}

#[tokio::test]
async fn test_select_through_gateway() {
    let (_dir, gateway) = setup().await;

    let outcome = gateway
        .handle_query(None, "SELECT name, qty FROM items WHERE qty > ? ORDER BY id", &[json!(50)])
        .await
        .unwrap();
    let QueryOutcome::Executed(rows) = outcome else {
        panic!("expected rows");
    };
    assert_eq!(rows.connection, "inventory");
    assert_eq!(rows.columns, vec!["name", "qty"]);
    assert_eq!(rows.rows, vec![vec![json!("nut"), json!(75)]]);
}

async fn count(gateway: &QueryGateway) -> serde_json::Value {
    match gateway
        .handle_query(None, "SELECT COUNT(*) AS n FROM items", &[])
        .await
        .unwrap()
    {
        QueryOutcome::Executed(rows) => rows.rows[0][0].clone(),
        QueryOutcome::ConfirmationRequired(_) => panic!("count needs no confirmation"),
    }
}

#[tokio::test]
async fn test_confirmed_insert_lands_in_database() {
    let (_dir, gateway) = setup().await;

    let outcome = gateway
        .handle_query(
            Some("inventory"),
            "INSERT INTO items (name, qty) VALUES (?, ?)",
            &[json!("washer"), json!(12)],
        )
        .await
        .unwrap();
    let QueryOutcome::ConfirmationRequired(pending) = outcome else {
        panic!("expected confirmation");
    };

    assert_eq!(count(&gateway).await, json!(2));

    let rows = gateway.handle_confirm(&pending.token).await.unwrap();
    assert_eq!(rows.rows_affected, Some(1));
    assert_eq!(count(&gateway).await, json!(3));
}

#[tokio::test]
async fn test_multi_statement_drop_waits_for_confirmation() {
    let (_dir, gateway) = setup_with(SecurityOptions {
        allow_multi_statement: true,
        ..SecurityOptions::default()
    })
    .await;

    let outcome = gateway
        .handle_query(None, "SELECT 1; DROP TABLE items", &[])
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::ConfirmationRequired(_)));
    assert_eq!(count(&gateway).await, json!(2));
}

#[tokio::test]
async fn test_read_only_gateway_cannot_write_through_cte() {
    let (_dir, gateway) = setup_with(SecurityOptions {
        read_only: true,
        ..SecurityOptions::default()
    })
    .await;

    let err = gateway
        .handle_query(None, "WITH x AS (SELECT 1) DELETE FROM items", &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), "database_error");
    assert_eq!(count(&gateway).await, json!(2));
}

#[tokio::test]
async fn test_schema_tools_against_sqlite() {
    let (_dir, gateway) = setup().await;

    let tables = gateway.list_tables(None, None).await.unwrap();
    assert_eq!(tables.schema, "main");
    assert_eq!(tables.tables.len(), 1);
    assert_eq!(tables.tables[0].name, "items");

    let columns = gateway.describe_table(None, None, "items").await.unwrap();
    let names: Vec<&str> = columns.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "qty"]);
    assert!(columns.columns[0].is_primary);
    assert!(!columns.columns[1].is_primary);
}
