//! Integration tests for TableEditSession

mod common;

use std::time::Duration;

use gistools_core::Value;
use gistools_services::{
    RowState, ServiceError, SessionOptions, StatementKind, TableEditSession,
};
use pretty_assertions::assert_eq;

use common::{MockConnection, connected, parcels_fixture, result_set};

fn parcel_rows() -> MockConnection {
    parcels_fixture().with_query_response(
        r#"FROM "geo"."parcels""#,
        result_set(
            &["id", "owner"],
            vec![
                vec![Value::Int32(1), Value::String("Ada".into())],
                vec![Value::Int32(2), Value::String("Grace".into())],
                vec![Value::Int32(3), Value::Null],
            ],
        ),
    )
}

async fn load(connection: &MockConnection, table: &str) -> TableEditSession {
    TableEditSession::load(connected(connection), "geo", table, SessionOptions::default())
        .await
        .expect("session should load")
}

// ============ Load Tests ============

#[tokio::test]
async fn load_selects_non_spatial_columns_with_limit() {
    let connection = parcel_rows();
    let options = SessionOptions {
        row_limit: 50,
        ..SessionOptions::default()
    };

    let session = TableEditSession::load(connected(&connection), "geo", "parcels", options)
        .await
        .expect("session should load");

    assert_eq!(session.column_names(), vec!["id", "owner"]);
    assert_eq!(session.primary_key(), ["id".to_string()]);
    assert_eq!(session.row_count(), 3);
    assert_eq!(session.notice(), None);
    assert_eq!(
        connection.query_log(),
        vec![r#"SELECT "id", "owner" FROM "geo"."parcels" LIMIT 50"#.to_string()]
    );
}

#[tokio::test]
async fn table_without_primary_key_is_read_only() {
    let connection = parcels_fixture().with_query_response(
        r#"FROM "geo"."roads""#,
        result_set(
            &["id", "name"],
            vec![vec![Value::Int32(7), Value::String("High St".into())]],
        ),
    );
    let mut session = load(&connection, "roads").await;

    assert!(!session.has_primary_key());
    assert_eq!(session.notice(), Some("geo.roads has no primary key; read-only"));
    assert_eq!(session.row_count(), 1);

    assert!(matches!(session.add_row(), Err(ServiceError::ReadOnly(_))));
    assert!(matches!(session.delete_row(0), Err(ServiceError::ReadOnly(_))));
    assert!(matches!(
        session.update_cell(0, "name", Value::String("Main St".into())),
        Err(ServiceError::ReadOnly(_))
    ));
    assert!(!session.has_pending_changes());
}

#[tokio::test]
async fn primary_key_outside_selectable_columns_is_dropped() {
    let connection = MockConnection::new()
        .with_table("geo", "tiles")
        .with_column("geo", "tiles", "label", "text")
        .with_spatial("geo", "tiles", "shape", "POLYGON", 4326, gistools_core::SpatialKind::Geometry)
        .with_primary_key("geo", "tiles", &["shape"]);

    let mut session = load(&connection, "tiles").await;

    assert!(!session.has_primary_key());
    assert!(session.notice().is_some_and(|n| n.ends_with("read-only")));
    assert!(matches!(session.add_row(), Err(ServiceError::ReadOnly(_))));
}

#[tokio::test]
async fn table_without_selectable_columns_sends_no_select() {
    let connection = MockConnection::new()
        .with_table("geo", "shapes")
        .with_spatial("geo", "shapes", "geom", "POINT", 4326, gistools_core::SpatialKind::Geometry);

    let session = load(&connection, "shapes").await;

    assert_eq!(session.row_count(), 0);
    assert_eq!(session.notice(), Some("geo.shapes has no selectable columns"));
    assert!(connection.query_log().is_empty());
}

#[tokio::test]
async fn load_requires_a_target() {
    let connection = parcel_rows();
    let service = connected(&connection);
    service.set_connection_string(None);

    let result =
        TableEditSession::load(service, "geo", "parcels", SessionOptions::default()).await;

    assert!(matches!(result, Err(ServiceError::NotConnected)));
    assert!(connection.query_log().is_empty());
}

// ============ Pending Statement Tests ============

#[tokio::test]
async fn pending_statements_cover_insert_update_delete() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    session
        .update_cell_text(0, "owner", "Ada Lovelace")
        .expect("edit row 0");
    session.delete_row(1).expect("delete row 1");
    let new_row = session.add_row().expect("add row");
    session
        .update_cell(new_row, "id", Value::Int32(4))
        .expect("set id");
    session
        .update_cell_text(new_row, "owner", "Edsger")
        .expect("set owner");

    assert_eq!(session.rows()[0].state(), RowState::Modified);
    assert_eq!(session.rows()[1].state(), RowState::Deleted);
    assert_eq!(session.rows()[new_row].state(), RowState::Inserted);

    let statements = session.pending_statements().expect("statements");
    assert_eq!(statements.len(), 3);

    assert_eq!(statements[0].kind, StatementKind::Update);
    assert_eq!(
        statements[0].sql,
        r#"UPDATE "geo"."parcels" SET "owner" = $1 WHERE "id" = $2"#
    );
    assert_eq!(
        statements[0].params,
        vec![Value::String("Ada Lovelace".into()), Value::Int32(1)]
    );

    assert_eq!(statements[1].kind, StatementKind::Delete);
    assert_eq!(statements[1].sql, r#"DELETE FROM "geo"."parcels" WHERE "id" = $1"#);
    assert_eq!(statements[1].params, vec![Value::Int32(2)]);

    assert_eq!(statements[2].kind, StatementKind::Insert);
    assert_eq!(statements[2].row, new_row);
    assert_eq!(
        statements[2].sql,
        r#"INSERT INTO "geo"."parcels" ("id", "owner") VALUES ($1, $2) RETURNING "id", "owner""#
    );
    assert_eq!(
        statements[2].params,
        vec![Value::Int32(4), Value::String("Edsger".into())]
    );
}

#[tokio::test]
async fn blank_new_row_inserts_defaults() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    session.add_row().expect("add row");

    let statements = session.pending_statements().expect("statements");
    assert_eq!(
        statements[0].sql,
        r#"INSERT INTO "geo"."parcels" DEFAULT VALUES RETURNING "id", "owner""#
    );
    assert!(statements[0].params.is_empty());
}

#[tokio::test]
async fn row_added_then_deleted_sends_nothing() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    let index = session.add_row().expect("add row");
    session.delete_row(index).expect("delete it again");

    assert!(session.pending_statements().expect("statements").is_empty());
}

#[tokio::test]
async fn edits_validate_column_and_row() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    assert!(matches!(
        session.update_cell(0, "geom", Value::Null),
        Err(ServiceError::ValidationFailed(_))
    ));
    assert!(matches!(
        session.update_cell(9, "owner", Value::Null),
        Err(ServiceError::ValidationFailed(_))
    ));
    assert!(matches!(
        session.delete_row(3),
        Err(ServiceError::ValidationFailed(_))
    ));
}

#[tokio::test]
async fn restoring_original_value_leaves_row_unchanged_in_sql() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    session.update_cell_text(0, "owner", "Someone").expect("edit");
    session.update_cell_text(0, "owner", "Ada").expect("revert");

    assert!(session.pending_statements().expect("statements").is_empty());
}

// ============ Commit Tests ============

#[tokio::test]
async fn commit_runs_statements_in_one_transaction() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;
    session.update_cell_text(0, "owner", "Ada L.").expect("edit");
    session.delete_row(2).expect("delete");

    let summary = session.commit().await.expect("commit");

    assert_eq!((summary.inserted, summary.updated, summary.deleted), (0, 1, 1));
    assert_eq!(summary.total(), 2);

    let log: Vec<String> = connection
        .transaction_log()
        .into_iter()
        .map(|(sql, _)| sql)
        .collect();
    assert_eq!(
        log,
        vec![
            "BEGIN".to_string(),
            r#"UPDATE "geo"."parcels" SET "owner" = $1 WHERE "id" = $2"#.to_string(),
            r#"DELETE FROM "geo"."parcels" WHERE "id" = $1"#.to_string(),
            "COMMIT".to_string(),
        ]
    );

    assert_eq!(session.row_count(), 2);
    assert!(!session.has_pending_changes());
    assert!(session.rows().iter().all(|r| r.state() == RowState::Unchanged));
}

#[tokio::test]
async fn inserted_row_takes_server_generated_key() {
    let connection = parcel_rows().with_query_response(
        "RETURNING",
        result_set(
            &["id", "owner"],
            vec![vec![Value::Int32(4), Value::String("Bob".into())]],
        ),
    );
    let mut session = load(&connection, "parcels").await;
    let index = session.add_row().expect("add row");
    session.update_cell_text(index, "owner", "Bob").expect("set owner");

    let summary = session.commit().await.expect("commit");

    assert_eq!(summary.inserted, 1);
    assert_eq!(
        session.rows()[index].values,
        vec![Value::Int32(4), Value::String("Bob".into())]
    );
    assert_eq!(session.rows()[index].state(), RowState::Unchanged);

    session
        .update_cell_text(index, "owner", "Bobby")
        .expect("edit committed row");
    let statements = session.pending_statements().expect("statements");
    assert_eq!(
        statements[0].sql,
        r#"UPDATE "geo"."parcels" SET "owner" = $1 WHERE "id" = $2"#
    );
    assert_eq!(
        statements[0].params,
        vec![Value::String("Bobby".into()), Value::Int32(4)]
    );
}

#[tokio::test]
async fn insert_that_stores_nothing_rolls_back() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;
    let index = session.add_row().expect("add row");
    session.update_cell_text(index, "owner", "Bob").expect("set owner");

    let err = session.commit().await.expect_err("no row came back");

    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(
        connection.transaction_log().last().map(|(sql, _)| sql.clone()),
        Some("ROLLBACK".to_string())
    );
    assert_eq!(session.rows()[index].state(), RowState::Inserted);
}

#[tokio::test]
async fn commit_without_edits_opens_no_transaction() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    let summary = session.commit().await.expect("commit");

    assert_eq!(summary.total(), 0);
    assert!(connection.transaction_log().is_empty());
}

#[tokio::test]
async fn failed_statement_rolls_back_and_keeps_edits() {
    let connection = parcel_rows().with_execute_failure("DELETE FROM");
    let mut session = load(&connection, "parcels").await;
    session.update_cell_text(0, "owner", "Ada L.").expect("edit");
    session.delete_row(1).expect("delete");

    let err = session.commit().await.expect_err("delete fails");

    assert!(matches!(err, ServiceError::ServerError(_)));
    let log = connection.transaction_log();
    assert_eq!(log.last().map(|(sql, _)| sql.as_str()), Some("ROLLBACK"));
    assert!(!log.iter().any(|(sql, _)| sql == "COMMIT"));
    assert!(session.has_pending_changes());
    assert_eq!(session.row_count(), 3);
}

#[tokio::test]
async fn zero_affected_rows_is_a_conflict() {
    let connection = parcel_rows().with_affected_rows(0);
    let mut session = load(&connection, "parcels").await;
    session.update_cell_text(1, "owner", "Grace H.").expect("edit");

    let err = session.commit().await.expect_err("row vanished");

    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(
        connection.transaction_log().last().map(|(sql, _)| sql.clone()),
        Some("ROLLBACK".to_string())
    );
    assert_eq!(session.rows()[1].state(), RowState::Modified);
}

#[tokio::test]
async fn typed_cell_text_is_bound_by_column_type() {
    let connection = parcel_rows();
    let mut session = load(&connection, "parcels").await;

    session.update_cell_text(2, "id", "30").expect("edit id");
    session.update_cell_text(2, "owner", "").expect("edit owner");

    let statements = session.pending_statements().expect("statements");
    assert_eq!(
        statements[0].params,
        vec![Value::Int32(30), Value::String(String::new()), Value::Int32(3)]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_commit_times_out() {
    let connection = parcel_rows().with_execute_delay(Duration::from_secs(30));
    let mut session = TableEditSession::load(
        connected(&connection),
        "geo",
        "parcels",
        SessionOptions {
            row_limit: 10,
            timeout: Duration::from_secs(1),
        },
    )
    .await
    .expect("load");
    session.update_cell_text(0, "owner", "x").expect("edit");

    let err = session.commit().await.expect_err("commit is too slow");

    assert!(matches!(err, ServiceError::Timeout(_)));
    assert!(session.has_pending_changes());
}
