mod common;

use std::collections::BTreeMap;

use common::{Harness, cells, connection, csv, orders};
use redshift_upload::UploadError;
use redshift_upload::catalog::BlobStore;
use redshift_upload::config::UploadOptions;
use redshift_upload::schema::ColumnOrigin;
use redshift_upload::source::Source;
use redshift_upload::sql::TableName;
use redshift_upload::staging::{StagedLoad, cleanup};
use redshift_upload::types::{ColumnType, TypeKind};
use redshift_upload::upload::{UploadRequest, upload};

const ORDERS_CSV: &str = "id,Customer.Name,qty,amount,active,ordered_at\n\
                          1,Alice,3.0,2.5,true,2024-01-01\n\
                          2,Bob,4,13.37,FALSE,2024-01-03\n";

fn seeded_orders(harness: &Harness) {
    harness.warehouse.create_table(
        &orders(),
        &[
            ("id", ColumnType::scalar(TypeKind::Integer)),
            ("name", ColumnType::varchar(3)),
        ],
    );
    harness
        .warehouse
        .insert_rows(&orders(), vec![cells(&["7", "old"])]);
}

#[test]
fn new_table_is_created_with_inferred_types_and_coerced_rows() {
    let harness = Harness::new();
    let report = harness
        .upload(csv(ORDERS_CSV), &orders(), harness.options())
        .expect("upload");

    let types: Vec<(String, ColumnType)> = report
        .columns
        .iter()
        .map(|c| (c.name.clone(), c.column_type))
        .collect();
    assert_eq!(
        types,
        vec![
            ("id".to_string(), ColumnType::scalar(TypeKind::SmallInt)),
            ("customer_name".to_string(), ColumnType::varchar(5)),
            ("qty".to_string(), ColumnType::scalar(TypeKind::SmallInt)),
            ("amount".to_string(), ColumnType::scalar(TypeKind::Double)),
            ("active".to_string(), ColumnType::scalar(TypeKind::Boolean)),
            ("ordered_at".to_string(), ColumnType::scalar(TypeKind::Date)),
        ]
    );
    assert!(report.columns.iter().all(|c| c.origin == ColumnOrigin::Inferred));
    assert_eq!(report.rows, 2);
    assert_eq!(report.chunks, 1);

    let rows = harness.warehouse.rows(&orders()).expect("table exists");
    assert_eq!(
        rows,
        vec![
            cells(&["1", "Alice", "3", "2.5", "true", "2024-01-01"]),
            cells(&["2", "Bob", "4", "13.37", "false", "2024-01-03"]),
        ]
    );

    let statements = harness.warehouse.statements();
    assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"orders\""));
    assert!(statements.iter().all(|s| !s.starts_with("LOCK TABLE")));
    let copy = statements
        .iter()
        .find(|s| s.starts_with("COPY"))
        .expect("copy issued");
    assert!(copy.contains("<redacted>"));
    assert!(!copy.contains("test-secret"));
}

#[test]
fn repeated_drop_uploads_resolve_identical_types() {
    let harness = Harness::new();
    let options = UploadOptions {
        drop_table: true,
        ..harness.options()
    };
    let first = harness
        .upload(csv(ORDERS_CSV), &orders(), options.clone())
        .expect("first upload");
    let second = harness
        .upload(csv(ORDERS_CSV), &orders(), options)
        .expect("second upload");
    let types = |report: &redshift_upload::UploadReport| {
        report
            .columns
            .iter()
            .map(|c| c.column_type)
            .collect::<Vec<_>>()
    };
    assert_eq!(types(&first), types(&second));
    assert_eq!(harness.warehouse.rows(&orders()).expect("rows").len(), 2);
}

#[test]
fn extra_local_columns_are_rejected_and_table_is_untouched() {
    let harness = Harness::new();
    seeded_orders(&harness);
    let err = harness
        .upload(csv("id,name,discount\n1,ab,0.5\n"), &orders(), harness.options())
        .unwrap_err();
    match &err {
        UploadError::SchemaIncompatible { columns, statements, .. } => {
            assert_eq!(columns, &vec!["discount".to_string()]);
            assert!(statements[0].contains("ADD COLUMN \"discount\" DOUBLE PRECISION"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("discount"));
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["7", "old"])]
    );
}

#[test]
fn remote_columns_missing_locally_load_as_null() {
    let harness = Harness::new();
    seeded_orders(&harness);
    harness
        .upload(csv("name\nnew\n"), &orders(), harness.options())
        .expect("upload");
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["7", "old"]), cells(&["", "new"])]
    );
}

#[test]
fn narrow_varchar_is_widened_in_place() {
    let harness = Harness::new();
    seeded_orders(&harness);
    let report = harness
        .upload(csv("id,name\n8,0123456789\n"), &orders(), harness.options())
        .expect("upload");
    assert_eq!(report.widened.len(), 1);
    assert_eq!(report.widened[0].to, 10);

    let columns = harness.warehouse.columns(&orders()).expect("columns");
    assert_eq!(columns[1].column_type, ColumnType::varchar(10));
    let statements = harness.warehouse.statements();
    let lock = statements
        .iter()
        .position(|s| s.starts_with("LOCK TABLE"))
        .expect("lock");
    let alter = statements
        .iter()
        .position(|s| s.contains("ALTER COLUMN \"name\" TYPE VARCHAR(10)"))
        .expect("alter");
    assert!(lock < alter);
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["7", "old"]), cells(&["8", "0123456789"])]
    );
}

#[test]
fn refused_widening_reports_the_values_that_needed_it() {
    let harness = Harness::new();
    seeded_orders(&harness);
    harness.warehouse.fail_statements_containing("ALTER COLUMN");
    let err = harness
        .upload(
            csv("id,name\n8,abcdef\n9,ok\n10,0123456789\n"),
            &orders(),
            harness.options(),
        )
        .unwrap_err();
    match &err {
        UploadError::WideningFailed {
            column,
            from,
            to,
            count,
            examples,
            message,
            ..
        } => {
            assert_eq!(column, "name");
            assert_eq!((*from, *to), (3, 10));
            assert_eq!(*count, 2);
            let rows: Vec<usize> = examples.iter().map(|value| value.row).collect();
            assert_eq!(rows, vec![0, 2]);
            assert!(message.contains("injected failure"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    let rendered = err.to_string();
    assert!(rendered.contains("VARCHAR(10)"));
    assert!(rendered.contains("abcdef"));
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["7", "old"])]
    );
    let columns = harness.warehouse.columns(&orders()).expect("columns");
    assert_eq!(columns[1].column_type, ColumnType::varchar(3));
}

#[test]
fn varchar_width_counts_utf8_bytes() {
    let harness = Harness::new();
    let report = harness
        .upload(csv("symbol\n\u{20AC}\n"), &orders(), harness.options())
        .expect("upload");
    assert_eq!(report.columns[0].column_type, ColumnType::varchar(3));
}

#[test]
fn conflicting_options_fail_before_touching_the_warehouse() {
    let harness = Harness::new();
    for options in [
        UploadOptions {
            truncate_table: true,
            drop_table: true,
            ..harness.options()
        },
        UploadOptions {
            skip_checks: true,
            drop_table: true,
            ..harness.options()
        },
    ] {
        let err = harness
            .upload(csv(ORDERS_CSV), &orders(), options)
            .unwrap_err();
        assert!(matches!(err, UploadError::Configuration(_)));
    }
    assert!(harness.warehouse.statements().is_empty());
    assert_eq!(harness.store.connections(), 0);
}

#[test]
fn skip_checks_requires_an_existing_table() {
    let harness = Harness::new();
    let options = UploadOptions {
        skip_checks: true,
        ..harness.options()
    };
    let err = harness
        .upload(csv(ORDERS_CSV), &orders(), options)
        .unwrap_err();
    assert!(matches!(err, UploadError::Configuration(_)));
}

#[test]
fn declared_types_reject_incompatible_values() {
    let harness = Harness::new();
    let mut request = UploadRequest::new(csv("id\n1\n70000\n"), orders(), connection());
    request.options = harness.options();
    request.column_types = BTreeMap::from([(
        "id".to_string(),
        ColumnType::scalar(TypeKind::SmallInt),
    )]);
    let err = upload(request, &harness.warehouse, harness.store.as_ref()).unwrap_err();
    match err {
        UploadError::TypeResolution { column, examples, .. } => {
            assert_eq!(column, "id");
            assert_eq!(examples.len(), 1);
            assert_eq!(examples[0].row, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn empty_sources_create_the_table_without_copying() {
    let harness = Harness::new();
    let report = harness
        .upload(csv("id,name\n"), &orders(), harness.options())
        .expect("upload");
    assert_eq!(report.chunks, 0);
    assert!(harness.store.keys().is_empty());
    assert!(harness.warehouse.rows(&orders()).expect("rows").is_empty());
    assert!(
        harness
            .warehouse
            .statements()
            .iter()
            .all(|s| !s.starts_with("COPY"))
    );
}

#[test]
fn parallel_loads_stage_several_chunks_after_one_connect() {
    let harness = Harness::new();
    let body: String = (0..7).map(|i| format!("{i},name{i}\n")).collect();
    let options = UploadOptions {
        load_in_parallel: 3,
        ..harness.options()
    };
    let report = harness
        .upload(csv(&format!("id,name\n{body}")), &orders(), options)
        .expect("upload");
    assert_eq!(report.chunks, 3);
    assert_eq!(harness.store.connections(), 1);
    assert_eq!(harness.store.keys().len(), 3);
    assert!(harness.store.keys()[0].starts_with("public_orders_"));
    assert_eq!(harness.warehouse.rows(&orders()).expect("rows").len(), 7);
}

#[test]
fn cleanup_removes_staged_objects() {
    let harness = Harness::new();
    let options = UploadOptions {
        cleanup_blob_store: true,
        ..harness.options()
    };
    harness
        .upload(csv(ORDERS_CSV), &orders(), options)
        .expect("upload");
    assert!(harness.store.keys().is_empty());
}

#[test]
fn undeletable_objects_are_blanked() {
    let harness = Harness::new();
    harness.store.put("p0", b"1,a\n").expect("put");
    harness.store.put("p1", b"2,b\n").expect("put");
    harness.store.refuse_delete("p1");
    let staged = StagedLoad {
        prefix: "p".to_string(),
        keys: vec!["p0".to_string(), "p1".to_string()],
    };
    cleanup(harness.store.as_ref(), &staged);
    assert_eq!(harness.store.object("p0"), None);
    assert_eq!(harness.store.object("p1"), Some(Vec::new()));
}

#[test]
fn expired_store_credentials_are_reported() {
    let harness = Harness::new();
    harness.store.expire_credentials();
    let err = harness
        .upload(csv(ORDERS_CSV), &orders(), harness.options())
        .unwrap_err();
    assert!(matches!(err, UploadError::TransientStore { .. }));
    assert!(err.to_string().contains("credentials have expired"));
    assert!(harness.warehouse.rows(&orders()).is_none());
}

#[test]
fn uploads_are_recorded_and_granted() {
    let harness = Harness::new();
    let records = TableName::new("public", "upload_records");
    harness.warehouse.create_table(
        &records,
        &[
            ("table_name", ColumnType::varchar(256)),
            ("upload_time", ColumnType::scalar(TypeKind::Timestamp)),
            ("rows", ColumnType::scalar(TypeKind::Integer)),
            ("redshift_user", ColumnType::varchar(256)),
            ("os_user", ColumnType::varchar(256)),
        ],
    );
    let options = UploadOptions {
        records_table: Some("public.upload_records".to_string()),
        grant_access: vec!["analyst".to_string()],
        ..harness.options()
    };
    harness
        .upload(csv(ORDERS_CSV), &orders(), options)
        .expect("upload");

    let logged = harness.warehouse.rows(&records).expect("records");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0][0].as_deref(), Some("public.orders"));
    assert_eq!(logged[0][2].as_deref(), Some("2"));
    assert_eq!(logged[0][3].as_deref(), Some("loader"));
    assert_eq!(harness.warehouse.table_grants(&orders()), vec!["analyst"]);
}

#[test]
fn truncate_replaces_existing_rows() {
    let harness = Harness::new();
    seeded_orders(&harness);
    let options = UploadOptions {
        truncate_table: true,
        ..harness.options()
    };
    harness
        .upload(csv("id,name\n9,new\n"), &orders(), options)
        .expect("upload");
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["9", "new"])]
    );
}

#[test]
fn header_less_text_loads_positionally() {
    let harness = Harness::new();
    harness.warehouse.create_table(
        &orders(),
        &[
            ("id", ColumnType::scalar(TypeKind::Integer)),
            ("name", ColumnType::varchar(10)),
        ],
    );
    let options = UploadOptions {
        load_as_delimited_text: true,
        no_header: true,
        ..harness.options()
    };
    harness
        .upload(csv("1,alpha\n2,beta\n"), &orders(), options)
        .expect("upload");
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["1", "alpha"]), cells(&["2", "beta"])]
    );
    let copy = harness
        .warehouse
        .statements()
        .into_iter()
        .find(|s| s.starts_with("COPY"))
        .expect("copy");
    assert!(copy.starts_with("COPY \"public\".\"orders\" FROM"));
}

#[test]
fn skip_checks_maps_headers_by_name() {
    let harness = Harness::new();
    harness.warehouse.create_table(
        &orders(),
        &[
            ("id", ColumnType::scalar(TypeKind::Integer)),
            ("name", ColumnType::varchar(10)),
        ],
    );
    let options = UploadOptions {
        skip_checks: true,
        ..harness.options()
    };
    harness
        .upload(csv("Name,ID\nalpha,1\n"), &orders(), options)
        .expect("upload");
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["1", "alpha"])]
    );
}

#[test]
fn json_records_upload_like_rows() {
    let harness = Harness::new();
    let path = harness.workspace.write(
        "orders.jsonl",
        "{\"id\": 1, \"active\": true}\n{\"id\": 2, \"active\": null}\n",
    );
    let report = harness
        .upload(Source::FilePath(path), &orders(), harness.options())
        .expect("upload");
    assert_eq!(report.columns[1].column_type.kind, TypeKind::Boolean);
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["1", "true"]), cells(&["2", ""])]
    );
}
