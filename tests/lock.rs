mod common;

use common::{Harness, cells, csv, orders};
use redshift_upload::UploadError;
use redshift_upload::catalog::Catalog;
use redshift_upload::config::UploadOptions;
use redshift_upload::lock::{ExclusiveLock, LockState};
use redshift_upload::types::{ColumnType, TypeKind};
use redshift_upload::views::ViewKind;

fn seed(harness: &Harness) {
    harness.warehouse.create_table(
        &orders(),
        &[
            ("id", ColumnType::scalar(TypeKind::Integer)),
            ("name", ColumnType::varchar(10)),
        ],
    );
    harness
        .warehouse
        .insert_rows(&orders(), vec![cells(&["1", "kept"])]);
}

#[test]
fn competing_sessions_are_terminated_before_locking() {
    let harness = Harness::new();
    seed(&harness);
    let session = harness.warehouse.add_session(&orders(), "etl_job", true);
    harness
        .upload(csv("id,name\n2,new\n"), &orders(), harness.options())
        .expect("upload");
    assert_eq!(harness.warehouse.terminated_sessions(), vec![session]);
    assert_eq!(harness.warehouse.rows(&orders()).expect("rows").len(), 2);
}

#[test]
fn held_lock_surfaces_as_contention_and_changes_nothing() {
    let harness = Harness::new();
    seed(&harness);
    harness
        .warehouse
        .create_view("public.recent", ViewKind::View, "select * from public.orders", "owner", &[])
        .expect("view");
    harness.warehouse.add_session(&orders(), "superuser_job", false);

    let options = UploadOptions {
        drop_table: true,
        ..harness.options()
    };
    let err = harness
        .upload(csv("code\nabc\n"), &orders(), options)
        .unwrap_err();
    match &err {
        UploadError::LockContention { table, .. } => assert_eq!(table, "public.orders"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().starts_with("[U005]"));

    assert!(!harness.warehouse.in_transaction());
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("rows"),
        vec![cells(&["1", "kept"])]
    );
    assert_eq!(harness.warehouse.columns(&orders()).expect("columns").len(), 2);
    assert!(harness.warehouse.view("public.recent").is_some());
}

#[test]
fn failure_inside_the_critical_section_rolls_back() {
    let harness = Harness::new();
    seed(&harness);
    harness.warehouse.fail_statements_containing("COPY");
    let options = UploadOptions {
        drop_table: true,
        ..harness.options()
    };
    let err = harness
        .upload(csv("id,name\n2,new\n"), &orders(), options)
        .unwrap_err();
    assert!(matches!(err, UploadError::Catalog(_)));
    assert!(!harness.warehouse.in_transaction());
    assert_eq!(
        harness.warehouse.rows(&orders()).expect("table survives"),
        vec![cells(&["1", "kept"])]
    );
    let statements = harness.warehouse.statements();
    assert!(statements.iter().any(|s| s.starts_with("DROP TABLE")));
}

#[test]
fn guard_rolls_back_when_dropped_uncommitted() {
    let harness = Harness::new();
    seed(&harness);
    {
        let lock = ExclusiveLock::acquire(&harness.warehouse, &orders(), true).expect("lock");
        assert_eq!(lock.state(), LockState::Locked);
        assert!(harness.warehouse.in_transaction());
    }
    assert!(!harness.warehouse.in_transaction());

    let lock = ExclusiveLock::acquire(&harness.warehouse, &orders(), true).expect("lock");
    lock.commit().expect("commit");
    assert!(!harness.warehouse.in_transaction());
    assert!(harness.warehouse.table_exists("public", "orders").expect("exists"));
}

#[test]
fn new_tables_skip_the_lock() {
    let harness = Harness::new();
    harness.warehouse.add_session(&orders(), "someone", false);
    harness
        .upload(csv("id\n1\n"), &orders(), harness.options())
        .expect("upload");
    assert!(
        harness
            .warehouse
            .statements()
            .iter()
            .all(|s| !s.starts_with("LOCK TABLE"))
    );
}
