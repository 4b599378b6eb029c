use super::*;
use crate::introspect::{INBOUND_FKS_SQL, TABLE_EXISTS_SQL};
use crate::source::MemorySource;
use crate::testing::{MockConnection, count_row};
use crate::value::{DbRow, SqlValue};

const SITES: &str = r#"{
  "layers": [{
    "id": 0,
    "name": "Sites",
    "uniqueIdField": {"name": "OBJECTID"},
    "fields": [
      {"name": "OBJECTID", "type": "esriFieldTypeOID", "nullable": false},
      {"name": "Status", "type": "esriFieldTypeString", "length": 1,
       "domain": {"type": "codedValue", "name": "Status",
                  "codedValues": [{"name": "Open", "code": "O"}, {"name": "Closed", "code": "C"}]}}
    ]
  }]
}"#;

fn sites() -> SchemaDocument {
    serde_json::from_str(SITES).unwrap()
}

/// First line of every write, enough to see the order of operations.
fn outline(conn: &MockConnection) -> String {
    conn.writes()
        .iter()
        .map(|s| s.lines().next().unwrap_or_default().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn schema_run_creates_lookups_before_their_referrers() {
    let conn = MockConnection::new();
    let report = process_schema(&conn, &sites(), &TranslatorOptions::default(), DdlOptions::default())
        .await
        .unwrap();

    let created: Vec<_> = report.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(created, ["Status", "Sites"]);
    assert_eq!(report.seeded.added, 2);

    let writes = conn.writes();
    let status_at = writes.iter().position(|s| s.starts_with(r#"CREATE TABLE "Status""#));
    let seed_at = writes.iter().position(|s| s.starts_with(r#"INSERT INTO "Status""#));
    let sites_at = writes.iter().position(|s| s.starts_with(r#"CREATE TABLE "Sites""#));
    assert!(status_at.is_some() && status_at < seed_at && seed_at < sites_at, "{writes:#?}");
    assert_eq!(conn.sql().last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn translation_failure_touches_nothing() {
    let doc: SchemaDocument = serde_json::from_str(
        r#"{"layers": [{"id": 0, "name": "Bad", "fields": [
            {"name": "img", "type": "esriFieldTypeRaster"}
        ]}]}"#,
    )
    .unwrap();
    let conn = MockConnection::new();
    let err = process_schema(&conn, &doc, &TranslatorOptions::default(), DdlOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 104);
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn schema_conflict_rolls_back() {
    let conn = MockConnection::new();
    conn.on(TABLE_EXISTS_SQL, vec![count_row(1)]);
    let err = process_schema(&conn, &sites(), &TranslatorOptions::default(), DdlOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::SchemaConflict(t) if t == "Status"), "{err}");
    assert_eq!(err.exit_code(), 103);
    assert!(conn.writes().is_empty());
    assert_eq!(conn.sql().last().map(String::as_str), Some("ROLLBACK"));
}

fn rows(values: Vec<Vec<SqlValue>>) -> MemorySource {
    MemorySource::new(vec!["id".to_string(), "name".to_string()], values)
}

fn keyed_load(reset: bool) -> LoadOptions {
    LoadOptions {
        reconcile: ReconcileOptions {
            primary_key: Some("id".to_string()),
            ..ReconcileOptions::default()
        },
        reset,
        ..LoadOptions::default()
    }
}

fn referenced_by_u(conn: &MockConnection) {
    conn.on(
        INBOUND_FKS_SQL,
        vec![DbRow::new(vec![
            "U_fk_col_fkey".into(),
            "U".into(),
            SqlValue::Int(1),
            "fk_col".into(),
            "T".into(),
            "id".into(),
        ])],
    );
}

#[tokio::test]
async fn reset_load_truncates_between_constraint_drop_and_restore() {
    let conn = MockConnection::new();
    referenced_by_u(&conn);
    let mut source = rows(vec![
        vec![SqlValue::Int(1), "one".into()],
        vec![SqlValue::Int(2), "two".into()],
    ]);

    let summary = load_rows(&conn, "T", &mut source, &keyed_load(true), DdlOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.added, 2);
    insta::assert_snapshot!(outline(&conn), @r#"
    ALTER TABLE "U" DROP CONSTRAINT "U_fk_col_fkey"
    TRUNCATE TABLE "T"
    INSERT INTO "T" ("id", "name")
    INSERT INTO "T" ("id", "name")
    ALTER TABLE "U" ADD CONSTRAINT "U_fk_col_fkey" FOREIGN KEY ("fk_col") REFERENCES "T" ("id")
    "#);
    assert_eq!(conn.sql().last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn failed_reset_load_restores_constraints_then_rolls_back() {
    let conn = MockConnection::new();
    referenced_by_u(&conn);
    conn.fail_on("INSERT INTO");
    let mut source = rows(vec![vec![SqlValue::Int(1), "one".into()]]);

    let err = load_rows(&conn, "T", &mut source, &keyed_load(true), DdlOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "{err}");

    let sql = conn.sql();
    let restore = sql.iter().position(|s| s.contains("ADD CONSTRAINT"));
    let rollback = sql.iter().position(|s| s == "ROLLBACK");
    assert!(restore.is_some() && restore < rollback, "{sql:#?}");
    assert!(!sql.iter().any(|s| s == "COMMIT"));
}

#[tokio::test]
async fn reset_applies_to_the_first_of_several_sources() {
    let conn = MockConnection::new();
    referenced_by_u(&conn);
    let sources = vec![
        rows(vec![
            vec![SqlValue::Int(1), "one".into()],
            vec![SqlValue::Int(2), "two".into()],
        ]),
        rows(vec![vec![SqlValue::Int(3), "three".into()]]),
    ];

    let summaries = load_sources(&conn, "T", sources, &keyed_load(true), DdlOptions::default())
        .await
        .unwrap();

    let added: Vec<_> = summaries.iter().map(|s| s.added).collect();
    assert_eq!(added, [2, 1]);
    insta::assert_snapshot!(outline(&conn), @r#"
    ALTER TABLE "U" DROP CONSTRAINT "U_fk_col_fkey"
    TRUNCATE TABLE "T"
    INSERT INTO "T" ("id", "name")
    INSERT INTO "T" ("id", "name")
    ALTER TABLE "U" ADD CONSTRAINT "U_fk_col_fkey" FOREIGN KEY ("fk_col") REFERENCES "T" ("id")
    INSERT INTO "T" ("id", "name")
    "#);
    let commits = conn.sql().iter().filter(|s| *s == "COMMIT").count();
    assert_eq!(commits, 2);
}

#[tokio::test]
async fn misshapen_rows_are_skipped() {
    let conn = MockConnection::new();
    let mut source = rows(vec![
        vec![SqlValue::Int(1)],
        vec![SqlValue::Int(2), "two".into()],
        vec![SqlValue::Null, "nobody".into()],
    ]);

    let summary = load_rows(&conn, "T", &mut source, &keyed_load(false), DdlOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.to_string(), "1 added, 0 updated, 2 skipped (1 with a null primary key)");
    assert_eq!(conn.writes().len(), 1);
}

#[test]
fn missing_schema_file_is_reported_as_such() {
    let err = read_schema_file(Utf8Path::new("does/not/exist.json")).unwrap_err();
    assert_eq!(err.exit_code(), 11);
}

fn plant_schema() -> Vec<SchemaSheetRow> {
    [("UAID", "Short Text"), ("Count", "Number"), ("Notes", "Short Text")]
        .into_iter()
        .map(|(name, data_type)| SchemaSheetRow {
            name: name.to_string(),
            data_type: data_type.to_string(),
            description: None,
        })
        .collect()
}

fn plant_rows() -> MemorySource {
    MemorySource::new(
        vec!["UAID".to_string(), "Count".to_string()],
        vec![
            vec!["A-1".into(), SqlValue::Float(3.0)],
            vec!["A-2".into(), SqlValue::Float(1.0)],
        ],
    )
}

fn plant_workbook() -> WorkbookOptions {
    WorkbookOptions {
        data_sheet: "Plants".to_string(),
        schema_sheet: Some("Schema".to_string()),
        load: LoadOptions {
            reconcile: ReconcileOptions {
                primary_key: Some("UAID".to_string()),
                ..ReconcileOptions::default()
            },
            ..LoadOptions::default()
        },
        ..WorkbookOptions::default()
    }
}

#[tokio::test]
async fn workbook_creates_its_table_then_loads_in_one_transaction() {
    let conn = MockConnection::new();
    let report = process_sheets(
        &conn,
        &mut plant_rows(),
        Some(&plant_schema()),
        &plant_workbook(),
        DdlOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.table, "Plants");
    assert_eq!(report.outcome.map(|o| o.action), Some(TableAction::Created));
    assert_eq!(report.rows.map(|s| s.added), Some(2));

    let writes = conn.writes();
    assert!(writes[0].starts_with(r#"CREATE TABLE "Plants""#), "{writes:#?}");
    assert!(!writes[0].contains("Notes"), "{}", writes[0]);
    let sql = conn.sql();
    assert_eq!(sql.iter().filter(|s| *s == "COMMIT").count(), 1);
    assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn existing_workbook_table_is_kept_without_force() {
    let conn = MockConnection::new();
    conn.on(TABLE_EXISTS_SQL, vec![count_row(1)]);
    let report = process_sheets(
        &conn,
        &mut plant_rows(),
        Some(&plant_schema()),
        &plant_workbook(),
        DdlOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.outcome.is_none());
    assert_eq!(report.rows.map(|s| s.added), Some(2));
    assert!(conn.writes().iter().all(|s| s.starts_with("INSERT INTO")));
}

#[tokio::test]
async fn readonly_workbook_does_not_load_into_a_table_it_did_not_create() {
    let conn = MockConnection::new();
    let ddl = DdlOptions {
        readonly: true,
        ..DdlOptions::default()
    };
    let mut options = plant_workbook();
    options.load.reconcile.readonly = true;

    let report = process_sheets(&conn, &mut plant_rows(), Some(&plant_schema()), &options, ddl)
        .await
        .unwrap();

    assert_eq!(report.outcome.map(|o| o.action), Some(TableAction::Created));
    assert!(report.rows.is_none());
    assert!(conn.writes().is_empty());
}

#[tokio::test]
async fn schema_only_workbook_loads_nothing() {
    let conn = MockConnection::new();
    let mut options = plant_workbook();
    options.schema_only = true;

    let report = process_sheets(
        &conn,
        &mut plant_rows(),
        Some(&plant_schema()),
        &options,
        DdlOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.rows.is_none());
    assert!(!conn.writes().iter().any(|s| s.starts_with("INSERT")));
}

#[tokio::test]
async fn schema_only_without_a_schema_sheet_is_an_argument_error() {
    let conn = MockConnection::new();
    let options = WorkbookOptions {
        data_sheet: "Plants".to_string(),
        schema_only: true,
        ..WorkbookOptions::default()
    };
    let err = process_workbook(&conn, Utf8Path::new("plants.xlsx"), &options, DdlOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 10);
    assert!(conn.statements().is_empty());
}
