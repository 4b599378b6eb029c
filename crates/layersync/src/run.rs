//! End-to-end runs: applying a schema description, and loading rows into
//! a table.
//!
//! These own the commit boundary. Everything a run writes goes into one
//! transaction that is committed when the run succeeds and rolled back
//! when it fails.

use camino::Utf8Path;

use layersync_sql::sanitize;

use crate::connection::Connection;
use crate::ddl::{DdlExecutor, DdlOptions, TableAction, TableOutcome};
use crate::geometry::{CoordinateTransform, GeometryOptions, resolve_geometry_columns};
use crate::introspect;
use crate::reconcile::{ReconcileOptions, Reconciler, Summary};
use crate::source::{
    FeatureSetOptions, FeatureSetSource, RowSource, SchemaSheetLayout, SheetLayout, Workbook,
    WorkbookSource, read_schema_sheet,
};
use crate::translate::esri::SchemaDocument;
use crate::translate::sheet::{SchemaSheetRow, SheetSchemaOptions, translate_schema_sheet};
use crate::translate::{TranslatedLayer, Translator, TranslatorOptions};
use crate::{Error, Result};

/// What a schema run did.
#[derive(Debug, Default)]
pub struct SchemaReport {
    /// Lookup and layer tables, in processing order
    pub tables: Vec<TableOutcome>,
    /// Requested indexes that were created
    pub indexes: Vec<String>,
    /// Lookup rows
    pub seeded: Summary,
}

/// Read and parse a schema description file.
pub fn read_schema_file(path: &Utf8Path) -> Result<SchemaDocument> {
    let text = read_file(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Read a feature query result into a row source.
pub async fn read_feature_file(
    path: &Utf8Path,
    options: &FeatureSetOptions,
    transformer: Option<&dyn CoordinateTransform>,
) -> Result<FeatureSetSource> {
    let text = read_file(path)?;
    FeatureSetSource::from_json(&text, options, transformer).await
}

fn read_file(path: &Utf8Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound(path.to_owned()),
        _ => Error::Io(e),
    })
}

/// Translate `doc` and bring the database in line with it.
///
/// The whole document is translated before anything is written, so a
/// malformed entity aborts the run without touching the database.
pub async fn process_schema(
    conn: &dyn Connection,
    doc: &SchemaDocument,
    translator: &TranslatorOptions,
    ddl: DdlOptions,
) -> Result<SchemaReport> {
    let layers = Translator::new(translator).translate_document(doc)?;
    let result = apply_layers(conn, &layers, ddl).await;
    finish(conn, result).await
}

async fn apply_layers(
    conn: &dyn Connection,
    layers: &[TranslatedLayer],
    options: DdlOptions,
) -> Result<SchemaReport> {
    let mut ddl = DdlExecutor::new(conn, options);
    let mut report = SchemaReport::default();

    for layer in layers {
        for lookup in &layer.lookup_tables {
            report.tables.push(ddl.process_table(lookup).await?);
        }
        let seeded = ddl.seed(&layer.seed_rows).await?;
        report.seeded.merge(&seeded);

        report.tables.push(ddl.process_table(&layer.table).await?);
        report.indexes.extend(ddl.process_indexes(&layer.indexes).await?);
    }

    tracing::info!(
        tables = report.tables.len(),
        indexes = report.indexes.len(),
        seeded = %report.seeded,
        "schema applied"
    );
    Ok(report)
}

/// How rows are loaded into one table.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub reconcile: ReconcileOptions,
    pub geometry: GeometryOptions,
    /// Empty the table first, keeping inbound foreign keys intact
    pub reset: bool,
}

/// Reconcile every row of `source` into `table`, then commit.
pub async fn load_rows(
    conn: &dyn Connection,
    table: &str,
    source: &mut dyn RowSource,
    options: &LoadOptions,
    ddl: DdlOptions,
) -> Result<Summary> {
    let result = load_rows_uncommitted(conn, table, source, options, ddl).await;
    let summary = finish(conn, result).await?;
    tracing::info!(table, %summary, "loaded rows");
    Ok(summary)
}

/// Load several sources into one table, committing after each.
///
/// `reset` empties the table before the first source only, so every
/// source's rows survive.
pub async fn load_sources<S: RowSource>(
    conn: &dyn Connection,
    table: &str,
    sources: impl IntoIterator<Item = S>,
    options: &LoadOptions,
    ddl: DdlOptions,
) -> Result<Vec<Summary>> {
    let mut options = options.clone();
    let mut summaries = Vec::new();
    for mut source in sources {
        summaries.push(load_rows(conn, table, &mut source, &options, ddl).await?);
        options.reset = false;
    }
    Ok(summaries)
}

async fn load_rows_uncommitted(
    conn: &dyn Connection,
    table: &str,
    source: &mut dyn RowSource,
    options: &LoadOptions,
    ddl: DdlOptions,
) -> Result<Summary> {
    let columns = source.columns().to_vec();
    let (geometry, aliases) =
        resolve_geometry_columns(conn, table, &columns, &options.geometry).await?;

    if !options.reset {
        let mut reconciler = Reconciler::new(conn, table, geometry, aliases, &options.reconcile);
        return reconcile_all(&mut reconciler, &columns, source).await;
    }

    let ddl = DdlExecutor::new(conn, ddl);
    let captured = ddl.begin_reload(table).await?;
    let mut reconciler = Reconciler::new(conn, table, geometry, aliases, &options.reconcile);
    let loaded = reconcile_all(&mut reconciler, &columns, source).await;

    // Constraints go back before any load error surfaces.
    match (ddl.finish_reload(&captured).await, loaded) {
        (Ok(()), loaded) => loaded,
        (Err(restore), Err(load)) => {
            tracing::warn!(table, error = %restore, "could not restore foreign keys after a failed load");
            Err(load)
        }
        (Err(restore), Ok(_)) => Err(restore),
    }
}

async fn reconcile_all(
    reconciler: &mut Reconciler<'_>,
    columns: &[String],
    source: &mut dyn RowSource,
) -> Result<Summary> {
    let mut line = 0usize;
    while let Some(values) = source.next_row() {
        line += 1;
        match reconciler.process_row(columns, &values).await {
            Ok(_) => {}
            Err(e @ Error::RowShape { .. }) => {
                tracing::warn!(table = reconciler.table(), row = line, error = %e, "skipping row");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(reconciler.summary())
}

/// How a workbook is applied.
#[derive(Debug, Clone, Default)]
pub struct WorkbookOptions {
    /// Sheet holding the rows; its name is the table name
    pub data_sheet: String,
    pub data_layout: SheetLayout,
    /// Sheet describing the table's columns; without one the table must
    /// already exist
    pub schema_sheet: Option<String>,
    pub schema_layout: SchemaSheetLayout,
    /// Stop once the table is in place
    pub schema_only: bool,
    /// Keep schema rows that have no data column
    pub use_schema_columns: bool,
    pub load: LoadOptions,
}

#[derive(Debug, Default)]
pub struct WorkbookReport {
    pub table: String,
    /// Set when the schema sheet was applied
    pub outcome: Option<TableOutcome>,
    /// Set when rows were loaded
    pub rows: Option<Summary>,
}

/// Apply a workbook's schema sheet, then load its data sheet, in one
/// transaction.
///
/// Both sheets are read before the database is touched.
pub async fn process_workbook(
    conn: &dyn Connection,
    path: &Utf8Path,
    options: &WorkbookOptions,
    ddl: DdlOptions,
) -> Result<WorkbookReport> {
    if options.schema_only && options.schema_sheet.is_none() {
        return Err(Error::Argument(
            "a schema-only run needs a schema sheet".to_string(),
        ));
    }

    let mut workbook = Workbook::open(path)?;
    let data = workbook.sheet(&options.data_sheet)?;
    let schema = match &options.schema_sheet {
        Some(name) => Some(read_schema_sheet(
            &workbook.sheet(name)?,
            &options.schema_layout,
        )?),
        None => None,
    };
    let mut source = WorkbookSource::from_range(&data, &options.data_layout)?;

    process_sheets(conn, &mut source, schema.as_deref(), options, ddl).await
}

/// The database half of [`process_workbook`], for sheets already read.
pub async fn process_sheets(
    conn: &dyn Connection,
    source: &mut dyn RowSource,
    schema: Option<&[SchemaSheetRow]>,
    options: &WorkbookOptions,
    ddl: DdlOptions,
) -> Result<WorkbookReport> {
    let result = apply_sheets(conn, source, schema, options, ddl).await;
    finish(conn, result).await
}

async fn apply_sheets(
    conn: &dyn Connection,
    source: &mut dyn RowSource,
    schema: Option<&[SchemaSheetRow]>,
    options: &WorkbookOptions,
    ddl: DdlOptions,
) -> Result<WorkbookReport> {
    let table = sanitize(&options.data_sheet);
    let mut report = WorkbookReport {
        table: table.clone(),
        ..WorkbookReport::default()
    };

    if let Some(rows) = schema {
        if !ddl.force && introspect::table_exists(conn, &table).await? {
            tracing::info!(table, "table exists, leaving its columns alone");
        } else {
            let geometry = &options.load.geometry;
            let sheet_options = SheetSchemaOptions {
                primary_key: options.load.reconcile.primary_key.clone().unwrap_or_default(),
                point_columns: geometry.point_columns.clone(),
                point_srid: geometry.database_epsg.unwrap_or(geometry.source_epsg),
                use_schema_columns: options.use_schema_columns,
            };
            let spec = translate_schema_sheet(&table, rows, source.columns(), &sheet_options)?;
            let outcome = DdlExecutor::new(conn, ddl).process_table(&spec).await?;
            let pretended = ddl.readonly
                && matches!(outcome.action, TableAction::Created | TableAction::Recreated);
            report.outcome = Some(outcome);
            if pretended && !options.schema_only {
                tracing::info!(table, "readonly: table was not created, not loading rows");
                return Ok(report);
            }
        }
    }

    if !options.schema_only {
        let summary = load_rows_uncommitted(conn, &table, source, &options.load, ddl).await?;
        tracing::info!(table, %summary, "loaded rows");
        report.rows = Some(summary);
    }
    Ok(report)
}

/// Commit a successful run, roll back a failed one.
async fn finish<T>(conn: &dyn Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            conn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(reset) = conn.reset().await {
                tracing::warn!(error = %reset, "rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests;
