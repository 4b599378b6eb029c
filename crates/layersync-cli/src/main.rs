//! layersync CLI - apply ESRI layer schemas and load feature rows into PostGIS.

mod config;

use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use layersync::ddl::{DdlOptions, TableAction};
use layersync::geometry::{GeometryOptions, PostgisTransformer};
use layersync::reconcile::{ReconcileOptions, Summary};
use layersync::run::{self, LoadOptions, WorkbookOptions};
use layersync::source::{FeatureSetOptions, SchemaSheetLayout, SheetLayout};
use layersync::translate::TranslatorOptions;
use layersync::{Error, PgSession, Result};
use owo_colors::OwoColorize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::DatabaseArgs;

/// Reconcile ESRI layer schemas and feature rows into PostGIS.
#[derive(Parser, Debug)]
#[command(name = "layersync", version)]
struct Cli {
    #[command(flatten)]
    db: DatabaseArgs,

    /// Replace tables that differ, recreate covered indexes, update existing rows
    #[arg(long, global = true)]
    force: bool,

    /// Log every statement
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Read the database but do not change it
    #[arg(long, global = true)]
    readonly: bool,

    /// Do not create lookup views
    #[arg(long, global = true)]
    noviews: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or check the tables described by an ESRI layer JSON file
    Schema {
        /// Layer/table description (`layers` and/or `tables`)
        layer: Utf8PathBuf,

        /// Primary key field for entities that do not name one
        #[arg(long, default_value = "objectid")]
        unique_id: String,

        /// SRID for layers without a spatial reference
        #[arg(long, default_value_t = 4326)]
        srid: i32,
    },

    /// Upsert feature query results into a table
    Load {
        /// Target table
        table: String,

        /// Feature query result files
        #[arg(required = true)]
        files: Vec<Utf8PathBuf>,

        #[command(flatten)]
        rows: RowArgs,

        /// Empty the table before loading, keeping foreign keys that point at it
        #[arg(long)]
        reset: bool,
    },

    /// Create a table from a workbook's schema sheet and load its data sheet
    Sheet {
        /// Workbook file (xlsx, xls, ods)
        workbook: Utf8PathBuf,

        /// Sheet holding the rows; also names the table
        #[arg(long)]
        data_sheet_name: String,

        /// Rows at the top of the data sheet that are not data
        #[arg(long, default_value_t = 1)]
        data_header: usize,

        /// Row of the data sheet holding the column names
        #[arg(long, default_value_t = 1)]
        data_col_names_row: usize,

        /// Sheet describing the columns; without it the table must exist
        #[arg(long)]
        schema_sheet_name: Option<String>,

        #[arg(long, default_value_t = 1)]
        schema_header: usize,

        #[arg(long, default_value_t = 1)]
        schema_col_names_row: usize,

        /// Schema sheet column with field names, by header or 1-based number
        #[arg(long, default_value = "Field Name")]
        schema_field_name_col: String,

        #[arg(long, default_value = "Data Type")]
        schema_data_type_col: String,

        #[arg(long, default_value = "Description (Optional)")]
        schema_description_col: String,

        /// Only create the table
        #[arg(long)]
        schema_only: bool,

        /// Create every schema sheet column, even those without data
        #[arg(long)]
        use_schema_cols: bool,

        #[command(flatten)]
        rows: RowArgs,
    },
}

/// How incoming rows map onto table rows.
#[derive(Args, Debug)]
struct RowArgs {
    /// Column identifying a row; empty to match rows on every column
    #[arg(long, default_value = "UAID")]
    key_name: String,

    /// Columns receiving point coordinates, as X,Y
    #[arg(long, value_delimiter = ',')]
    point_cols: Vec<String>,

    /// EPSG code of incoming coordinates
    #[arg(long, default_value_t = 4326)]
    geometry_epsg: i32,

    /// EPSG code stored in the database; defaults to the column's SRID
    #[arg(long)]
    database_epsg: Option<i32>,

    /// Columns to drop from every row
    #[arg(long, value_delimiter = ',')]
    ignore_cols: Vec<String>,
}

impl RowArgs {
    fn load_options(self, force: bool, readonly: bool, reset: bool) -> Result<LoadOptions> {
        let point_columns = match self.point_cols.as_slice() {
            [] => None,
            [x, y] => Some((x.clone(), y.clone())),
            other => {
                return Err(Error::Argument(format!(
                    "--point-cols takes exactly two columns, got {}",
                    other.len()
                )));
            }
        };
        Ok(LoadOptions {
            reconcile: ReconcileOptions {
                force,
                readonly,
                primary_key: Some(self.key_name).filter(|k| !k.is_empty()),
                ignore_columns: self.ignore_cols,
            },
            geometry: GeometryOptions {
                point_columns,
                source_epsg: self.geometry_epsg,
                database_epsg: self.database_epsg,
            },
            reset,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            // argument error
            return ExitCode::from(10);
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let _guard = match setup_logging(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            return ExitCode::from(e.exit_code());
        }
    };

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            eprintln!("{}", e.format_detailed().red());
            ExitCode::from(e.exit_code())
        }
    }
}

fn setup_logging(verbose: bool, log_file: Option<&Utf8Path>) -> Result<Option<WorkerGuard>> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if verbose {
        let directive = "layersync=debug"
            .parse()
            .map_err(|e| Error::Argument(format!("bad log directive: {e}")))?;
        filter = filter.add_directive(directive);
    }

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
        return Ok(None);
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();
    Ok(Some(guard))
}

async fn execute(cli: Cli) -> Result<()> {
    let ddl = DdlOptions {
        force: cli.force,
        readonly: cli.readonly,
        noviews: cli.noviews,
    };

    match cli.command {
        Command::Schema {
            layer,
            unique_id,
            srid,
        } => {
            // Parse before connecting so a bad file fails fast.
            let doc = run::read_schema_file(&layer)?;
            let session = connect(&cli.db).await?;
            let translator = TranslatorOptions {
                unique_id_field: unique_id,
                default_srid: srid,
                ..TranslatorOptions::default()
            };
            let report = run::process_schema(&session, &doc, &translator, ddl).await?;

            for table in &report.tables {
                println!("{}: {}", table.table.bold(), describe_action(table.action));
            }
            println!(
                "{} indexes created, lookup values: {}",
                report.indexes.len(),
                report.seeded
            );
        }
        Command::Load {
            table,
            files,
            rows,
            reset,
        } => {
            let options = rows.load_options(cli.force, cli.readonly, reset)?;
            if let Some(missing) = files.iter().find(|f| !f.exists()) {
                return Err(Error::FileNotFound(missing.clone()));
            }

            let session = connect(&cli.db).await?;
            let transformer = PostgisTransformer::new(&session);
            let source_options = FeatureSetOptions {
                point_columns: options.geometry.point_columns.clone(),
                epsg: options.geometry.source_epsg,
            };
            let mut sources = Vec::with_capacity(files.len());
            for file in &files {
                let source =
                    run::read_feature_file(file, &source_options, Some(&transformer)).await?;
                sources.push(source);
            }

            let summaries = run::load_sources(&session, &table, sources, &options, ddl).await?;
            let mut total = Summary::default();
            for (file, summary) in files.iter().zip(&summaries) {
                println!("{}: {summary}", file.bold());
                total.merge(summary);
            }
            if files.len() > 1 {
                println!("{}: {total}", table.bold());
            }
        }
        Command::Sheet {
            workbook,
            data_sheet_name,
            data_header,
            data_col_names_row,
            schema_sheet_name,
            schema_header,
            schema_col_names_row,
            schema_field_name_col,
            schema_data_type_col,
            schema_description_col,
            schema_only,
            use_schema_cols,
            rows,
        } => {
            let options = WorkbookOptions {
                data_sheet: data_sheet_name,
                data_layout: SheetLayout {
                    column_names_row: data_col_names_row,
                    header_rows: data_header,
                },
                schema_sheet: schema_sheet_name,
                schema_layout: SchemaSheetLayout {
                    rows: SheetLayout {
                        column_names_row: schema_col_names_row,
                        header_rows: schema_header,
                    },
                    field_name: schema_field_name_col,
                    data_type: schema_data_type_col,
                    description: schema_description_col,
                },
                schema_only,
                use_schema_columns: use_schema_cols,
                load: rows.load_options(cli.force, cli.readonly, false)?,
            };
            if !workbook.exists() {
                return Err(Error::FileNotFound(workbook));
            }

            let session = connect(&cli.db).await?;
            let report = run::process_workbook(&session, &workbook, &options, ddl).await?;
            if let Some(outcome) = &report.outcome {
                println!("{}: {}", report.table.bold(), describe_action(outcome.action));
            }
            if let Some(summary) = &report.rows {
                println!("{}: {summary}", report.table.bold());
            }
        }
    }
    Ok(())
}

fn describe_action(action: TableAction) -> String {
    match action {
        TableAction::Created => "created".green().to_string(),
        TableAction::Recreated => "recreated".yellow().to_string(),
        TableAction::AlreadyMatches => "already matches".dimmed().to_string(),
        TableAction::ConflictIgnored => "differs (readonly)".red().to_string(),
    }
}

async fn connect(db: &DatabaseArgs) -> Result<PgSession> {
    let config = db.pg_config()?;
    tracing::info!(database = %db.describe(), "connecting");
    PgSession::connect(&config).await
}
