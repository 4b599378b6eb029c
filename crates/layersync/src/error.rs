use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed external schema description
    #[error("invalid schema description: {0}")]
    Validation(String),

    #[error("unsupported field type {field_type} for field {field}")]
    UnsupportedType { field_type: String, field: String },

    #[error("relationship {relationship} of table {table} has no origin table")]
    UnresolvedRelationship { table: String, relationship: i64 },

    /// Live table present and incompatible, without `force`
    #[error("table {0} exists and does not match the requested schema (use force to replace it)")]
    SchemaConflict(String),

    #[error("row has {columns} column names but {values} values")]
    RowShape { columns: usize, values: usize },

    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("missing capability: {0}")]
    MissingCapability(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Translation of one layer/table failed; aborts the run
    #[error("failed to translate entity {index} ({name})")]
    Translation {
        index: usize,
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Spec(#[from] layersync_schema::SpecError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("missing database parameter: {0}")]
    MissingParameter(&'static str),

    #[error("file not found: {0}")]
    FileNotFound(Utf8PathBuf),

    #[error("no sheet named {sheet:?} in {file}")]
    SheetNotFound { sheet: String, file: Utf8PathBuf },

    #[error("could not read workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("could not connect to the database: {0}")]
    Connect(#[source] tokio_postgres::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn translation(index: usize, name: impl Into<String>, source: Error) -> Self {
        Error::Translation {
            index,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Argument(_) => 10,
            Error::FileNotFound(_) => 11,
            Error::Json(_) => 12,
            Error::MissingParameter(_) => 100,
            Error::Connect(_) => 101,
            Error::SheetNotFound { .. } => 102,
            Error::SchemaConflict(_) => 103,
            Error::Translation { .. }
            | Error::Validation(_)
            | Error::UnsupportedType { .. }
            | Error::UnresolvedRelationship { .. }
            | Error::Spec(_) => 104,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}
