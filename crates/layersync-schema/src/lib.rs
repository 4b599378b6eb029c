//! Schema model types for layersync.
//!
//! These types describe the *desired* state of a table. They are derived
//! once from an external description at the start of a run and never
//! mutated afterwards. Every optional attribute distinguishes "not declared"
//! (`None`) from "declared false", since the comparator only checks what was
//! declared.

use indexmap::IndexMap;
use layersync_sql::Expr;
use std::fmt;

mod sql_type;
pub use sql_type::*;

/// Errors raised when a table declaration is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("table {table} declares column {column} more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table} declares more than one primary key ({first}, {second})")]
    MultiplePrimaryKeys {
        table: String,
        first: String,
        second: String,
    },
}

/// A foreign key from one column to a column of another table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyRef {
    /// Table holding the constrained column
    pub table: String,
    /// Constrained column
    pub column: String,
    /// Referenced table
    pub references_table: String,
    /// Referenced column
    pub references_column: String,
    /// Column of the referenced table shown in denormalized views
    pub display_column: Option<String>,
}

impl ForeignKeyRef {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
            display_column: None,
        }
    }

    pub fn with_display(mut self, column: impl Into<String>) -> Self {
        self.display_column = Some(column.into());
        self
    }

    /// The column a view should project in place of the key.
    pub fn view_column(&self) -> &str {
        self.display_column
            .as_deref()
            .unwrap_or(&self.references_column)
    }
}

/// The desired definition of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Postgres type, e.g. `varchar(255)` or `geometry(Point,4326)`
    pub db_type: String,
    /// Whether the column allows NULL, if declared
    pub nullable: Option<bool>,
    /// Whether this is the primary key, if declared
    pub is_primary: Option<bool>,
    /// Whether values are generated by an identity, if declared
    pub auto_increment: Option<bool>,
    /// Default value (a literal, not an expression), if declared
    pub default: Option<String>,
    /// Column comment
    pub comment: Option<String>,
    /// Foreign key this column carries
    pub foreign_key: Option<ForeignKeyRef>,
    /// Whether a plain index should be created on this column
    pub indexed: bool,
    /// Whether this is a spatial column
    pub is_spatial: bool,
    /// Spatial reference id of a spatial column
    pub srid: Option<i32>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: db_type.into(),
            nullable: None,
            is_primary: None,
            auto_increment: None,
            default: None,
            comment: None,
            foreign_key: None,
            indexed: false,
            is_spatial: false,
            srid: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.is_primary = Some(primary);
        self
    }

    pub fn auto_increment(mut self, auto: bool) -> Self {
        self.auto_increment = Some(auto);
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn references(mut self, fk: ForeignKeyRef) -> Self {
        self.foreign_key = Some(fk);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn spatial(mut self, srid: i32) -> Self {
        self.is_spatial = true;
        self.srid = Some(srid);
        self
    }

    /// True only when the primary flag is declared and set.
    pub fn is_primary_key(&self) -> bool {
        self.is_primary == Some(true)
    }

    /// Parsed form of [`ColumnSpec::db_type`].
    pub fn sql_type(&self) -> SqlType {
        SqlType::parse(&self.db_type)
    }
}

/// The desired definition of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name
    pub name: String,
    /// Columns, in creation order
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Build a table, checking column-name uniqueness (case-insensitive)
    /// and that at most one column is the primary key.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, SpecError> {
        let name = name.into();
        let mut seen: IndexMap<String, ()> = IndexMap::new();
        let mut primary: Option<&str> = None;

        for col in &columns {
            if seen.insert(col.name.to_lowercase(), ()).is_some() {
                return Err(SpecError::DuplicateColumn {
                    table: name,
                    column: col.name.clone(),
                });
            }
            if col.is_primary_key() {
                if let Some(first) = primary {
                    return Err(SpecError::MultiplePrimaryKeys {
                        table: name.clone(),
                        first: first.to_string(),
                        second: col.name.clone(),
                    });
                }
                primary = Some(&col.name);
            }
        }

        Ok(Self { name, columns })
    }

    /// Find a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_primary_key())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKeyRef> {
        self.columns.iter().filter_map(|c| c.foreign_key.as_ref())
    }

    pub fn spatial_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.is_spatial)
    }

    /// Name of the denormalized view for this table.
    pub fn view_name(&self) -> String {
        view_name(&self.name)
    }
}

/// Name of the denormalized view for `table`.
pub fn view_name(table: &str) -> String {
    format!("{table}_view")
}

/// A requested index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Table the index belongs to
    pub table: String,
    /// Indexed columns, in order
    pub columns: Vec<String>,
    /// Sort order applied to every column
    pub ascending: bool,
    /// Whether this is a UNIQUE index
    pub unique: bool,
    /// Index comment
    pub description: Option<String>,
}

/// One pre-populated row for a lookup table, as (column, value) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRow {
    pub table: String,
    pub values: Vec<(String, SeedValue)>,
}

/// A literal value in a [`SeedRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedValue {
    Text(String),
    Int(i64),
}

impl fmt::Display for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedValue::Text(s) => f.write_str(s),
            SeedValue::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Spatial subtypes with a known shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
    /// Unconstrained `geometry`
    Geometry,
}

impl GeometryKind {
    /// Parse a PostGIS type name such as `POINT` or `MultiPolygon`.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_uppercase().as_str() {
            "POINT" => GeometryKind::Point,
            "MULTIPOINT" => GeometryKind::MultiPoint,
            "LINESTRING" => GeometryKind::LineString,
            "MULTILINESTRING" => GeometryKind::MultiLineString,
            "POLYGON" => GeometryKind::Polygon,
            "MULTIPOLYGON" => GeometryKind::MultiPolygon,
            "GEOMETRYCOLLECTION" => GeometryKind::GeometryCollection,
            "GEOMETRY" => GeometryKind::Geometry,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::LineString => "LineString",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPolygon => "MultiPolygon",
            GeometryKind::GeometryCollection => "GeometryCollection",
            GeometryKind::Geometry => "Geometry",
        }
    }

    /// Column type for this subtype, e.g. `geometry(Point,4326)`.
    pub fn column_type(self, srid: i32) -> String {
        match self {
            GeometryKind::Geometry => "geometry".to_string(),
            kind => format!("geometry({},{})", kind.as_str(), srid),
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the geometry column of a table is written from row data.
///
/// Produced once per table per run and reused for every row.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryColumnInfo {
    /// Geometry column in the table
    pub column: String,
    /// Spatial subtype of the column
    pub kind: GeometryKind,
    /// Expression that builds the stored value from the source columns'
    /// parameters (transform included when needed)
    pub fragment: Expr,
    /// Row columns supplying the raw coordinates, in fragment order
    pub source_columns: Vec<String>,
}

impl GeometryColumnInfo {
    /// Whether `name` is one of the coordinate source columns.
    pub fn is_source(&self, name: &str) -> bool {
        self.source_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Maps external header names to database column names.
///
/// Built from column comments of the form `ALIAS:[name]` and from the live
/// column list, so a header resolves either through its alias or by a
/// case-insensitive match on the column itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnAlias {
    aliases: IndexMap<String, String>,
    columns: IndexMap<String, String>,
}

impl ColumnAlias {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that header `alias` refers to `column`.
    pub fn insert(&mut self, alias: impl AsRef<str>, column: impl Into<String>) {
        self.aliases
            .insert(alias.as_ref().to_lowercase(), column.into());
    }

    /// Record a live column so differently-cased headers resolve to it.
    pub fn add_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        self.columns.insert(column.to_lowercase(), column);
    }

    /// Aliased column for `name`, if an alias exists.
    pub fn alias_for(&self, name: &str) -> Option<&str> {
        self.aliases.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Database column that `name` refers to.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let key = name.to_lowercase();
        if let Some(column) = self.aliases.get(&key) {
            return column;
        }
        self.columns.get(&key).map(String::as_str).unwrap_or(name)
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }
}

/// Comment text that records an alias, e.g. `ALIAS:[Site Name]`.
pub fn alias_comment(alias: &str) -> String {
    format!("ALIAS:[{alias}]")
}

/// Extract the alias from a column comment of the form `ALIAS:[name]`.
pub fn parse_alias_comment(comment: &str) -> Option<&str> {
    let rest = comment.strip_prefix("ALIAS:")?;
    let start = rest.find('[')?;
    let end = rest[start + 1..].find(']')?;
    Some(&rest[start + 1..start + 1 + end])
}

#[cfg(test)]
mod tests;
