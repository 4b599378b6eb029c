//! Tabular schema sheets: one row per column (field name, data type,
//! description), as kept alongside spreadsheet data.

use layersync_schema::{ColumnSpec, GeometryKind, TableSpec};
use layersync_sql::sanitize;

use super::GEOMETRY_COLUMN;
use crate::{Error, Result};

/// One row of a schema sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSheetRow {
    pub name: String,
    pub data_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SheetSchemaOptions {
    /// Column that becomes the primary key (case-insensitive)
    pub primary_key: String,
    /// Coordinate columns folded into a synthesized point column
    pub point_columns: Option<(String, String)>,
    /// SRID of the synthesized point column
    pub point_srid: i32,
    /// Keep schema rows that have no matching data column
    pub use_schema_columns: bool,
}

fn column_type(data_type: &str) -> Option<&'static str> {
    match data_type.trim() {
        "Number" => Some("double precision"),
        "Short Text" => Some("varchar(255)"),
        "Date/Time" => Some("timestamp"),
        "Yes/No" => Some("boolean"),
        _ => None,
    }
}

/// Build the table for `table` from its schema sheet.
///
/// `data_columns` are the header names of the data sheet; unless
/// `use_schema_columns` is set, schema rows without a matching header are
/// left out.
pub fn translate_schema_sheet(
    table: &str,
    rows: &[SchemaSheetRow],
    data_columns: &[String],
    options: &SheetSchemaOptions,
) -> Result<TableSpec> {
    let has_column = |name: &str| data_columns.iter().any(|c| c.eq_ignore_ascii_case(name));

    if let Some((x, y)) = &options.point_columns {
        for coordinate in [x, y] {
            if !has_column(coordinate) {
                return Err(Error::Validation(format!(
                    "point column {coordinate} is not a column of {table}"
                )));
            }
        }
    }
    let is_point_column = |name: &str| {
        options
            .point_columns
            .as_ref()
            .is_some_and(|(x, y)| x.eq_ignore_ascii_case(name) || y.eq_ignore_ascii_case(name))
    };

    let mut columns = Vec::new();
    for row in rows {
        if !options.use_schema_columns && !has_column(&row.name) {
            continue;
        }
        if is_point_column(&row.name) {
            continue;
        }

        let db_type = column_type(&row.data_type).ok_or_else(|| Error::UnsupportedType {
            field_type: row.data_type.clone(),
            field: row.name.clone(),
        })?;
        let mut column = ColumnSpec::new(sanitize(&row.name), db_type);
        if row.name.eq_ignore_ascii_case(&options.primary_key) {
            column = column.primary(true);
        }
        if let Some(description) = row.description.as_deref().filter(|d| !d.is_empty()) {
            column = column.comment(description);
        }
        columns.push(column);
    }

    if options.point_columns.is_some() {
        columns.push(
            ColumnSpec::new(
                GEOMETRY_COLUMN,
                GeometryKind::Point.column_type(options.point_srid),
            )
            .nullable(false)
            .comment("Auto-generated column")
            .spatial(options.point_srid)
            .indexed(),
        );
    }

    Ok(TableSpec::new(sanitize(table), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, data_type: &str, description: &str) -> SchemaSheetRow {
        SchemaSheetRow {
            name: name.to_string(),
            data_type: data_type.to_string(),
            description: Some(description.to_string()).filter(|d| !d.is_empty()),
        }
    }

    fn options() -> SheetSchemaOptions {
        SheetSchemaOptions {
            primary_key: "UAID".to_string(),
            point_columns: None,
            point_srid: 4326,
            use_schema_columns: false,
        }
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn schema() -> Vec<SchemaSheetRow> {
        vec![
            row("UAID", "Short Text", "Unique id"),
            row("Count", "Number", ""),
            row("Seen", "Date/Time", "First seen"),
            row("Active", "Yes/No", ""),
            row("Lon", "Number", ""),
            row("Lat", "Number", ""),
            row("Notes", "Short Text", "only in schema"),
        ]
    }

    #[test]
    fn maps_sheet_types_and_primary_key() {
        let data = headers(&["uaid", "count", "seen", "active"]);
        let table = translate_schema_sheet("plants", &schema(), &data, &options()).unwrap();

        let described: Vec<_> = table
            .columns
            .iter()
            .map(|c| format!("{} {} {:?}", c.name, c.db_type, c.is_primary))
            .collect();
        insta::assert_snapshot!(described.join("\n"), @r"
        UAID varchar(255) Some(true)
        Count double precision None
        Seen timestamp None
        Active boolean None
        ");
        assert_eq!(table.column("seen").unwrap().comment.as_deref(), Some("First seen"));
    }

    #[test]
    fn schema_columns_can_be_kept_without_data() {
        let mut opts = options();
        opts.use_schema_columns = true;
        let table = translate_schema_sheet("plants", &schema(), &[], &opts).unwrap();
        assert_eq!(table.columns.len(), 7);
    }

    #[test]
    fn point_columns_become_geometry() {
        let mut opts = options();
        opts.point_columns = Some(("Lon".to_string(), "Lat".to_string()));
        let data = headers(&["UAID", "lon", "LAT"]);
        let table = translate_schema_sheet("plants", &schema(), &data, &opts).unwrap();

        assert!(table.column("lon").is_none());
        let geom = table.column(GEOMETRY_COLUMN).unwrap();
        assert_eq!(geom.db_type, "geometry(Point,4326)");
        assert_eq!(geom.nullable, Some(false));
        assert!(geom.is_spatial);
    }

    #[test]
    fn missing_point_column_is_rejected() {
        let mut opts = options();
        opts.point_columns = Some(("Lon".to_string(), "Lat".to_string()));
        let err = translate_schema_sheet("plants", &schema(), &headers(&["Lon"]), &opts)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let rows = vec![row("Photo", "Attachment", "")];
        let err =
            translate_schema_sheet("plants", &rows, &headers(&["photo"]), &options()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }
}
