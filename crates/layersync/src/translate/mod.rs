//! Translating external schema descriptions into [`TableSpec`]s.
//!
//! The ESRI translator keeps state across a whole document: origin
//! relationships recorded while translating one layer resolve the
//! destination relationships of layers translated after it, and a lookup
//! table shared by several layers is emitted only once.

use indexmap::{IndexMap, IndexSet};
use layersync_schema::{
    ColumnSpec, ForeignKeyRef, GeometryKind, IndexSpec, SeedRow, SeedValue, TableSpec,
    alias_comment,
};
use layersync_sql::sanitize;

use crate::{Error, Result};

pub mod esri;
pub mod sheet;

use esri::{EsriFieldType, Field, Layer, RelationshipRole, SchemaDocument};

/// Name of the synthesized spatial column.
pub const GEOMETRY_COLUMN: &str = "geom";

/// Lookup table column holding the code (primary key).
pub const LOOKUP_CODE_COLUMN: &str = "code";

/// Lookup table column holding the display name.
pub const LOOKUP_NAME_COLUMN: &str = "name";

#[derive(Debug, Clone)]
pub struct TranslatorOptions {
    /// Unique-id field used when a layer declares none
    pub unique_id_field: String,
    /// SRID used when a layer declares no spatial reference
    pub default_srid: i32,
    /// Length of string columns that declare none
    pub default_varchar_length: u32,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            unique_id_field: "objectid".to_string(),
            default_srid: 4326,
            default_varchar_length: 255,
        }
    }
}

/// Everything derived from one layer or table description.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedLayer {
    pub table: TableSpec,
    /// Lookup tables for coded-value domains, to be created before `table`
    pub lookup_tables: Vec<TableSpec>,
    /// Rows pre-populating the lookup tables
    pub seed_rows: Vec<SeedRow>,
    pub indexes: Vec<IndexSpec>,
}

#[derive(Debug, Clone)]
struct OriginRelationship {
    id: i64,
    table: String,
    key_field: String,
}

pub struct Translator<'o> {
    options: &'o TranslatorOptions,
    /// Origin relationships, keyed by the id of the layer that owns them
    origins: IndexMap<i64, Vec<OriginRelationship>>,
    lookup_tables: IndexSet<String>,
}

impl<'o> Translator<'o> {
    pub fn new(options: &'o TranslatorOptions) -> Self {
        Self {
            options,
            origins: IndexMap::new(),
            lookup_tables: IndexSet::new(),
        }
    }

    /// Translate every layer, then every table, of a document.
    ///
    /// The first failure aborts the whole translation; the error names the
    /// failing entity's position.
    pub fn translate_document(&mut self, doc: &SchemaDocument) -> Result<Vec<TranslatedLayer>> {
        if doc.layers.is_none() && doc.tables.is_none() {
            return Err(Error::Validation(
                "document has neither \"layers\" nor \"tables\"".to_string(),
            ));
        }

        let mut translated = Vec::new();
        for (index, layer) in doc.entities().enumerate() {
            let name = layer.name.clone().unwrap_or_default();
            match self.translate_layer(layer) {
                Ok(t) => translated.push(t),
                Err(e) => {
                    tracing::error!(index, name = %name, error = %e, "schema translation failed");
                    return Err(Error::translation(index, name, e));
                }
            }
        }
        Ok(translated)
    }

    pub fn translate_layer(&mut self, layer: &Layer) -> Result<TranslatedLayer> {
        let raw_name = layer
            .name
            .as_deref()
            .ok_or_else(|| Error::Validation("entity has no \"name\"".to_string()))?;
        let layer_id = layer
            .id
            .ok_or_else(|| Error::Validation(format!("entity {raw_name} has no \"id\"")))?;
        let fields = layer
            .fields
            .as_deref()
            .ok_or_else(|| Error::Validation(format!("entity {raw_name} has no \"fields\"")))?;

        let table_name = sanitize(raw_name);
        let unique_id = layer
            .unique_id_field
            .as_ref()
            .map(|u| sanitize(&u.name))
            .unwrap_or_else(|| self.options.unique_id_field.clone());
        let srid = layer
            .extent
            .as_ref()
            .and_then(|e| e.spatial_reference.as_ref())
            .and_then(|sr| sr.epsg())
            .unwrap_or(self.options.default_srid);
        let layer_geometry = layer
            .geometry_type
            .as_deref()
            .and_then(esri::geometry_kind)
            .flatten();

        let mut columns = Vec::new();
        let mut lookup_tables = Vec::new();
        let mut seed_rows = Vec::new();
        let mut spatial_seen = false;

        for field in fields {
            let field_type = EsriFieldType::parse(&field.field_type).ok_or_else(|| {
                Error::UnsupportedType {
                    field_type: field.field_type.clone(),
                    field: field.name.clone(),
                }
            })?;

            let kind = match field_type {
                EsriFieldType::Geometry(kind) => Some(kind),
                EsriFieldType::GeometryField => Some(layer_geometry),
                _ => None,
            };
            if let Some(kind) = kind {
                spatial_seen = true;
                match kind {
                    Some(kind) if !columns.iter().any(|c: &ColumnSpec| c.is_spatial) => {
                        columns.push(geometry_column(kind, srid));
                    }
                    Some(_) => {
                        tracing::warn!(table = %table_name, field = %field.name, "ignoring additional geometry field");
                    }
                    None => {}
                }
                continue;
            }

            let (column, lookup) = self.column_for_field(&table_name, field, field_type, &unique_id)?;
            columns.push(column);
            if let Some((table, rows)) = lookup {
                lookup_tables.push(table);
                seed_rows.extend(rows);
            }
        }

        if !spatial_seen {
            if let Some(kind) = layer_geometry {
                columns.push(geometry_column(kind, srid));
            }
        }

        let mut indexes = Vec::new();
        self.apply_relationships(layer_id, &table_name, layer, &mut columns, &mut indexes)?;

        let table = TableSpec::new(table_name, columns)?;
        indexes.extend(translate_indexes(&table, &layer.indexes));

        Ok(TranslatedLayer {
            table,
            lookup_tables,
            seed_rows,
            indexes,
        })
    }

    fn column_for_field(
        &mut self,
        table: &str,
        field: &Field,
        field_type: EsriFieldType,
        unique_id: &str,
    ) -> Result<(ColumnSpec, Option<(TableSpec, Vec<SeedRow>)>)> {
        let name = sanitize(&field.name);
        let db_type = match field_type {
            t if t.is_identifier() => "char(36)".to_string(),
            EsriFieldType::Integer => "integer".to_string(),
            EsriFieldType::SmallInteger => "smallint".to_string(),
            EsriFieldType::Double => "double precision".to_string(),
            EsriFieldType::Single => "real".to_string(),
            EsriFieldType::String => format!(
                "varchar({})",
                field
                    .length
                    .filter(|&l| l > 0)
                    .unwrap_or(self.options.default_varchar_length)
            ),
            EsriFieldType::Date => "timestamp".to_string(),
            _ => {
                return Err(Error::UnsupportedType {
                    field_type: field.field_type.clone(),
                    field: field.name.clone(),
                });
            }
        };

        let mut column = ColumnSpec::new(&name, &db_type);
        if let Some(nullable) = field.nullable {
            column = column.nullable(nullable);
        }
        if field_type.is_identifier() && name.eq_ignore_ascii_case(unique_id) {
            column = column.primary(true);
        }
        if let Some(default) = field.default_value.as_ref().and_then(default_literal) {
            column = column.default_value(default);
        }
        if let Some(alias) = field.alias.as_deref().filter(|a| *a != field.name) {
            column = column.comment(alias_comment(alias));
        }

        let domain = field.domain.as_ref().filter(|d| {
            let coded = d.domain_type == "codedValue";
            if !coded {
                tracing::debug!(field = %field.name, domain_type = %d.domain_type, "ignoring non-coded domain");
            }
            coded
        });
        let Some(domain) = domain else {
            return Ok((column, None));
        };
        if !matches!(
            field_type,
            EsriFieldType::String | EsriFieldType::Integer | EsriFieldType::SmallInteger
        ) {
            return Ok((column, None));
        }

        let lookup_name = sanitize(&domain.name);
        column = column
            .references(
                ForeignKeyRef::new(table, &name, &lookup_name, LOOKUP_CODE_COLUMN)
                    .with_display(LOOKUP_NAME_COLUMN),
            )
            .indexed();

        if !self.lookup_tables.insert(lookup_name.clone()) {
            return Ok((column, None));
        }

        let lookup = TableSpec::new(
            &lookup_name,
            vec![
                ColumnSpec::new(LOOKUP_CODE_COLUMN, &db_type)
                    .primary(true)
                    .nullable(false),
                ColumnSpec::new(LOOKUP_NAME_COLUMN, "varchar(256)").nullable(false),
            ],
        )?;
        let rows = domain
            .coded_values
            .iter()
            .map(|cv| SeedRow {
                table: lookup_name.clone(),
                values: vec![
                    (
                        LOOKUP_NAME_COLUMN.to_string(),
                        SeedValue::Text(cv.name.clone()),
                    ),
                    (LOOKUP_CODE_COLUMN.to_string(), seed_code(&cv.code)),
                ],
            })
            .collect();

        Ok((column, Some((lookup, rows))))
    }

    fn apply_relationships(
        &mut self,
        layer_id: i64,
        table: &str,
        layer: &Layer,
        columns: &mut [ColumnSpec],
        indexes: &mut Vec<IndexSpec>,
    ) -> Result<()> {
        let mut destinations = Vec::new();

        for rel in &layer.relationships {
            let role = RelationshipRole::parse(&rel.role).ok_or_else(|| {
                Error::Validation(format!(
                    "relationship {} of {table} has unknown role {}",
                    rel.id, rel.role
                ))
            })?;
            let key = sanitize(&rel.key_field);
            let column = columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&key))
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "relationship {} of {table} uses unknown key field {}",
                        rel.id, rel.key_field
                    ))
                })?;

            match role {
                RelationshipRole::Origin => {
                    // Postgres only accepts foreign keys onto unique columns.
                    if !column.is_primary_key() {
                        indexes.push(IndexSpec {
                            table: table.to_string(),
                            columns: vec![column.name.clone()],
                            ascending: true,
                            unique: true,
                            description: rel
                                .name
                                .as_ref()
                                .map(|n| format!("({n}) relationship key")),
                        });
                    }
                    self.origins
                        .entry(layer_id)
                        .or_default()
                        .push(OriginRelationship {
                            id: rel.id,
                            table: table.to_string(),
                            key_field: column.name.clone(),
                        });
                }
                RelationshipRole::Destination => destinations.push((rel, column.name.clone())),
            }
        }

        for (rel, column_name) in destinations {
            let origin = self
                .origins
                .get(&rel.related_table_id)
                .and_then(|rels| rels.iter().find(|o| o.id == rel.id))
                .ok_or_else(|| Error::UnresolvedRelationship {
                    table: table.to_string(),
                    relationship: rel.id,
                })?;

            let fk = ForeignKeyRef::new(table, &column_name, &origin.table, &origin.key_field);
            if let Some(column) = columns.iter_mut().find(|c| c.name == column_name) {
                column.foreign_key = Some(fk);
                column.indexed = true;
            }
        }

        Ok(())
    }
}

fn geometry_column(kind: GeometryKind, srid: i32) -> ColumnSpec {
    ColumnSpec::new(GEOMETRY_COLUMN, kind.column_type(srid))
        .spatial(srid)
        .indexed()
}

fn default_literal(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn seed_code(code: &serde_json::Value) -> SeedValue {
    match code {
        serde_json::Value::Number(n) if n.is_i64() => match n.as_i64() {
            Some(i) => SeedValue::Int(i),
            None => SeedValue::Text(n.to_string()),
        },
        serde_json::Value::String(s) => SeedValue::Text(s.clone()),
        other => SeedValue::Text(other.to_string()),
    }
}

/// Translate index declarations, dropping any that name unknown columns.
pub fn translate_indexes(table: &TableSpec, indexes: &[esri::Index]) -> Vec<IndexSpec> {
    let mut out = Vec::new();
    for index in indexes {
        let mut columns: Vec<String> = Vec::new();
        let mut unknown = Vec::new();
        for field in index.fields.split(',') {
            let field = sanitize(field.trim());
            if field.is_empty() {
                continue;
            }
            match table.column(&field) {
                Some(col) if !columns.contains(&col.name) => columns.push(col.name.clone()),
                Some(_) => {}
                None => unknown.push(field),
            }
        }

        if !unknown.is_empty() || columns.is_empty() {
            tracing::warn!(
                table = %table.name,
                index = %index.name,
                ?unknown,
                "skipping index with invalid columns"
            );
            continue;
        }

        let description = format!(
            "({}) {}",
            index.name,
            index.description.as_deref().unwrap_or_default()
        );
        out.push(IndexSpec {
            table: table.name.clone(),
            columns,
            ascending: index.is_ascending,
            unique: index.is_unique,
            description: Some(description.trim_end().to_string()),
        });
    }
    out
}
