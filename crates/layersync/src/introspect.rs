//! Live catalog metadata.
//!
//! Every query is scoped to `current_schema()` and casts its columns to
//! plain types, since `information_schema` reports domain types.

use indexmap::IndexMap;
use layersync_schema::{GeometryKind, SqlType, canonical_base};

use crate::Result;
use crate::connection::Connection;
use crate::value::{DbRow, SqlValue};

/// A column as it exists in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    /// Canonical base type (the udt name for user-defined types like `geometry`)
    pub data_type: String,
    pub char_max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub nullable: bool,
    pub default: Option<String>,
    pub is_identity: bool,
    pub is_primary: bool,
    pub comment: Option<String>,
}

impl LiveColumn {
    /// A nullable, non-key column of the given type with no size information.
    pub fn new(name: impl Into<String>, data_type: &str) -> Self {
        Self {
            name: name.into(),
            data_type: canonical_base(data_type),
            char_max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            nullable: true,
            default: None,
            is_identity: false,
            is_primary: false,
            comment: None,
        }
    }

    pub fn sql_type(&self) -> SqlType {
        SqlType::parse(&self.data_type)
    }

    /// Identity columns and serial-style `nextval(..)` defaults both count.
    pub fn auto_increment(&self) -> bool {
        self.is_identity
            || self
                .default
                .as_deref()
                .is_some_and(|d| d.trim_start().to_ascii_lowercase().starts_with("nextval("))
    }

    fn from_row(row: &DbRow) -> Self {
        let data_type = match row.text(1) {
            Some("USER-DEFINED") | None => row.text(2).unwrap_or_default(),
            Some(t) => t,
        };
        Self {
            name: row.text(0).unwrap_or_default().to_string(),
            data_type: canonical_base(data_type),
            char_max_length: row.int(3).map(|n| n as i32),
            numeric_precision: row.int(4).map(|n| n as i32),
            numeric_scale: row.int(5).map(|n| n as i32),
            nullable: row.bool(6).unwrap_or(true),
            default: row.text(7).map(str::to_string),
            is_identity: row.bool(8).unwrap_or(false),
            is_primary: row.bool(9).unwrap_or(false),
            comment: row.text(10).map(str::to_string),
        }
    }
}

/// An index as it exists in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub primary: bool,
    pub unique: bool,
}

/// A foreign-key constraint pointing at some table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundForeignKey {
    pub name: String,
    /// Table holding the constraint
    pub table: String,
    /// Constrained columns, in constraint order
    pub columns: Vec<String>,
    pub referenced_table: String,
    /// Referenced columns, paired with `columns`
    pub referenced_columns: Vec<String>,
}

pub(crate) const TABLE_EXISTS_SQL: &str = "\
SELECT COUNT(1) FROM information_schema.tables
WHERE table_schema = current_schema() AND table_name = $1::text AND table_type = 'BASE TABLE'";

pub(crate) const VIEW_EXISTS_SQL: &str = "\
SELECT COUNT(1) FROM information_schema.views
WHERE table_schema = current_schema() AND table_name = $1::text";

pub(crate) const COLUMNS_SQL: &str = "\
SELECT c.column_name::text, c.data_type::text, c.udt_name::text,
       c.character_maximum_length::int, c.numeric_precision::int, c.numeric_scale::int,
       (c.is_nullable = 'YES'), c.column_default::text, (c.is_identity = 'YES'),
       EXISTS (
           SELECT 1 FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
            AND k.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ),
       col_description(format('%I.%I', c.table_schema, c.table_name)::regclass,
                       c.ordinal_position::int)::text
FROM information_schema.columns c
WHERE c.table_schema = current_schema() AND c.table_name = $1::text
ORDER BY c.ordinal_position";

pub(crate) const GEOMETRY_COLUMN_SQL: &str = "\
SELECT type::text, srid::int FROM geometry_columns
WHERE f_table_schema = current_schema() AND f_table_name = $1::text
  AND f_geometry_column = $2::text";

pub(crate) const INDEXES_SQL: &str = "\
SELECT i.relname::text, ix.indisprimary, ix.indisunique,
       array_to_string(array_agg(a.attname::text ORDER BY k.ord), ',')
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE n.nspname = current_schema() AND t.relname = $1::text
GROUP BY i.relname, ix.indisprimary, ix.indisunique
ORDER BY i.relname";

pub(crate) const DEPENDENT_VIEWS_SQL: &str = "\
SELECT DISTINCT v.relname::text
FROM pg_depend d
JOIN pg_rewrite r ON r.oid = d.objid
JOIN pg_class v ON v.oid = r.ev_class
JOIN pg_class t ON t.oid = d.refobjid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_namespace vn ON vn.oid = v.relnamespace
WHERE d.classid = 'pg_rewrite'::regclass AND d.refclassid = 'pg_class'::regclass
  AND v.relkind = 'v' AND v.oid <> t.oid
  AND n.nspname = current_schema() AND vn.nspname = current_schema()
  AND t.relname = $1::text
ORDER BY 1";

pub(crate) const INBOUND_FKS_SQL: &str = "\
SELECT con.conname::text, src.relname::text, k.ord::int, sa.attname::text,
       tgt.relname::text, ta.attname::text
FROM pg_constraint con
JOIN pg_class src ON src.oid = con.conrelid
JOIN pg_class tgt ON tgt.oid = con.confrelid
JOIN pg_namespace n ON n.oid = tgt.relnamespace
CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(src_att, tgt_att, ord)
JOIN pg_attribute sa ON sa.attrelid = con.conrelid AND sa.attnum = k.src_att
JOIN pg_attribute ta ON ta.attrelid = con.confrelid AND ta.attnum = k.tgt_att
WHERE con.contype = 'f' AND n.nspname = current_schema() AND tgt.relname = $1::text
ORDER BY con.conname, k.ord";

async fn count(conn: &dyn Connection, sql: &str, params: &[SqlValue]) -> Result<i64> {
    Ok(conn
        .fetch_one(sql, params)
        .await?
        .and_then(|row| row.int(0))
        .unwrap_or(0))
}

pub async fn table_exists(conn: &dyn Connection, table: &str) -> Result<bool> {
    Ok(count(conn, TABLE_EXISTS_SQL, &[table.into()]).await? > 0)
}

pub async fn view_exists(conn: &dyn Connection, view: &str) -> Result<bool> {
    Ok(count(conn, VIEW_EXISTS_SQL, &[view.into()]).await? > 0)
}

/// Columns of `table`, in ordinal order. Empty when the table is absent.
pub async fn live_columns(conn: &dyn Connection, table: &str) -> Result<Vec<LiveColumn>> {
    let rows = conn.query(COLUMNS_SQL, &[table.into()]).await?;
    Ok(rows.iter().map(LiveColumn::from_row).collect())
}

/// Registered spatial subtype and SRID of a geometry column.
///
/// The subtype is `None` when PostGIS reports a name with no known shape.
pub async fn geometry_column(
    conn: &dyn Connection,
    table: &str,
    column: &str,
) -> Result<Option<(String, Option<GeometryKind>, Option<i32>)>> {
    let row = conn
        .fetch_one(GEOMETRY_COLUMN_SQL, &[table.into(), column.into()])
        .await?;
    Ok(row.map(|row| {
        let raw = row.text(0).unwrap_or("GEOMETRY").to_string();
        let kind = GeometryKind::parse(&raw);
        let srid = row.int(1).map(|n| n as i32).filter(|&n| n != 0);
        (raw, kind, srid)
    }))
}

pub async fn live_indexes(conn: &dyn Connection, table: &str) -> Result<Vec<LiveIndex>> {
    let rows = conn.query(INDEXES_SQL, &[table.into()]).await?;
    Ok(rows
        .iter()
        .map(|row| LiveIndex {
            name: row.text(0).unwrap_or_default().to_string(),
            primary: row.bool(1).unwrap_or(false),
            unique: row.bool(2).unwrap_or(false),
            columns: row
                .text(3)
                .unwrap_or_default()
                .split(',')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .collect())
}

/// Views in the current schema whose definition reads from `table`.
pub async fn dependent_views(conn: &dyn Connection, table: &str) -> Result<Vec<String>> {
    let rows = conn.query(DEPENDENT_VIEWS_SQL, &[table.into()]).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.text(0).map(str::to_string))
        .collect())
}

/// Every foreign key in the schema that references `table`.
///
/// Composite keys keep the constraint's own column order (by ordinal),
/// not the order rows arrive in.
pub async fn inbound_foreign_keys(
    conn: &dyn Connection,
    table: &str,
) -> Result<Vec<InboundForeignKey>> {
    let rows = conn.query(INBOUND_FKS_SQL, &[table.into()]).await?;

    let mut grouped: IndexMap<String, (String, String, Vec<(i64, String, String)>)> =
        IndexMap::new();
    for row in &rows {
        let name = row.text(0).unwrap_or_default().to_string();
        let entry = grouped.entry(name).or_insert_with(|| {
            (
                row.text(1).unwrap_or_default().to_string(),
                row.text(4).unwrap_or_default().to_string(),
                Vec::new(),
            )
        });
        entry.2.push((
            row.int(2).unwrap_or(0),
            row.text(3).unwrap_or_default().to_string(),
            row.text(5).unwrap_or_default().to_string(),
        ));
    }

    Ok(grouped
        .into_iter()
        .map(|(name, (src, tgt, mut pairs))| {
            pairs.sort_by_key(|(ord, _, _)| *ord);
            let (columns, referenced_columns) =
                pairs.into_iter().map(|(_, c, r)| (c, r)).unzip();
            InboundForeignKey {
                name,
                table: src,
                columns,
                referenced_table: tgt,
                referenced_columns,
            }
        })
        .collect())
}
