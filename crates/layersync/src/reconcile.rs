//! Idempotent row upserts.
//!
//! Each row is checked for existence (by primary key when the row carries
//! one, otherwise by every column) and then skipped, updated or inserted.
//! A forced update is only issued when no stored row already holds the
//! same values in every column.
//! The reconciler never commits; the caller owns the transaction.

use std::fmt;

use indexmap::IndexMap;
use layersync_schema::{ColumnAlias, GeometryColumnInfo};
use layersync_sql::{
    Expr, FromClause, InsertStmt, ParamName, RenderedSql, SelectColumn, SelectStmt, UpdateStmt,
    render,
};

use crate::connection::Connection;
use crate::value::SqlValue;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Update rows that already exist by primary key
    pub force: bool,
    /// Log writes instead of executing them
    pub readonly: bool,
    /// Column identifying a row; absent means match on every column
    pub primary_key: Option<String>,
    /// Row columns dropped before anything else happens
    pub ignore_columns: Vec<String>,
}

impl ReconcileOptions {
    fn ignores(&self, column: &str) -> bool {
        self.ignore_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// What happened to one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Added,
    Updated,
    /// Present by primary key and not forcing
    Exists,
    /// Every column already matches a stored row
    Unchanged,
    NullPrimaryKey,
}

/// Per-table tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub added: usize,
    pub updated: usize,
    /// Rows not written, null primary keys included
    pub skipped: usize,
    pub null_pk: usize,
}

impl Summary {
    /// Rows that were written (or would have been, read-only).
    pub fn processed(&self) -> usize {
        self.added + self.updated
    }

    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Added => self.added += 1,
            RowOutcome::Updated => self.updated += 1,
            RowOutcome::Exists | RowOutcome::Unchanged => self.skipped += 1,
            RowOutcome::NullPrimaryKey => {
                self.skipped += 1;
                self.null_pk += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &Summary) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.null_pk += other.null_pk;
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} skipped",
            self.added, self.updated, self.skipped
        )?;
        if self.null_pk > 0 {
            write!(f, " ({} with a null primary key)", self.null_pk)?;
        }
        Ok(())
    }
}

/// Upserts rows into one table.
pub struct Reconciler<'a> {
    conn: &'a dyn Connection,
    table: String,
    geometry: Option<GeometryColumnInfo>,
    aliases: ColumnAlias,
    options: &'a ReconcileOptions,
    summary: Summary,
    warned_missing_key: bool,
}

/// One row after ignored columns are dropped.
struct Row<'r> {
    /// (source column name, value), in row order
    cells: Vec<(&'r str, &'r SqlValue)>,
}

impl<'r> Row<'r> {
    fn value(&self, name: &str) -> Option<&'r SqlValue> {
        self.cells.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(
        conn: &'a dyn Connection,
        table: impl Into<String>,
        geometry: Option<GeometryColumnInfo>,
        aliases: ColumnAlias,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            conn,
            table: table.into(),
            geometry,
            aliases,
            options,
            summary: Summary::default(),
            warned_missing_key: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Reconcile one row given as parallel column-name and value lists.
    ///
    /// A row whose lengths disagree is tallied as skipped before the
    /// [`Error::RowShape`] is returned.
    pub async fn process_row(
        &mut self,
        columns: &[String],
        values: &[SqlValue],
    ) -> Result<RowOutcome> {
        if columns.len() != values.len() {
            self.summary.skipped += 1;
            return Err(Error::RowShape {
                columns: columns.len(),
                values: values.len(),
            });
        }

        let row = Row {
            cells: columns
                .iter()
                .map(String::as_str)
                .zip(values)
                .filter(|(name, _)| !self.options.ignores(name))
                .collect(),
        };

        let outcome = self.decide_and_write(&row).await?;
        tracing::debug!(table = %self.table, ?outcome, "row reconciled");
        self.summary.record(outcome);
        Ok(outcome)
    }

    async fn decide_and_write(&mut self, row: &Row<'_>) -> Result<RowOutcome> {
        let key = self.key_column(row);

        if let Some(key) = key {
            if row.value(key).is_none_or(SqlValue::is_null) {
                tracing::info!(table = %self.table, "Skipping data row with null primary key value");
                return Ok(RowOutcome::NullPrimaryKey);
            }
            let exists = self.exists(row, self.key_filter(key)).await?;
            if !exists {
                self.write(row, self.insert(row)).await?;
                return Ok(RowOutcome::Added);
            }
            if !self.options.force {
                return Ok(RowOutcome::Exists);
            }
            if let Some(filter) = self.full_filter(row) {
                if self.exists(row, filter).await? {
                    return Ok(RowOutcome::Unchanged);
                }
            }
            self.write(row, self.update(row, key)).await?;
            return Ok(RowOutcome::Updated);
        }

        let filter = self.full_filter(row).ok_or_else(|| {
            Error::InvalidInput(format!("row for {} has no columns to match", self.table))
        })?;
        if self.exists(row, filter).await? {
            return Ok(RowOutcome::Unchanged);
        }
        self.write(row, self.insert(row)).await?;
        Ok(RowOutcome::Added)
    }

    /// The row column holding the primary key, if one is configured and
    /// present.
    fn key_column<'r>(&mut self, row: &Row<'r>) -> Option<&'r str> {
        let wanted = self.options.primary_key.as_deref()?;
        let found = row.cells.iter().map(|(name, _)| *name).find(|name| {
            name.eq_ignore_ascii_case(wanted) || self.aliases.resolve(name).eq_ignore_ascii_case(wanted)
        });
        if found.is_none() && !self.warned_missing_key {
            tracing::warn!(
                table = %self.table,
                primary_key = wanted,
                "primary key not among the row columns, matching on every column"
            );
            self.warned_missing_key = true;
        }
        found
    }

    fn is_source(&self, name: &str) -> bool {
        self.geometry.as_ref().is_some_and(|g| g.is_source(name))
    }

    /// Columns written as plain parameters: (database column, param name).
    fn plain_columns<'r>(&'r self, row: &Row<'r>) -> impl Iterator<Item = (&'r str, &'r str)> {
        row.cells
            .iter()
            .filter(|&&(name, _)| !self.is_source(name))
            .map(|&(name, _)| (self.aliases.resolve(name), name))
    }

    fn key_filter(&self, key: &str) -> Expr {
        Expr::column(self.aliases.resolve(key)).eq(Expr::param(key))
    }

    fn full_filter(&self, row: &Row<'_>) -> Option<Expr> {
        let plain = self
            .plain_columns(row)
            .map(|(column, param)| Expr::column(column).not_distinct_from(Expr::param(param)));
        let geometry = self
            .geometry
            .iter()
            .map(|g| Expr::column(&g.column).not_distinct_from(g.fragment.clone()));
        Expr::all(plain.chain(geometry).collect::<Vec<_>>())
    }

    async fn exists(&self, row: &Row<'_>, filter: Expr) -> Result<bool> {
        let stmt = SelectStmt::new()
            .column(SelectColumn::expr(Expr::CountAll))
            .from(FromClause::table(&self.table))
            .where_(filter);
        let rendered = render(&stmt);
        let params = bind(row, &rendered.params)?;
        let count = self
            .conn
            .fetch_one(&rendered.sql, &params)
            .await?
            .and_then(|r| r.int(0))
            .unwrap_or(0);
        if count > 1 {
            tracing::warn!(table = %self.table, count, "row matches more than one stored row");
        }
        Ok(count >= 1)
    }

    fn insert(&self, row: &Row<'_>) -> RenderedSql {
        let mut stmt = InsertStmt::new(&self.table);
        for (column, param) in self.plain_columns(row) {
            stmt = stmt.column(column, Expr::param(param));
        }
        if let Some(g) = &self.geometry {
            stmt = stmt.column(&g.column, g.fragment.clone());
        }
        render(&stmt)
    }

    /// `UPDATE .. WHERE key = $n`, the key bound last.
    fn update(&self, row: &Row<'_>, key: &str) -> RenderedSql {
        let mut stmt = UpdateStmt::new(&self.table);
        for (column, param) in self.plain_columns(row).filter(|(_, p)| *p != key) {
            stmt = stmt.set(column, Expr::param(param));
        }
        if let Some(g) = &self.geometry {
            stmt = stmt.set(&g.column, g.fragment.clone());
        }
        render(&stmt.where_(self.key_filter(key)))
    }

    async fn write(&self, row: &Row<'_>, rendered: RenderedSql) -> Result<()> {
        let params = bind(row, &rendered.params)?;
        if self.options.readonly {
            tracing::info!(sql = %rendered.sql, ?params, "readonly: not executing");
            return Ok(());
        }
        self.conn.execute(&rendered.sql, &params).await?;
        Ok(())
    }
}

/// Values for rendered parameters, looked up by source column name.
fn bind(row: &Row<'_>, params: &[ParamName]) -> Result<Vec<SqlValue>> {
    let values: IndexMap<&str, &SqlValue> = row.cells.iter().copied().collect();
    params
        .iter()
        .map(|p| {
            values
                .get(p.as_str())
                .map(|v| (*v).clone())
                .ok_or_else(|| Error::InvalidInput(format!("row has no value for {}", p.as_str())))
        })
        .collect()
}
