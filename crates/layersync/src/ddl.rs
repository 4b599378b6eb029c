//! Creating, replacing and dropping tables, views and indexes.
//!
//! Every write goes through [`DdlExecutor::run`], which honours read-only
//! mode by logging the statement instead of executing it. Catalog reads
//! always run, except against tables a read-only run only pretended to
//! create.

use std::collections::HashSet;

use indexmap::IndexMap;
use layersync_schema::{
    ColumnAlias, ColumnSpec, ForeignKeyRef, GeometryKind, IndexSpec, SeedRow, SeedValue,
    TableSpec,
};
use layersync_sql::{
    CreateViewStmt, Expr, FromClause, Ident, Join, Lit, SelectColumn, SelectStmt, render,
    unique_index_name,
};

use crate::compare::{find_matching_index, table_matches};
use crate::connection::Connection;
use crate::introspect::{self, InboundForeignKey};
use crate::reconcile::{ReconcileOptions, Reconciler, Summary};
use crate::value::SqlValue;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct DdlOptions {
    /// Replace tables that exist, and recreate covered indexes
    pub force: bool,
    /// Log writes instead of executing them
    pub readonly: bool,
    /// Never create denormalized views
    pub noviews: bool,
}

/// What happened to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    Created,
    Recreated,
    AlreadyMatches,
    /// Mismatched but left alone because the run is read-only
    ConflictIgnored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub table: String,
    pub action: TableAction,
    /// Foreign keys created with the table
    pub foreign_keys: Vec<ForeignKeyRef>,
    /// Indexes created with the table, the primary key's included
    pub indexes: Vec<String>,
    pub view: Option<String>,
}

impl TableOutcome {
    fn untouched(table: &str, action: TableAction) -> Self {
        Self {
            table: table.to_string(),
            action,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            view: None,
        }
    }
}

/// Name of the foreign-key constraint created for `fk`.
pub fn foreign_key_name(fk: &ForeignKeyRef) -> String {
    format!("{}_{}_fkey", fk.table, fk.column)
}

fn column_definition(col: &ColumnSpec) -> String {
    let mut def = format!("    {} {}", Ident(&col.name), col.db_type);
    if col.is_primary_key() {
        def.push_str(" PRIMARY KEY");
    } else if col.nullable == Some(false) {
        def.push_str(" NOT NULL");
    }
    if col.auto_increment == Some(true) {
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    }
    if let Some(default) = &col.default {
        def.push_str(&format!(" DEFAULT {}", Lit(default)));
    }
    def
}

/// `CREATE TABLE` with inline primary key and named foreign keys.
pub fn create_table_sql(spec: &TableSpec) -> String {
    let mut parts: Vec<String> = spec.columns.iter().map(column_definition).collect();
    for fk in spec.foreign_keys() {
        parts.push(format!(
            "    CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            Ident(foreign_key_name(fk)),
            Ident(&fk.column),
            Ident(&fk.references_table),
            Ident(&fk.references_column)
        ));
    }
    format!(
        "CREATE TABLE {} (\n{}\n)",
        Ident(&spec.name),
        parts.join(",\n")
    )
}

/// The denormalized view: foreign keys replaced by their display column,
/// spatial columns decomposed.
pub fn create_view_sql(spec: &TableSpec) -> String {
    const BASE: &str = "t";
    let mut query = SelectStmt::new().from(FromClause::aliased(&spec.name, BASE));
    let mut joins = 0;

    for col in &spec.columns {
        if let Some(fk) = &col.foreign_key {
            joins += 1;
            let alias = format!("j{joins}");
            query = query
                .join(Join::left(
                    &fk.references_table,
                    &alias,
                    Expr::qualified_column(BASE, &col.name)
                        .eq(Expr::qualified_column(&alias, &fk.references_column)),
                ))
                .column(SelectColumn::aliased(
                    Expr::qualified_column(&alias, fk.view_column()),
                    &col.name,
                ));
            continue;
        }

        let column = Expr::qualified_column(BASE, &col.name);
        query = query.column(SelectColumn::aliased(column.clone(), &col.name));
        if !col.is_spatial {
            continue;
        }
        let kind = col.sql_type().args.first().and_then(|a| GeometryKind::parse(a));
        if kind == Some(GeometryKind::Point) {
            for (function, suffix) in [("ST_X", "x"), ("ST_Y", "y")] {
                query = query.column(SelectColumn::aliased(
                    Expr::call(function, vec![column.clone()]),
                    format!("{}_{suffix}", col.name),
                ));
            }
        }
        query = query.column(SelectColumn::aliased(
            Expr::call("ST_SRID", vec![column]),
            format!("{}_srid", col.name),
        ));
    }

    render(&CreateViewStmt::new(spec.view_name(), query)).sql
}

/// `CREATE INDEX` for a requested index.
pub fn create_index_sql(name: &str, index: &IndexSpec) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let order = if index.ascending { "" } else { " DESC" };
    let columns: Vec<_> = index
        .columns
        .iter()
        .map(|c| format!("{}{order}", Ident(c)))
        .collect();
    format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        Ident(name),
        Ident(&index.table),
        columns.join(", ")
    )
}

fn add_foreign_key_sql(fk: &InboundForeignKey) -> String {
    let list = |cols: &[String]| {
        cols.iter()
            .map(|c| Ident(c).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        Ident(&fk.table),
        Ident(&fk.name),
        list(&fk.columns),
        Ident(&fk.referenced_table),
        list(&fk.referenced_columns)
    )
}

fn drop_foreign_key_sql(fk: &InboundForeignKey) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        Ident(&fk.table),
        Ident(&fk.name)
    )
}

pub struct DdlExecutor<'a> {
    conn: &'a dyn Connection,
    options: DdlOptions,
    /// Tables created or recreated in read-only mode; their live state is
    /// not what the run declared, so they are never inspected.
    simulated: HashSet<String>,
}

impl<'a> DdlExecutor<'a> {
    pub fn new(conn: &'a dyn Connection, options: DdlOptions) -> Self {
        Self {
            conn,
            options,
            simulated: HashSet::new(),
        }
    }

    fn is_simulated(&self, table: &str) -> bool {
        self.simulated.contains(table)
    }

    /// Execute a write, or only log it when read-only.
    async fn run(&self, sql: &str) -> Result<()> {
        if self.options.readonly {
            tracing::info!(sql, "readonly: not executing");
            return Ok(());
        }
        self.conn.execute(sql, &[]).await?;
        Ok(())
    }

    /// Run a statement that may fail without aborting the transaction.
    async fn try_run(&self, sql: &str) -> Result<()> {
        if self.options.readonly {
            return self.run(sql).await;
        }
        self.run("SAVEPOINT layersync_attempt").await?;
        match self.run(sql).await {
            Ok(()) => self.run("RELEASE SAVEPOINT layersync_attempt").await,
            Err(e) => {
                self.run("ROLLBACK TO SAVEPOINT layersync_attempt").await?;
                Err(e)
            }
        }
    }

    /// Bring one table in line with its declaration.
    pub async fn process_table(&mut self, spec: &TableSpec) -> Result<TableOutcome> {
        let exists = introspect::table_exists(self.conn, &spec.name).await?;
        if !exists {
            return self.create(spec, TableAction::Created).await;
        }

        if self.options.force {
            self.drop_table(&spec.name).await?;
            return self.create(spec, TableAction::Recreated).await;
        }
        if table_matches(self.conn, spec).await? {
            tracing::info!(table = %spec.name, "table already matches");
            return Ok(TableOutcome::untouched(
                &spec.name,
                TableAction::AlreadyMatches,
            ));
        }
        if self.options.readonly {
            tracing::warn!(table = %spec.name, "table differs from the requested schema; leaving it (readonly)");
            return Ok(TableOutcome::untouched(
                &spec.name,
                TableAction::ConflictIgnored,
            ));
        }
        tracing::error!(table = %spec.name, "table differs from the requested schema");
        Err(Error::SchemaConflict(spec.name.clone()))
    }

    async fn create(&mut self, spec: &TableSpec, action: TableAction) -> Result<TableOutcome> {
        let view = self.view_name_if_wanted(spec).await?;
        if self.options.readonly {
            self.simulated.insert(spec.name.clone());
        }

        self.run(&create_table_sql(spec)).await?;
        for col in &spec.columns {
            if let Some(comment) = &col.comment {
                self.run(&format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    Ident(&spec.name),
                    Ident(&col.name),
                    Lit(comment)
                ))
                .await?;
            }
        }

        let mut indexes = Vec::new();
        if spec.primary_key().is_some() {
            indexes.push(format!("{}_pkey", spec.name));
        }
        for col in spec
            .columns
            .iter()
            .filter(|c| c.indexed && !c.is_primary_key())
        {
            let name = unique_index_name(&spec.name);
            let using = if col.is_spatial { " USING GIST" } else { "" };
            self.run(&format!(
                "CREATE INDEX {} ON {}{using} ({})",
                Ident(&name),
                Ident(&spec.name),
                Ident(&col.name)
            ))
            .await?;
            indexes.push(name);
        }

        if let Some(view) = &view {
            self.run(&create_view_sql(spec)).await?;
            tracing::info!(table = %spec.name, view = %view, "created view");
        }

        let foreign_keys: Vec<_> = spec.foreign_keys().cloned().collect();
        tracing::info!(
            table = %spec.name,
            ?action,
            foreign_keys = foreign_keys.len(),
            indexes = indexes.len(),
            "table created"
        );
        Ok(TableOutcome {
            table: spec.name.clone(),
            action,
            foreign_keys,
            indexes,
            view,
        })
    }

    /// Decide whether `spec` gets a view, clearing any stale one.
    async fn view_name_if_wanted(&self, spec: &TableSpec) -> Result<Option<String>> {
        let view = spec.view_name();
        let wanted = !self.options.noviews && spec.foreign_keys().next().is_some();
        let stale = introspect::view_exists(self.conn, &view).await?;
        if stale && (wanted || self.options.force) {
            self.run(&format!("DROP VIEW {}", Ident(&view))).await?;
        }
        Ok(wanted.then_some(view))
    }

    /// Drop a table along with every foreign key and view that depends on it.
    ///
    /// Views of other tables that join this one are dropped too; they come
    /// back when their own table is processed.
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        for fk in introspect::inbound_foreign_keys(self.conn, table).await? {
            tracing::info!(table, constraint = %fk.name, from = %fk.table, "dropping inbound foreign key");
            self.run(&drop_foreign_key_sql(&fk)).await?;
        }
        for view in introspect::dependent_views(self.conn, table).await? {
            tracing::info!(table, view = %view, "dropping dependent view");
            self.run(&format!("DROP VIEW IF EXISTS {} CASCADE", Ident(&view)))
                .await?;
        }
        self.run(&format!("DROP TABLE {}", Ident(table))).await?;
        tracing::info!(table, "dropped table");
        Ok(())
    }

    /// Create requested indexes that no live index already covers.
    ///
    /// Returns the names of the indexes created.
    pub async fn process_indexes(&self, indexes: &[IndexSpec]) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for index in indexes {
            let live = if self.is_simulated(&index.table) {
                Vec::new()
            } else {
                introspect::live_indexes(self.conn, &index.table).await?
            };
            if let Some(existing) = find_matching_index(&live, &index.columns) {
                if !self.options.force {
                    tracing::info!(table = %index.table, index = %existing.name, columns = ?index.columns, "index already covered");
                    continue;
                }
                if existing.primary {
                    tracing::info!(table = %index.table, index = %existing.name, "not replacing the primary key index");
                    continue;
                }
                if existing.unique && !index.unique {
                    tracing::info!(
                        table = %index.table,
                        index = %existing.name,
                        "not replacing a unique index with a non-unique one"
                    );
                    continue;
                }
                let drop = format!("DROP INDEX {}", Ident(&existing.name));
                if let Err(e) = self.try_run(&drop).await {
                    tracing::warn!(table = %index.table, index = %existing.name, error = %e, "could not drop index, not recreating it");
                    continue;
                }
            }

            let name = unique_index_name(&index.table);
            self.run(&create_index_sql(&name, index)).await?;
            if let Some(description) = index.description.as_deref().filter(|d| !d.is_empty()) {
                self.run(&format!(
                    "COMMENT ON INDEX {} IS {}",
                    Ident(&name),
                    Lit(description)
                ))
                .await?;
            }
            tracing::info!(table = %index.table, index = %name, columns = ?index.columns, "created index");
            created.push(name);
        }
        Ok(created)
    }

    /// Insert lookup rows that are not present yet.
    pub async fn seed(&self, rows: &[SeedRow]) -> Result<Summary> {
        let mut by_table: IndexMap<&str, Vec<&SeedRow>> = IndexMap::new();
        for row in rows {
            by_table.entry(row.table.as_str()).or_default().push(row);
        }

        let options = ReconcileOptions {
            force: self.options.force,
            readonly: self.options.readonly,
            primary_key: Some(crate::translate::LOOKUP_CODE_COLUMN.to_string()),
            ignore_columns: Vec::new(),
        };
        let mut total = Summary::default();
        for (table, rows) in by_table {
            if self.is_simulated(table) {
                for row in &rows {
                    tracing::info!(table, values = ?row.values, "readonly: not executing");
                }
                total.added += rows.len();
                continue;
            }
            let mut reconciler =
                Reconciler::new(self.conn, table, None, ColumnAlias::new(), &options);
            for row in rows {
                let (columns, values): (Vec<String>, Vec<SqlValue>) = row
                    .values
                    .iter()
                    .map(|(column, value)| {
                        let value = match value {
                            SeedValue::Text(s) => SqlValue::Text(s.clone()),
                            SeedValue::Int(n) => SqlValue::Int(*n),
                        };
                        (column.clone(), value)
                    })
                    .unzip();
                reconciler.process_row(&columns, &values).await?;
            }
            tracing::info!(table, summary = %reconciler.summary(), "seeded lookup table");
            total.merge(&reconciler.summary());
        }
        Ok(total)
    }

    /// Drop every foreign key pointing at `table` and empty it.
    ///
    /// The returned constraints must be handed to
    /// [`DdlExecutor::finish_reload`] once the table is repopulated.
    pub async fn begin_reload(&self, table: &str) -> Result<Vec<InboundForeignKey>> {
        let inbound = introspect::inbound_foreign_keys(self.conn, table).await?;
        for fk in &inbound {
            self.run(&drop_foreign_key_sql(fk)).await?;
        }
        self.run(&format!("TRUNCATE TABLE {}", Ident(table))).await?;
        tracing::info!(table, dropped = inbound.len(), "truncated table");
        Ok(inbound)
    }

    /// Restore constraints captured by [`DdlExecutor::begin_reload`].
    pub async fn finish_reload(&self, captured: &[InboundForeignKey]) -> Result<()> {
        for fk in captured {
            self.run(&add_foreign_key_sql(fk)).await?;
            tracing::info!(constraint = %fk.name, from = %fk.table, "restored foreign key");
        }
        Ok(())
    }
}
