//! SQL statements.

use crate::expr::Expr;
use crate::{ColumnName, TableName};

/// A SELECT statement.
#[derive(Debug, Clone, Default)]
pub struct SelectStmt {
    pub columns: Vec<SelectColumn>,
    pub from: Option<FromClause>,
    pub joins: Vec<Join>,
    pub where_: Option<Expr>,
}

/// An expression in a SELECT list, optionally aliased.
#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub expr: Expr,
    pub alias: Option<ColumnName>,
}

impl SelectColumn {
    pub fn expr(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<ColumnName>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// A FROM clause.
#[derive(Debug, Clone)]
pub struct FromClause {
    pub table: TableName,
    pub alias: Option<TableName>,
}

impl FromClause {
    pub fn table(name: impl Into<TableName>) -> Self {
        Self {
            table: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<TableName>, alias: impl Into<TableName>) -> Self {
        Self {
            table: name.into(),
            alias: Some(alias.into()),
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableName,
    pub alias: Option<TableName>,
    pub on: Expr,
}

impl Join {
    pub fn left(table: impl Into<TableName>, alias: impl Into<TableName>, on: Expr) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.into(),
            alias: Some(alias.into()),
            on,
        }
    }
}

/// Type of JOIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
}

impl JoinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

// ============================================================================
// INSERT statement
// ============================================================================

/// An INSERT statement.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: TableName,
    pub columns: Vec<ColumnName>,
    pub values: Vec<Expr>,
}

/// An assignment in UPDATE SET.
#[derive(Debug, Clone)]
pub struct UpdateAssignment {
    pub column: ColumnName,
    pub value: Expr,
}

impl UpdateAssignment {
    pub fn new(column: ColumnName, value: Expr) -> Self {
        Self { column, value }
    }
}

// ============================================================================
// UPDATE statement
// ============================================================================

/// An UPDATE statement.
#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: TableName,
    pub assignments: Vec<UpdateAssignment>,
    pub where_: Option<Expr>,
}

// ============================================================================
// CREATE VIEW statement
// ============================================================================

/// A `CREATE VIEW name AS SELECT ...` statement.
#[derive(Debug, Clone)]
pub struct CreateViewStmt {
    pub name: TableName,
    pub query: SelectStmt,
}

// ============================================================================
// Builder-style constructors
// ============================================================================

impl SelectStmt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, col: SelectColumn) -> Self {
        self.columns.push(col);
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = SelectColumn>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn from(mut self, from: FromClause) -> Self {
        self.from = Some(from);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }
}

impl InsertStmt {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<ColumnName>, value: Expr) -> Self {
        self.columns.push(name.into());
        self.values.push(value);
        self
    }
}

impl UpdateStmt {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            where_: None,
        }
    }

    pub fn set(mut self, column: impl Into<ColumnName>, value: Expr) -> Self {
        self.assignments
            .push(UpdateAssignment::new(column.into(), value));
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }
}

impl CreateViewStmt {
    pub fn new(name: impl Into<TableName>, query: SelectStmt) -> Self {
        Self {
            name: name.into(),
            query,
        }
    }
}
