//! SQL expressions.

use crate::{ColumnName, ParamName, TableName};

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A parameter placeholder (e.g., $x -> $1)
    Param(ParamName),
    /// A column reference
    Column(ColumnRef),
    /// An integer literal
    Int(i64),
    /// Binary operation (e.g., a = b, a AND b)
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// Function call
    FnCall { name: String, args: Vec<Expr> },
    /// COUNT(1)
    CountAll,
}

/// A column reference, optionally qualified with table/alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<TableName>,
    pub column: ColumnName,
}

impl ColumnRef {
    pub fn new(column: ColumnName) -> Self {
        Self {
            table: None,
            column,
        }
    }

    pub fn qualified(table: TableName, column: ColumnName) -> Self {
        Self {
            table: Some(table),
            column,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    /// Null-safe equality.
    NotDistinctFrom,
    And,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::NotDistinctFrom => "IS NOT DISTINCT FROM",
            BinOp::And => "AND",
        }
    }
}

// Convenience constructors
impl Expr {
    pub fn param(name: impl Into<ParamName>) -> Self {
        Expr::Param(name.into())
    }

    pub fn column(name: impl Into<ColumnName>) -> Self {
        Expr::Column(ColumnRef::new(name.into()))
    }

    pub fn qualified_column(table: impl Into<TableName>, column: impl Into<ColumnName>) -> Self {
        Expr::Column(ColumnRef::qualified(table.into(), column.into()))
    }

    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FnCall {
            name: name.into(),
            args,
        }
    }

    /// Create an equality expression: self = other
    pub fn eq(self, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op: BinOp::Eq,
            right: Box::new(other),
        }
    }

    /// Create a null-safe equality: self IS NOT DISTINCT FROM other
    pub fn not_distinct_from(self, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op: BinOp::NotDistinctFrom,
            right: Box::new(other),
        }
    }

    /// Create an AND expression: self AND other
    pub fn and(self, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op: BinOp::And,
            right: Box::new(other),
        }
    }

    /// AND together every expression, or `None` when there are none.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }
}
