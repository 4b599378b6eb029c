//! In-memory [`Connection`] that records statements and replays canned rows.

use std::sync::Mutex;

use crate::connection::{BoxFuture, Connection};
use crate::value::{DbRow, SqlValue};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

struct Canned {
    needle: String,
    params: Option<Vec<SqlValue>>,
    rows: Vec<DbRow>,
}

#[derive(Default)]
pub struct MockConnection {
    log: Mutex<Vec<Recorded>>,
    canned: Mutex<Vec<Canned>>,
    failing: Mutex<Vec<String>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any query containing `needle` with `rows`.
    pub fn on(&self, needle: &str, rows: Vec<DbRow>) -> &Self {
        self.canned.lock().unwrap().push(Canned {
            needle: needle.to_string(),
            params: None,
            rows,
        });
        self
    }

    /// Answer queries containing `needle` bound to exactly `params`.
    pub fn on_params(&self, needle: &str, params: Vec<SqlValue>, rows: Vec<DbRow>) -> &Self {
        self.canned.lock().unwrap().push(Canned {
            needle: needle.to_string(),
            params: Some(params),
            rows,
        });
        self
    }

    /// Make statements containing `needle` fail.
    pub fn fail_on(&self, needle: &str) -> &Self {
        self.failing.lock().unwrap().push(needle.to_string());
        self
    }

    pub fn statements(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|r| r.sql).collect()
    }

    /// Statements that are not catalog reads or existence checks.
    pub fn writes(&self) -> Vec<String> {
        self.sql()
            .into_iter()
            .filter(|s| !s.starts_with("SELECT") && s != "COMMIT" && s != "ROLLBACK")
            .collect()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) -> Result<()> {
        self.log.lock().unwrap().push(Recorded {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if self.failing.lock().unwrap().iter().any(|n| sql.contains(n)) {
            return Err(Error::InvalidInput(format!("mock failure for: {sql}")));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [SqlValue]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.record(sql, params)?;
            Ok(1)
        })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<DbRow>>> {
        Box::pin(async move {
            self.record(sql, params)?;
            let canned = self.canned.lock().unwrap();
            let hit = canned.iter().find(|c| {
                sql.contains(&c.needle)
                    && c.params.as_ref().is_none_or(|p| p.as_slice() == params)
            });
            Ok(hit.map(|c| c.rows.clone()).unwrap_or_default())
        })
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record("COMMIT", &[]) })
    }

    fn reset(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record("ROLLBACK", &[]) })
    }
}

/// A single-value row, as returned by `COUNT(1)` checks.
pub fn count_row(n: i64) -> DbRow {
    DbRow::new(vec![SqlValue::Int(n)])
}

/// A catalog row for [`crate::introspect::COLUMNS_SQL`].
pub fn column_row(
    name: &str,
    data_type: &str,
    length: Option<i64>,
    nullable: bool,
    primary: bool,
) -> DbRow {
    DbRow::new(vec![
        name.into(),
        data_type.into(),
        data_type.into(),
        length.into(),
        SqlValue::Null,
        SqlValue::Null,
        nullable.into(),
        SqlValue::Null,
        false.into(),
        primary.into(),
        SqlValue::Null,
    ])
}
