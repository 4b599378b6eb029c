//! The connection handle every component talks through.
//!
//! Components never touch the driver directly; they receive a
//! `&dyn Connection` and only see `execute`, `query`, `fetch_one`, `commit`
//! and `reset`. [`PgSession`] implements it over a `tokio_postgres::Client`
//! and logs every statement via tracing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_postgres::types::ToSql;
use tracing::Instrument;

use crate::value::{DbRow, SqlValue};
use crate::{Error, Result};

/// Boxed future returned by [`Connection`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A database connection that executes one statement at a time.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [SqlValue]) -> BoxFuture<'a, Result<u64>>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<DbRow>>>;

    /// Commit the open transaction, if any.
    fn commit(&self) -> BoxFuture<'_, Result<()>>;

    /// Roll back the open transaction, if any.
    fn reset(&self) -> BoxFuture<'_, Result<()>>;

    /// Execute a query, returning its first row.
    fn fetch_one<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Option<DbRow>>> {
        Box::pin(async move { Ok(self.query(sql, params).await?.into_iter().next()) })
    }
}

/// A Postgres session with an implicit transaction.
///
/// The first statement opens a transaction; [`Connection::commit`] closes
/// it. A session dropped without committing is rolled back by the server
/// when the connection closes.
pub struct PgSession {
    client: tokio_postgres::Client,
    in_transaction: AtomicBool,
}

impl PgSession {
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client,
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Connect and spawn the connection driver task.
    pub async fn connect(config: &tokio_postgres::Config) -> Result<Self> {
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(Error::Connect)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "database connection error");
            }
        });

        Ok(Self::new(client))
    }

    async fn begin_if_needed(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn finish(&self, statement: &str) -> Result<()> {
        if self.in_transaction.swap(false, Ordering::SeqCst) {
            let span = tracing::debug_span!("db.transaction", statement);
            self.client
                .batch_execute(statement)
                .instrument(span)
                .await?;
        }
        Ok(())
    }
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl Connection for PgSession {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [SqlValue]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.begin_if_needed().await?;
            let span = tracing::debug_span!(
                "db.execute",
                sql = %sql,
                params = params.len(),
                affected = tracing::field::Empty,
            );
            let affected = async {
                tracing::debug!(?params, "execute");
                self.client.execute(sql, &bind(params)).await
            }
            .instrument(span.clone())
            .await?;
            span.record("affected", affected);
            Ok(affected)
        })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<DbRow>>> {
        Box::pin(async move {
            self.begin_if_needed().await?;
            let span = tracing::debug_span!(
                "db.query",
                sql = %sql,
                params = params.len(),
                rows = tracing::field::Empty,
            );
            let rows = async {
                tracing::debug!(?params, "query");
                self.client.query(sql, &bind(params)).await
            }
            .instrument(span.clone())
            .await?;
            span.record("rows", rows.len());
            rows.iter()
                .map(|row| DbRow::from_pg(row).map_err(Error::from))
                .collect()
        })
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.finish("COMMIT"))
    }

    fn reset(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.finish("ROLLBACK"))
    }
}
