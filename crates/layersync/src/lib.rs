//! Reconcile ESRI layer descriptions and feature rows into PostGIS.
//!
//! Two runs make up the tool:
//! - [`run::process_schema`] translates a layer/table description into
//!   table specs and creates, replaces, or leaves alone each table, its
//!   lookup tables, indexes and view.
//! - [`run::load_rows`] upserts rows into an existing table, matching on
//!   a primary key when one is configured and on every column otherwise.
//!
//! [`run::process_workbook`] does both for a spreadsheet: a schema sheet
//! describes the table and a data sheet fills it.
//!
//! Every component talks to the database through a [`Connection`].

pub mod compare;
pub mod connection;
pub mod ddl;
mod error;
pub mod geometry;
pub mod introspect;
pub mod reconcile;
pub mod run;
pub mod source;
pub mod translate;
mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{BoxFuture, Connection, PgSession};
pub use error::{Error, Result};
pub use value::{DbRow, SqlValue};
