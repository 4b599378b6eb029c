//! Values crossing the database boundary.
//!
//! Row data arrives loosely typed (spreadsheet cells, JSON attributes), so a
//! [`SqlValue`] converts itself to whatever type the server inferred for the
//! parameter it is bound to.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::error::Error as StdError;
use std::fmt;
use tokio_postgres::Row;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn StdError + Sync + Send>;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(n) => Some(*n),
            SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(n) => Some(*n as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(n) => Some(*n != 0),
            SqlValue::Text(s) => parse_bool(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(n) => write!(f, "{n}"),
            SqlValue::Float(x) => write!(f, "{x}"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Timestamp(t) => write!(f, "{t}"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Int(n)
    }
}

impl From<f64> for SqlValue {
    fn from(x: f64) -> Self {
        SqlValue::Float(x)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl From<&serde_json::Value> for SqlValue {
    fn from(v: &serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    let s = s.trim();
    if let Some(t) = FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(t);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_utc());
    }
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Epoch milliseconds (how ESRI encodes dates) to a timestamp.
fn from_epoch_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|t| t.naive_utc())
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot bind {value:?} as {ty}").into()
}

impl SqlValue {
    fn to_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::Timestamp(t) => Some(*t),
            SqlValue::Int(ms) => from_epoch_millis(*ms),
            SqlValue::Float(ms) => from_epoch_millis(*ms as i64),
            SqlValue::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    fn to_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Int(n) => Some(Decimal::from(*n)),
            SqlValue::Float(x) => Decimal::from_f64(*x),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        if is_text(ty) {
            return self.to_string().to_sql(ty, out);
        }
        match *ty {
            Type::BOOL => self
                .as_bool()
                .ok_or_else(|| mismatch(self, ty))?
                .to_sql(ty, out),
            Type::INT2 => {
                let n = self.as_i64().ok_or_else(|| mismatch(self, ty))?;
                i16::try_from(n)?.to_sql(ty, out)
            }
            Type::INT4 => {
                let n = self.as_i64().ok_or_else(|| mismatch(self, ty))?;
                i32::try_from(n)?.to_sql(ty, out)
            }
            Type::INT8 => self
                .as_i64()
                .ok_or_else(|| mismatch(self, ty))?
                .to_sql(ty, out),
            Type::FLOAT4 => {
                let x = self.as_f64().ok_or_else(|| mismatch(self, ty))?;
                (x as f32).to_sql(ty, out)
            }
            Type::FLOAT8 => self
                .as_f64()
                .ok_or_else(|| mismatch(self, ty))?
                .to_sql(ty, out),
            Type::NUMERIC => self
                .to_decimal()
                .ok_or_else(|| mismatch(self, ty))?
                .to_sql(ty, out),
            Type::TIMESTAMP => self
                .to_timestamp()
                .ok_or_else(|| mismatch(self, ty))?
                .to_sql(ty, out),
            Type::TIMESTAMPTZ => self
                .to_timestamp()
                .ok_or_else(|| mismatch(self, ty))?
                .and_utc()
                .to_sql(ty, out),
            Type::DATE => self
                .to_timestamp()
                .ok_or_else(|| mismatch(self, ty))?
                .date()
                .to_sql(ty, out),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// One result row, converted to [`SqlValue`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbRow(pub Vec<SqlValue>);

impl DbRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, idx: usize) -> &SqlValue {
        self.0.get(idx).unwrap_or(&SqlValue::Null)
    }

    pub fn text(&self, idx: usize) -> Option<&str> {
        self.get(idx).as_str()
    }

    pub fn int(&self, idx: usize) -> Option<i64> {
        self.get(idx).as_i64()
    }

    pub fn bool(&self, idx: usize) -> Option<bool> {
        self.get(idx).as_bool()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert a driver row, column by column.
    pub fn from_pg(row: &Row) -> Result<Self, tokio_postgres::Error> {
        let mut values = Vec::with_capacity(row.len());
        for (idx, col) in row.columns().iter().enumerate() {
            let value: SqlValue = match *col.type_() {
                Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.into(),
                Type::INT2 => row
                    .try_get::<_, Option<i16>>(idx)?
                    .map(i64::from)
                    .into(),
                Type::INT4 => row
                    .try_get::<_, Option<i32>>(idx)?
                    .map(i64::from)
                    .into(),
                Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.into(),
                Type::FLOAT4 => row
                    .try_get::<_, Option<f32>>(idx)?
                    .map(f64::from)
                    .into(),
                Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.into(),
                Type::NUMERIC => {
                    use rust_decimal::prelude::ToPrimitive;
                    row.try_get::<_, Option<Decimal>>(idx)?
                        .and_then(|d| d.to_f64())
                        .into()
                }
                Type::TIMESTAMP => row
                    .try_get::<_, Option<NaiveDateTime>>(idx)?
                    .map(SqlValue::Timestamp)
                    .unwrap_or(SqlValue::Null),
                // catalog queries cast everything else to text
                _ => row.try_get::<_, Option<String>>(idx)?.into(),
            };
            values.push(value);
        }
        Ok(Self(values))
    }
}
