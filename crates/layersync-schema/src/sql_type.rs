//! Parsing and normalising Postgres type names.

use std::fmt;

/// Comparison family of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    /// char, varchar, text
    Character,
    /// bytea
    Binary,
    /// numeric/decimal
    Decimal,
    /// bit, bit varying
    Bit,
    /// everything else
    Other,
}

/// A type name split into its canonical base and size arguments.
///
/// `varchar(40)` and `character varying(40)` parse to the same value, and
/// the base names match what `information_schema.columns.data_type` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType {
    /// Canonical lowercase base name, e.g. `character varying`
    pub base: String,
    /// Raw arguments inside the parentheses, trimmed
    pub args: Vec<String>,
}

impl SqlType {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (base, args) = match raw.find('(') {
            Some(open) => {
                let inner = raw[open + 1..].trim_end();
                let inner = inner.strip_suffix(')').unwrap_or(inner);
                let args = inner
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                (&raw[..open], args)
            }
            None => (raw, Vec::new()),
        };

        Self {
            base: canonical_base(base),
            args,
        }
    }

    pub fn family(&self) -> TypeFamily {
        match self.base.as_str() {
            "character varying" | "character" | "text" => TypeFamily::Character,
            "bytea" => TypeFamily::Binary,
            "numeric" => TypeFamily::Decimal,
            "bit" | "bit varying" => TypeFamily::Bit,
            _ => TypeFamily::Other,
        }
    }

    /// First size argument (length or precision), if numeric.
    pub fn length(&self) -> Option<i32> {
        self.args.first().and_then(|a| a.parse().ok())
    }

    /// Second size argument (scale), if numeric.
    pub fn scale(&self) -> Option<i32> {
        self.args.get(1).and_then(|a| a.parse().ok())
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(","))?;
        }
        Ok(())
    }
}

/// Map any spelling of a base type name to the catalog's spelling.
pub fn canonical_base(base: &str) -> String {
    let lower = base.trim().to_ascii_lowercase();
    let lower = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    let canonical = match lower.as_str() {
        "varchar" | "character varying" => "character varying",
        "char" | "bpchar" | "character" => "character",
        "int" | "int4" | "integer" => "integer",
        "int2" | "smallint" => "smallint",
        "int8" | "bigint" => "bigint",
        "float8" | "double" | "double precision" => "double precision",
        "float4" | "real" => "real",
        "decimal" | "numeric" => "numeric",
        "bool" | "boolean" => "boolean",
        "timestamp" | "timestamp without time zone" => "timestamp without time zone",
        "timestamptz" | "timestamp with time zone" => "timestamp with time zone",
        "varbit" | "bit varying" => "bit varying",
        other => return other.to_string(),
    };
    canonical.to_string()
}
