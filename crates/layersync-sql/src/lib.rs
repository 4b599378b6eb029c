//! SQL building blocks for layersync.
//!
//! Identifiers pass through [`sanitize`] before they are ever embedded in a
//! statement, values are always bound as `$n` parameters, and statements are
//! built as a small typed AST that renders with automatic parameter numbering.

mod expr;
pub use expr::*;

mod render;
pub use render::*;

mod sanitize;
pub use sanitize::*;

mod stmt;
pub use stmt::*;

/// Result of rendering SQL.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    /// The SQL string with $1, $2, etc. placeholders.
    pub sql: String,

    /// Parameter names in order (maps to $1, $2, etc.).
    pub params: Vec<ParamName>,
}

macro_rules! sanitized_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Build a name, stripping every forbidden character.
            pub fn new(raw: impl AsRef<str>) -> Self {
                Self(sanitize(raw.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::new(raw)
            }
        }

        impl From<&String> for $name {
            fn from(raw: &String) -> Self {
                Self::new(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

sanitized_name! {
    /// The name of a table, view or table alias. Always sanitized.
    TableName
}

sanitized_name! {
    /// The name of a column or column alias. Always sanitized.
    ColumnName
}

/// The name of a query parameter.
///
/// Parameter names never reach the SQL text (they render as `$n`), so they
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamName(String);

impl ParamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParamName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ParamName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
/// Used where Postgres cannot bind a parameter, such as `COMMENT ON` and
/// column `DEFAULT` clauses.
///
/// # Example
/// ```
/// use layersync_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display sanitizes the value, then quotes it with double quotes.
///
/// # Example
/// ```
/// use layersync_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("drop;table")), "\"droptable\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The sanitizer already strips `"`, so no doubling is needed.
        write!(f, "\"{}\"", sanitize(self.0.as_ref()))
    }
}

const PG_IDENT_MAX: usize = 63;

/// Generate a collision-free index name for a table.
///
/// Uses the convention `{table}_{random}_idx`. The table part is truncated
/// so the whole name stays within Postgres' 63-byte identifier limit.
pub fn unique_index_name(table: &str) -> String {
    let table = sanitize(table);
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    let overhead = "__idx".len() + suffix.len();
    let max_table_len = PG_IDENT_MAX.saturating_sub(overhead);

    let table_part = if table.len() <= max_table_len {
        table.as_str()
    } else {
        // avoid splitting UTF-8
        let mut len = max_table_len;
        while len > 0 && !table.is_char_boundary(len) {
            len -= 1;
        }
        &table[..len]
    };

    format!("{}_{}_idx", table_part, suffix)
}
