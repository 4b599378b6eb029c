//! Deciding whether a live table already matches its declared [`TableSpec`].

use layersync_schema::{ColumnSpec, SqlType, TableSpec, TypeFamily};

use crate::Result;
use crate::connection::Connection;
use crate::introspect::{self, LiveColumn, LiveIndex};

/// Why one live column differs from its declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    NotInSpec,
    Type { expected: String, found: String },
    Nullable { expected: bool },
    Primary { expected: bool },
    AutoIncrement { expected: bool },
    Default { expected: String, found: Option<String> },
}

/// Compare one live column against its declared counterpart.
///
/// Attributes left undeclared are not checked.
pub fn compare_column(spec: &ColumnSpec, live: &LiveColumn) -> Option<Mismatch> {
    let wanted = spec.sql_type();
    if !same_type_and_size(&wanted, live) {
        return Some(Mismatch::Type {
            expected: wanted.to_string(),
            found: describe_live_type(live),
        });
    }

    if let Some(expected) = spec.nullable.filter(|&n| n != live.nullable) {
        return Some(Mismatch::Nullable { expected });
    }
    if let Some(expected) = spec.is_primary.filter(|&p| p != live.is_primary) {
        return Some(Mismatch::Primary { expected });
    }
    if let Some(expected) = spec.auto_increment.filter(|&a| a != live.auto_increment()) {
        return Some(Mismatch::AutoIncrement { expected });
    }
    if let Some(default) = &spec.default {
        let found = live.default.as_deref().map(normalize_default);
        if !found
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case(default))
        {
            return Some(Mismatch::Default {
                expected: default.clone(),
                found,
            });
        }
    }
    None
}

fn same_type_and_size(wanted: &SqlType, live: &LiveColumn) -> bool {
    if !wanted.base.eq_ignore_ascii_case(&live.data_type) {
        return false;
    }
    match wanted.family() {
        TypeFamily::Character | TypeFamily::Binary => match wanted.length() {
            Some(len) => live.char_max_length == Some(len),
            None => true,
        },
        TypeFamily::Decimal => {
            let scale = wanted.scale().or(wanted.length().map(|_| 0));
            live.numeric_precision == wanted.length() && live.numeric_scale == scale
        }
        TypeFamily::Bit => live.char_max_length == wanted.length(),
        TypeFamily::Other => true,
    }
}

fn describe_live_type(live: &LiveColumn) -> String {
    match (live.char_max_length, live.numeric_precision, live.numeric_scale) {
        (Some(len), _, _) => format!("{}({len})", live.data_type),
        (None, Some(p), Some(s)) if live.sql_type().family() == TypeFamily::Decimal => {
            format!("{}({p},{s})", live.data_type)
        }
        _ => live.data_type.clone(),
    }
}

/// Strip the `::type` cast and quoting Postgres adds to stored defaults.
///
/// `'abc'::character varying` becomes `abc`, `42` stays `42`.
pub fn normalize_default(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    let bare = match raw.find("::") {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    bare.trim_matches(|c| c == '(' || c == ')').to_string()
}

/// True iff every live column matches its declared column and every declared
/// column was found.
pub fn columns_match(spec: &TableSpec, live: &[LiveColumn]) -> bool {
    let mut matched = 0;
    for column in live {
        let Some(wanted) = spec.column(&column.name) else {
            tracing::info!(table = %spec.name, column = %column.name, "live column is not declared");
            return false;
        };
        if let Some(mismatch) = compare_column(wanted, column) {
            tracing::info!(table = %spec.name, column = %column.name, ?mismatch, "column differs");
            return false;
        }
        matched += 1;
    }

    if matched != spec.columns.len() {
        tracing::info!(
            table = %spec.name,
            live = matched,
            expected = spec.columns.len(),
            "table is missing columns"
        );
        return false;
    }
    true
}

/// Introspect `spec.name` and compare it against `spec`.
pub async fn table_matches(conn: &dyn Connection, spec: &TableSpec) -> Result<bool> {
    let live = introspect::live_columns(conn, &spec.name).await?;
    Ok(columns_match(spec, &live))
}

/// First index whose columns are a superset of `columns` (order-insensitive).
pub fn find_matching_index<'a>(indexes: &'a [LiveIndex], columns: &[String]) -> Option<&'a LiveIndex> {
    if columns.is_empty() {
        return None;
    }
    indexes.iter().find(|index| {
        columns
            .iter()
            .all(|wanted| index.columns.iter().any(|c| c.eq_ignore_ascii_case(wanted)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TableSpec {
        TableSpec::new(
            "sites",
            vec![
                ColumnSpec::new("id", "char(36)").primary(true).nullable(false),
                ColumnSpec::new("name", "varchar(80)"),
                ColumnSpec::new("kind", "varchar").default_value("unknown"),
                ColumnSpec::new("cost", "numeric(10,2)"),
                ColumnSpec::new("seen", "timestamp"),
            ],
        )
        .unwrap()
    }

    fn live() -> Vec<LiveColumn> {
        let mut id = LiveColumn::new("id", "character");
        id.char_max_length = Some(36);
        id.nullable = false;
        id.is_primary = true;

        let mut name = LiveColumn::new("name", "character varying");
        name.char_max_length = Some(80);

        let mut kind = LiveColumn::new("kind", "character varying");
        kind.char_max_length = Some(255);
        kind.default = Some("'unknown'::character varying".into());

        let mut cost = LiveColumn::new("cost", "numeric");
        cost.numeric_precision = Some(10);
        cost.numeric_scale = Some(2);

        let seen = LiveColumn::new("seen", "timestamp without time zone");

        vec![id, name, kind, cost, seen]
    }

    #[test]
    fn identical_table_matches() {
        assert!(columns_match(&spec(), &live()));
    }

    #[test]
    fn undeclared_length_accepts_any() {
        let mut cols = live();
        cols[2].char_max_length = Some(12);
        assert!(columns_match(&spec(), &cols));
    }

    #[test]
    fn each_declared_attribute_flips_the_verdict() {
        let mut cols = live();
        cols[1].char_max_length = Some(81);
        assert!(!columns_match(&spec(), &cols));

        let mut cols = live();
        cols[0].nullable = true;
        assert!(!columns_match(&spec(), &cols));

        let mut cols = live();
        cols[0].is_primary = false;
        assert!(!columns_match(&spec(), &cols));

        let mut cols = live();
        cols[2].default = Some("'other'::character varying".into());
        assert!(!columns_match(&spec(), &cols));

        let mut cols = live();
        cols[4].data_type = "date".into();
        assert!(!columns_match(&spec(), &cols));

        let mut cols = live();
        cols[3].numeric_scale = Some(3);
        assert!(!columns_match(&spec(), &cols));
    }

    #[test]
    fn undeclared_nullability_is_ignored() {
        let mut cols = live();
        cols[1].nullable = false;
        assert!(columns_match(&spec(), &cols));
    }

    #[test]
    fn extra_live_or_spec_columns_mismatch() {
        let mut cols = live();
        cols.push(LiveColumn::new("extra", "text"));
        assert!(!columns_match(&spec(), &cols));

        let mut cols = live();
        cols.pop();
        assert!(!columns_match(&spec(), &cols));
    }

    #[test]
    fn column_names_compare_case_insensitively() {
        let mut cols = live();
        cols[1].name = "NAME".into();
        assert!(columns_match(&spec(), &cols));
    }

    #[test]
    fn auto_increment_from_identity_or_sequence() {
        let spec = TableSpec::new(
            "t",
            vec![ColumnSpec::new("id", "integer").auto_increment(true)],
        )
        .unwrap();

        let mut ident = LiveColumn::new("id", "integer");
        ident.is_identity = true;
        assert!(columns_match(&spec, std::slice::from_ref(&ident)));

        let mut serial = LiveColumn::new("id", "int4");
        serial.default = Some("nextval('t_id_seq'::regclass)".into());
        assert!(columns_match(&spec, &[serial]));

        assert!(!columns_match(&spec, &[LiveColumn::new("id", "integer")]));
    }

    #[test]
    fn mismatch_reports_types() {
        let mut cols = live();
        cols[1].char_max_length = Some(20);
        let found = compare_column(spec().column("name").unwrap(), &cols[1]);
        assert_eq!(
            found,
            Some(Mismatch::Type {
                expected: "character varying(80)".into(),
                found: "character varying(20)".into(),
            })
        );
    }

    #[test]
    fn defaults_normalize() {
        assert_eq!(normalize_default("'abc'::character varying"), "abc");
        assert_eq!(normalize_default("'it''s'::text"), "it's");
        assert_eq!(normalize_default("42"), "42");
        assert_eq!(normalize_default("'(-1)'::integer"), "(-1)");
        assert_eq!(normalize_default("(-1)"), "-1");
        assert_eq!(normalize_default("0::smallint"), "0");
    }

    #[test]
    fn matching_index_uses_subset_semantics() {
        let indexes = vec![
            LiveIndex {
                name: "sites_pkey".into(),
                columns: vec!["id".into()],
                primary: true,
                unique: true,
            },
            LiveIndex {
                name: "sites_name_kind".into(),
                columns: vec!["name".into(), "kind".into()],
                primary: false,
                unique: false,
            },
        ];

        let found = find_matching_index(&indexes, &["kind".into()]);
        assert_eq!(found.map(|i| i.name.as_str()), Some("sites_name_kind"));

        let found = find_matching_index(&indexes, &["KIND".into(), "name".into()]);
        assert_eq!(found.map(|i| i.name.as_str()), Some("sites_name_kind"));

        assert!(find_matching_index(&indexes, &["cost".into()]).is_none());
        assert!(find_matching_index(&indexes, &["id".into(), "name".into()]).is_none());
        assert!(find_matching_index(&indexes, &[]).is_none());
    }
}
