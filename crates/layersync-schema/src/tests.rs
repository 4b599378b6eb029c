use super::*;

#[test]
fn test_sql_type_normalises_spellings() {
    assert_eq!(SqlType::parse("varchar(40)"), SqlType::parse("character varying(40)"));
    assert_eq!(SqlType::parse("CHAR(36)").base, "character");
    assert_eq!(SqlType::parse("bpchar").base, "character");
    assert_eq!(SqlType::parse("int4").base, "integer");
    assert_eq!(SqlType::parse("timestamp").base, "timestamp without time zone");
    assert_eq!(SqlType::parse("double  precision").base, "double precision");
}

#[test]
fn test_sql_type_sizes() {
    let t = SqlType::parse("numeric(10, 2)");
    assert_eq!(t.family(), TypeFamily::Decimal);
    assert_eq!(t.length(), Some(10));
    assert_eq!(t.scale(), Some(2));
    assert_eq!(t.to_string(), "numeric(10,2)");

    let g = SqlType::parse("geometry(Point,4326)");
    assert_eq!(g.base, "geometry");
    assert_eq!(g.family(), TypeFamily::Other);
    assert_eq!(g.length(), None);

    assert_eq!(SqlType::parse("text").family(), TypeFamily::Character);
    assert_eq!(SqlType::parse("bytea").family(), TypeFamily::Binary);
    assert_eq!(SqlType::parse("varbit(3)").family(), TypeFamily::Bit);
}

#[test]
fn test_table_rejects_duplicate_columns() {
    let err = TableSpec::new(
        "sites",
        vec![
            ColumnSpec::new("Name", "text"),
            ColumnSpec::new("name", "text"),
        ],
    )
    .unwrap_err();
    assert_eq!(
        err,
        SpecError::DuplicateColumn {
            table: "sites".into(),
            column: "name".into()
        }
    );
}

#[test]
fn test_table_rejects_two_primary_keys() {
    let err = TableSpec::new(
        "sites",
        vec![
            ColumnSpec::new("a", "integer").primary(true),
            ColumnSpec::new("b", "integer").primary(false),
            ColumnSpec::new("c", "integer").primary(true),
        ],
    )
    .unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"table sites declares more than one primary key (a, c)");
}

#[test]
fn test_table_lookups() {
    let table = TableSpec::new(
        "sites",
        vec![
            ColumnSpec::new("id", "char(36)").primary(true),
            ColumnSpec::new("status", "varchar(1)")
                .references(ForeignKeyRef::new("sites", "status", "Status", "code").with_display("name")),
            ColumnSpec::new("geom", "geometry(Point,4326)").spatial(4326),
        ],
    )
    .unwrap();

    assert_eq!(table.primary_key().map(|c| c.name.as_str()), Some("id"));
    assert_eq!(table.column("STATUS").map(|c| c.name.as_str()), Some("status"));
    assert_eq!(table.foreign_keys().count(), 1);
    assert_eq!(table.foreign_keys().next().unwrap().view_column(), "name");
    assert_eq!(table.spatial_columns().count(), 1);
    assert_eq!(table.view_name(), "sites_view");
}

#[test]
fn test_geometry_kind() {
    assert_eq!(GeometryKind::parse("point"), Some(GeometryKind::Point));
    assert_eq!(GeometryKind::parse("MULTIPOLYGON"), Some(GeometryKind::MultiPolygon));
    assert_eq!(GeometryKind::parse("circle"), None);
    assert_eq!(GeometryKind::Point.column_type(3857), "geometry(Point,3857)");
    assert_eq!(GeometryKind::Geometry.column_type(4326), "geometry");
}

#[test]
fn test_alias_comments() {
    assert_eq!(parse_alias_comment("ALIAS:[Site Name]"), Some("Site Name"));
    assert_eq!(parse_alias_comment(&alias_comment("Lat")), Some("Lat"));
    assert_eq!(parse_alias_comment("just a comment"), None);
    assert_eq!(parse_alias_comment("ALIAS:[unterminated"), None);
}

#[test]
fn test_column_alias_resolution() {
    let mut aliases = ColumnAlias::new();
    aliases.insert("Site Name", "site_name");
    aliases.add_column("site_name");
    aliases.add_column("UAID");

    assert_eq!(aliases.resolve("site name"), "site_name");
    assert_eq!(aliases.resolve("uaid"), "UAID");
    assert_eq!(aliases.resolve("other"), "other");
    assert_eq!(aliases.alias_for("SITE NAME"), Some("site_name"));
    assert_eq!(aliases.len(), 1);
}
