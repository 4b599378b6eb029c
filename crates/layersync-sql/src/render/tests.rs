use crate::*;

fn point(x: &str, y: &str) -> Expr {
    Expr::call(
        "ST_SetSRID",
        vec![
            Expr::call("ST_MakePoint", vec![Expr::param(x), Expr::param(y)]),
            Expr::int(4326),
        ],
    )
}

#[test]
fn test_count_where() {
    let stmt = SelectStmt::new()
        .column(SelectColumn::expr(Expr::CountAll))
        .from(FromClause::table("sites"))
        .where_(Expr::column("uaid").eq(Expr::param("uaid")));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql.as_str(), @r#"
    SELECT COUNT(1)
    FROM "sites"
    WHERE "uaid" = $1
    "#);
    assert_eq!(result.params, vec![ParamName::from("uaid")]);
}

#[test]
fn test_insert_with_fragment_reuses_params() {
    let stmt = InsertStmt::new("sites")
        .column("name", Expr::param("name"))
        .column("lon", Expr::param("lon"))
        .column("lat", Expr::param("lat"))
        .column("geom", point("lon", "lat"));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql.as_str(), @r#"
    INSERT INTO "sites" ("name", "lon", "lat", "geom")
    VALUES ($1, $2, $3, ST_SetSRID(ST_MakePoint($2, $3), 4326))
    "#);
    assert_eq!(result.params.len(), 3);
}

#[test]
fn test_update_binds_key_last() {
    let stmt = UpdateStmt::new("sites")
        .set("name", Expr::param("name"))
        .set("kind", Expr::param("kind"))
        .where_(Expr::column("uaid").eq(Expr::param("uaid")));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql.as_str(), @r#"
    UPDATE "sites"
    SET "name" = $1, "kind" = $2
    WHERE "uaid" = $3
    "#);
    assert_eq!(result.params.last().map(|p| p.as_str()), Some("uaid"));
}

#[test]
fn test_null_safe_match() {
    let filter = Expr::all([
        Expr::column("a").not_distinct_from(Expr::param("a")),
        Expr::column("geom").eq(point("x", "y")),
    ]);
    let stmt = SelectStmt::new()
        .column(SelectColumn::expr(Expr::CountAll))
        .from(FromClause::table("t"));
    let stmt = match filter {
        Some(filter) => stmt.where_(filter),
        None => stmt,
    };

    insta::assert_snapshot!(render(&stmt).sql, @r#"
    SELECT COUNT(1)
    FROM "t"
    WHERE "a" IS NOT DISTINCT FROM $1 AND "geom" = ST_SetSRID(ST_MakePoint($2, $3), 4326)
    "#);
}

#[test]
fn test_create_view_left_join() {
    let query = SelectStmt::new()
        .columns([
            SelectColumn::aliased(Expr::qualified_column("t", "id"), "id"),
            SelectColumn::aliased(Expr::qualified_column("j1", "name"), "status"),
        ])
        .from(FromClause::aliased("sites", "t"))
        .join(Join::left(
            "Status",
            "j1",
            Expr::qualified_column("t", "status").eq(Expr::qualified_column("j1", "code")),
        ));

    insta::assert_snapshot!(render(&CreateViewStmt::new("sites_view", query)).sql, @r#"
    CREATE VIEW "sites_view" AS
    SELECT "t"."id" AS "id", "j1"."name" AS "status"
    FROM "sites" "t"
    LEFT JOIN "Status" "j1" ON "t"."status" = "j1"."code"
    "#);
}

#[test]
fn test_identifiers_are_scrubbed() {
    let stmt = InsertStmt::new("sites\"; DROP TABLE x; --").column("a(b)", Expr::param("a(b)"));
    insta::assert_snapshot!(render(&stmt).sql, @r#"
    INSERT INTO "sites DROP TABLE x --" ("ab")
    VALUES ($1)
    "#);
}
