//! Spatial columns: how a table's geometry column is written from row
//! data, and reprojection of raw coordinates.

use layersync_schema::{ColumnAlias, GeometryColumnInfo, GeometryKind, parse_alias_comment};
use layersync_sql::Expr;

use crate::connection::{BoxFuture, Connection};
use crate::introspect::{self, LiveColumn};
use crate::value::SqlValue;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct GeometryOptions {
    /// Row columns carrying the x and y of a point
    pub point_columns: Option<(String, String)>,
    /// EPSG code of incoming coordinates
    pub source_epsg: i32,
    /// EPSG code stored in the database; defaults to the column's SRID
    pub database_epsg: Option<i32>,
}

impl Default for GeometryOptions {
    fn default() -> Self {
        Self {
            point_columns: None,
            source_epsg: 4326,
            database_epsg: None,
        }
    }
}

/// `ST_SetSRID(ST_MakePoint(x, y), srid)`, reprojected when the database
/// stores another reference system.
pub fn point_fragment(x: &str, y: &str, source_epsg: i32, database_epsg: i32) -> Expr {
    let point = Expr::call(
        "ST_SetSRID",
        vec![
            Expr::call("ST_MakePoint", vec![Expr::param(x), Expr::param(y)]),
            Expr::int(source_epsg.into()),
        ],
    );
    if source_epsg == database_epsg {
        point
    } else {
        Expr::call("ST_Transform", vec![point, Expr::int(database_epsg.into())])
    }
}

/// Header-to-column aliases of a live table.
pub fn column_aliases(live: &[LiveColumn]) -> ColumnAlias {
    let mut aliases = ColumnAlias::new();
    for column in live {
        aliases.add_column(&column.name);
        if let Some(alias) = column.comment.as_deref().and_then(parse_alias_comment) {
            aliases.insert(alias, &column.name);
        }
    }
    aliases
}

/// Work out how `table`'s geometry column is filled from rows with the
/// given column names.
///
/// Returns no geometry info when the table has no spatial column. Only
/// point columns can be written; they take their coordinates from the
/// declared point columns, which must appear in `column_names`.
pub async fn resolve_geometry_columns(
    conn: &dyn Connection,
    table: &str,
    column_names: &[String],
    options: &GeometryOptions,
) -> Result<(Option<GeometryColumnInfo>, ColumnAlias)> {
    let live = introspect::live_columns(conn, table).await?;
    let aliases = column_aliases(&live);

    let Some(spatial) = live.iter().find(|c| c.data_type == "geometry") else {
        return Ok((None, aliases));
    };

    let registered = introspect::geometry_column(conn, table, &spatial.name).await?;
    let (raw, kind, srid) = registered.unwrap_or_else(|| ("GEOMETRY".to_string(), None, None));

    if kind != Some(GeometryKind::Point) {
        return Err(Error::UnsupportedGeometry(format!(
            "{table}.{} has spatial type {raw}; only points can be loaded",
            spatial.name
        )));
    }

    let Some((x, y)) = &options.point_columns else {
        return Err(Error::UnsupportedGeometry(format!(
            "{table}.{} is a point column but no coordinate columns were given",
            spatial.name
        )));
    };
    let find = |wanted: &str| {
        column_names
            .iter()
            .find(|c| c.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| {
                Error::UnsupportedGeometry(format!(
                    "coordinate column {wanted} is not among the row columns"
                ))
            })
    };
    let (x, y) = (find(x)?, find(y)?);

    let database_epsg = options
        .database_epsg
        .or(srid)
        .unwrap_or(options.source_epsg);
    let fragment = point_fragment(&x, &y, options.source_epsg, database_epsg);

    tracing::debug!(
        table,
        column = %spatial.name,
        source_epsg = options.source_epsg,
        database_epsg,
        "resolved point geometry"
    );

    Ok((
        Some(GeometryColumnInfo {
            column: spatial.name.clone(),
            kind: GeometryKind::Point,
            fragment,
            source_columns: vec![x, y],
        }),
        aliases,
    ))
}

/// Something that can reproject flat `[x0, y0, x1, y1, ..]` coordinates.
pub trait CoordinateTransform: Send + Sync {
    fn transform<'a>(
        &'a self,
        from_epsg: i32,
        to_epsg: i32,
        pairs: &'a [f64],
    ) -> BoxFuture<'a, Result<Vec<f64>>>;
}

/// Reprojects through PostGIS' `ST_Transform`.
pub struct PostgisTransformer<'c> {
    conn: &'c dyn Connection,
}

impl<'c> PostgisTransformer<'c> {
    pub fn new(conn: &'c dyn Connection) -> Self {
        Self { conn }
    }
}

const TRANSFORM_SQL: &str = "\
SELECT ST_X(p), ST_Y(p) FROM (
    SELECT ST_Transform(ST_SetSRID(ST_MakePoint($1::float8, $2::float8), $3::int), $4::int) AS p
) projected";

impl CoordinateTransform for PostgisTransformer<'_> {
    fn transform<'a>(
        &'a self,
        from_epsg: i32,
        to_epsg: i32,
        pairs: &'a [f64],
    ) -> BoxFuture<'a, Result<Vec<f64>>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(pairs.len());
            for pair in pairs.chunks_exact(2) {
                let params = [
                    SqlValue::Float(pair[0]),
                    SqlValue::Float(pair[1]),
                    SqlValue::Int(from_epsg.into()),
                    SqlValue::Int(to_epsg.into()),
                ];
                let row = self
                    .conn
                    .fetch_one(TRANSFORM_SQL, &params)
                    .await?
                    .ok_or_else(|| Error::InvalidInput("ST_Transform returned no row".into()))?;
                let x = row.get(0).as_f64();
                let y = row.get(1).as_f64();
                match (x, y) {
                    (Some(x), Some(y)) => out.extend([x, y]),
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "cannot reproject ({}, {}) from {from_epsg} to {to_epsg}",
                            pair[0], pair[1]
                        )));
                    }
                }
            }
            Ok(out)
        })
    }
}

/// Reproject flat x/y pairs from `from_epsg` to `to_epsg`.
pub async fn transform_coordinates(
    from_epsg: i32,
    to_epsg: i32,
    pairs: &[f64],
    transformer: Option<&dyn CoordinateTransform>,
) -> Result<Vec<f64>> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(Error::InvalidInput(format!(
            "expected a non-empty list of x/y pairs, got {} values",
            pairs.len()
        )));
    }
    if from_epsg == to_epsg {
        return Ok(pairs.to_vec());
    }
    let transformer = transformer.ok_or_else(|| {
        Error::MissingCapability(format!(
            "no coordinate transform available for EPSG:{from_epsg} -> EPSG:{to_epsg}"
        ))
    })?;
    transformer.transform(from_epsg, to_epsg, pairs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{COLUMNS_SQL, GEOMETRY_COLUMN_SQL};
    use crate::testing::{MockConnection, column_row};
    use crate::value::DbRow;
    use layersync_sql::{InsertStmt, render};
    use proptest::prelude::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn commented(mut row: DbRow, comment: &str) -> DbRow {
        row.0[10] = comment.into();
        row
    }

    fn sites() -> MockConnection {
        let conn = MockConnection::new();
        conn.on(
            COLUMNS_SQL,
            vec![
                column_row("uaid", "character varying", Some(40), false, true),
                commented(
                    column_row("site_name", "character varying", Some(80), true, false),
                    "ALIAS:[Site Name]",
                ),
                column_row("geom", "geometry", None, true, false),
            ],
        );
        conn
    }

    fn options() -> GeometryOptions {
        GeometryOptions {
            point_columns: Some(("lon".into(), "lat".into())),
            ..GeometryOptions::default()
        }
    }

    #[tokio::test]
    async fn point_column_with_transform() {
        let conn = sites();
        conn.on(
            GEOMETRY_COLUMN_SQL,
            vec![DbRow::new(vec!["POINT".into(), SqlValue::Int(3857)])],
        );

        let (info, aliases) = resolve_geometry_columns(
            &conn,
            "sites",
            &names(&["UAID", "Site Name", "Lon", "Lat"]),
            &options(),
        )
        .await
        .unwrap();

        let info = info.unwrap();
        assert_eq!(info.column, "geom");
        assert_eq!(info.source_columns, names(&["Lon", "Lat"]));
        assert!(info.is_source("lon"));

        let stmt = InsertStmt::new("sites").column(&info.column, info.fragment.clone());
        insta::assert_snapshot!(render(&stmt).sql, @r#"
        INSERT INTO "sites" ("geom")
        VALUES (ST_Transform(ST_SetSRID(ST_MakePoint($1, $2), 4326), 3857))
        "#);

        assert_eq!(aliases.resolve("site name"), "site_name");
        assert_eq!(aliases.resolve("UAID"), "uaid");
    }

    #[tokio::test]
    async fn same_reference_system_needs_no_transform() {
        let conn = sites();
        conn.on(
            GEOMETRY_COLUMN_SQL,
            vec![DbRow::new(vec!["POINT".into(), SqlValue::Int(4326)])],
        );
        let (info, _) =
            resolve_geometry_columns(&conn, "sites", &names(&["lon", "lat"]), &options())
                .await
                .unwrap();
        let stmt = InsertStmt::new("sites").column("geom", info.unwrap().fragment);
        insta::assert_snapshot!(render(&stmt).sql, @r#"
        INSERT INTO "sites" ("geom")
        VALUES (ST_SetSRID(ST_MakePoint($1, $2), 4326))
        "#);
    }

    #[tokio::test]
    async fn missing_coordinate_columns_are_unsupported() {
        let conn = sites();
        conn.on(
            GEOMETRY_COLUMN_SQL,
            vec![DbRow::new(vec!["POINT".into(), SqlValue::Int(4326)])],
        );
        let err = resolve_geometry_columns(&conn, "sites", &names(&["lon"]), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedGeometry(_)));

        let err = resolve_geometry_columns(
            &conn,
            "sites",
            &names(&["lon", "lat"]),
            &GeometryOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedGeometry(_)));
    }

    #[tokio::test]
    async fn polygon_columns_are_unsupported() {
        let conn = sites();
        conn.on(
            GEOMETRY_COLUMN_SQL,
            vec![DbRow::new(vec!["POLYGON".into(), SqlValue::Int(4326)])],
        );
        let err = resolve_geometry_columns(&conn, "sites", &names(&["lon", "lat"]), &options())
            .await
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"unsupported geometry: sites.geom has spatial type POLYGON; only points can be loaded");
    }

    #[tokio::test]
    async fn tables_without_geometry() {
        let conn = MockConnection::new();
        conn.on(
            COLUMNS_SQL,
            vec![column_row("code", "character", Some(1), false, true)],
        );
        let (info, aliases) = resolve_geometry_columns(&conn, "Status", &[], &options())
            .await
            .unwrap();
        assert!(info.is_none());
        assert!(aliases.is_empty());
    }

    struct Shift;

    impl CoordinateTransform for Shift {
        fn transform<'a>(
            &'a self,
            _from: i32,
            _to: i32,
            pairs: &'a [f64],
        ) -> BoxFuture<'a, Result<Vec<f64>>> {
            Box::pin(async move { Ok(pairs.iter().map(|v| v + 1.0).collect()) })
        }
    }

    #[tokio::test]
    async fn transform_checks_input_then_capability() {
        let err = transform_coordinates(4326, 3857, &[1.0, 2.0, 3.0], Some(&Shift))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = transform_coordinates(4326, 4326, &[], None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = transform_coordinates(4326, 3857, &[1.0, 2.0], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCapability(_)));

        let moved = transform_coordinates(4326, 3857, &[1.0, 2.0], Some(&Shift))
            .await
            .unwrap();
        assert_eq!(moved, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn postgis_transformer_queries_each_pair() {
        let conn = MockConnection::new();
        conn.on(
            "ST_Transform",
            vec![DbRow::new(vec![SqlValue::Float(10.0), SqlValue::Float(20.0)])],
        );
        let transformer = PostgisTransformer::new(&conn);
        let out = transform_coordinates(4326, 3857, &[1.0, 2.0, 3.0, 4.0], Some(&transformer))
            .await
            .unwrap();
        assert_eq!(out, vec![10.0, 20.0, 10.0, 20.0]);
        assert_eq!(conn.statements().len(), 2);
        assert_eq!(conn.statements()[1].params[0], SqlValue::Float(3.0));
    }

    proptest! {
        #[test]
        fn identity_transform_returns_input(
            pairs in prop::collection::vec(-1.0e6f64..1.0e6, 1..20)
                .prop_map(|mut v| { if v.len() % 2 == 1 { v.pop(); } v })
                .prop_filter("non-empty", |v| !v.is_empty()),
            epsg in 1i32..100_000,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let out = rt.block_on(transform_coordinates(epsg, epsg, &pairs, None)).unwrap();
            prop_assert_eq!(out, pairs);
        }
    }
}
