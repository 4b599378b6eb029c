//! Where rows come from.
//!
//! A [`RowSource`] yields rows sharing one list of column names. The
//! reconciler does not care whether they came from a feature query dump,
//! a workbook, or a test fixture.

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use crate::geometry::{CoordinateTransform, transform_coordinates};
use crate::translate::esri::SpatialReference;
use crate::value::SqlValue;
use crate::{Error, Result};

mod workbook;
pub use workbook::{
    SchemaSheetLayout, SheetLayout, Workbook, WorkbookSource, cell_value, read_schema_sheet,
};

/// A stream of rows with a fixed column list.
pub trait RowSource {
    /// Column names, in the order values are yielded.
    fn columns(&self) -> &[String];

    /// The next row, or `None` when exhausted.
    fn next_row(&mut self) -> Option<Vec<SqlValue>>;
}

/// Rows held in memory.
pub struct MemorySource {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<SqlValue>>,
}

impl MemorySource {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }
}

impl RowSource for MemorySource {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<Vec<SqlValue>> {
        self.rows.next()
    }
}

/// An ESRI feature query result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    #[serde(default)]
    pub fields: Vec<FeatureField>,
    pub spatial_reference: Option<SpatialReference>,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureField {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: IndexMap<String, serde_json::Value>,
    pub geometry: Option<PointGeometry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointGeometry {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub spatial_reference: Option<SpatialReference>,
}

#[derive(Debug, Clone)]
pub struct FeatureSetOptions {
    /// Columns that receive the point's x and y
    pub point_columns: Option<(String, String)>,
    /// EPSG code the coordinates are declared in
    pub epsg: i32,
}

impl Default for FeatureSetOptions {
    fn default() -> Self {
        Self {
            point_columns: None,
            epsg: 4326,
        }
    }
}

/// Rows read from a [`FeatureSet`].
pub struct FeatureSetSource {
    inner: MemorySource,
}

impl FeatureSetSource {
    /// Parse a feature query result.
    pub async fn from_json(
        text: &str,
        options: &FeatureSetOptions,
        transformer: Option<&dyn CoordinateTransform>,
    ) -> Result<Self> {
        let set: FeatureSet = serde_json::from_str(text)?;
        Self::from_feature_set(set, options, transformer).await
    }

    /// Flatten features into rows.
    ///
    /// Point geometry lands in the configured coordinate columns. Features
    /// whose spatial reference differs from the declared EPSG code are
    /// reprojected first.
    pub async fn from_feature_set(
        set: FeatureSet,
        options: &FeatureSetOptions,
        transformer: Option<&dyn CoordinateTransform>,
    ) -> Result<Self> {
        let mut columns: IndexSet<String> = set.fields.iter().map(|f| f.name.clone()).collect();
        if columns.is_empty() {
            for feature in &set.features {
                columns.extend(feature.attributes.keys().cloned());
            }
        }
        if let Some((x, y)) = &options.point_columns {
            columns.insert(x.clone());
            columns.insert(y.clone());
        }

        let set_epsg = set.spatial_reference.as_ref().and_then(SpatialReference::epsg);
        let points = reprojected_points(&set.features, set_epsg, options.epsg, transformer).await?;

        let rows = set
            .features
            .iter()
            .zip(points)
            .map(|(feature, point)| {
                columns
                    .iter()
                    .map(|name| {
                        if let (Some((x, y)), Some((px, py))) = (&options.point_columns, point) {
                            if name == x {
                                return SqlValue::Float(px);
                            }
                            if name == y {
                                return SqlValue::Float(py);
                            }
                        }
                        feature
                            .attributes
                            .get(name)
                            .map(SqlValue::from)
                            .unwrap_or(SqlValue::Null)
                    })
                    .collect()
            })
            .collect();

        tracing::debug!(
            columns = columns.len(),
            features = set.features.len(),
            "read feature set"
        );
        Ok(Self {
            inner: MemorySource::new(columns.into_iter().collect(), rows),
        })
    }
}

impl RowSource for FeatureSetSource {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> Option<Vec<SqlValue>> {
        self.inner.next_row()
    }
}

/// Each feature's point in `target_epsg`, grouped by source reference so
/// every group is reprojected in one call.
async fn reprojected_points(
    features: &[Feature],
    set_epsg: Option<i32>,
    target_epsg: i32,
    transformer: Option<&dyn CoordinateTransform>,
) -> Result<Vec<Option<(f64, f64)>>> {
    let mut points = vec![None; features.len()];
    let mut groups: IndexMap<i32, Vec<usize>> = IndexMap::new();

    for (i, feature) in features.iter().enumerate() {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let (Some(x), Some(y)) = (geometry.x, geometry.y) else {
            continue;
        };
        points[i] = Some((x, y));
        let epsg = geometry
            .spatial_reference
            .as_ref()
            .and_then(SpatialReference::epsg)
            .or(set_epsg)
            .unwrap_or(target_epsg);
        groups.entry(epsg).or_default().push(i);
    }

    for (epsg, members) in groups {
        if epsg == target_epsg {
            continue;
        }
        let flat: Vec<f64> = members
            .iter()
            .filter_map(|&i| points[i])
            .flat_map(|(x, y)| [x, y])
            .collect();
        let projected = transform_coordinates(epsg, target_epsg, &flat, transformer).await?;
        if projected.len() != flat.len() {
            return Err(Error::InvalidInput(format!(
                "reprojection from EPSG:{epsg} returned {} values for {}",
                projected.len(),
                flat.len()
            )));
        }
        tracing::debug!(from = epsg, to = target_epsg, points = members.len(), "reprojected points");
        for (&i, pair) in members.iter().zip(projected.chunks_exact(2)) {
            points[i] = Some((pair[0], pair[1]));
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BoxFuture;

    /// Shifts every coordinate by the target EPSG code, so tests can see
    /// which points went through it.
    struct Offset;

    impl CoordinateTransform for Offset {
        fn transform<'a>(
            &'a self,
            _from_epsg: i32,
            to_epsg: i32,
            pairs: &'a [f64],
        ) -> BoxFuture<'a, Result<Vec<f64>>> {
            Box::pin(async move { Ok(pairs.iter().map(|v| v + f64::from(to_epsg)).collect()) })
        }
    }

    fn drain(mut source: impl RowSource) -> (Vec<String>, Vec<Vec<SqlValue>>) {
        let columns = source.columns().to_vec();
        let mut rows = Vec::new();
        while let Some(row) = source.next_row() {
            rows.push(row);
        }
        (columns, rows)
    }

    fn points() -> FeatureSetOptions {
        FeatureSetOptions {
            point_columns: Some(("lon".into(), "lat".into())),
            epsg: 4326,
        }
    }

    const SITES: &str = r#"{
        "fields": [{"name": "UAID"}, {"name": "Name"}, {"name": "Visits"}],
        "spatialReference": {"wkid": 4326},
        "features": [
            {"attributes": {"UAID": "A1", "Name": "North", "Visits": 3},
             "geometry": {"x": -70.5, "y": 42.25}},
            {"attributes": {"UAID": "A2", "Name": null},
             "geometry": null}
        ]
    }"#;

    #[tokio::test]
    async fn features_become_rows_with_point_columns() {
        let source = FeatureSetSource::from_json(SITES, &points(), None)
            .await
            .unwrap();
        let (columns, rows) = drain(source);
        assert_eq!(columns, ["UAID", "Name", "Visits", "lon", "lat"]);
        assert_eq!(
            rows[0],
            vec![
                SqlValue::Text("A1".into()),
                SqlValue::Text("North".into()),
                SqlValue::Int(3),
                SqlValue::Float(-70.5),
                SqlValue::Float(42.25),
            ]
        );
        assert_eq!(
            rows[1],
            vec![
                SqlValue::Text("A2".into()),
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Null,
            ]
        );
    }

    #[tokio::test]
    async fn columns_fall_back_to_attribute_keys() {
        let text = r#"{"features": [
            {"attributes": {"a": 1}},
            {"attributes": {"b": "x", "a": 2}}
        ]}"#;
        let source = FeatureSetSource::from_json(text, &FeatureSetOptions::default(), None)
            .await
            .unwrap();
        let (columns, rows) = drain(source);
        assert_eq!(columns, ["a", "b"]);
        assert_eq!(rows[0], vec![SqlValue::Int(1), SqlValue::Null]);
        assert_eq!(rows[1], vec![SqlValue::Int(2), SqlValue::Text("x".into())]);
    }

    #[tokio::test]
    async fn foreign_references_are_reprojected() {
        let text = r#"{
            "spatialReference": {"wkid": 102100},
            "features": [
                {"attributes": {"id": 1}, "geometry": {"x": 1.0, "y": 2.0}},
                {"attributes": {"id": 2},
                 "geometry": {"x": 5.0, "y": 6.0, "spatialReference": {"wkid": 4326}}}
            ]
        }"#;
        let source = FeatureSetSource::from_json(text, &points(), Some(&Offset))
            .await
            .unwrap();
        let (_, rows) = drain(source);
        assert_eq!(rows[0][1..], [SqlValue::Float(4327.0), SqlValue::Float(4328.0)]);
        assert_eq!(rows[1][1..], [SqlValue::Float(5.0), SqlValue::Float(6.0)]);
    }

    #[tokio::test]
    async fn reprojection_without_transformer_fails() {
        let text = r#"{
            "spatialReference": {"wkid": 3857},
            "features": [{"attributes": {}, "geometry": {"x": 1.0, "y": 2.0}}]
        }"#;
        let err = FeatureSetSource::from_json(text, &points(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingCapability(_)), "{err}");
    }

    #[tokio::test]
    async fn malformed_json_is_a_json_error() {
        let err = FeatureSetSource::from_json("{", &points(), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 12);
    }
}
