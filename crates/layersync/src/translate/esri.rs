//! ESRI "Layer JSON" model.

use layersync_schema::GeometryKind;
use serde::Deserialize;

/// A layer/table description document (`layers` and/or `tables`).
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    pub layers: Option<Vec<Layer>>,
    pub tables: Option<Vec<Layer>>,
}

impl SchemaDocument {
    /// Layers first, then tables, in document order.
    pub fn entities(&self) -> impl Iterator<Item = &Layer> {
        self.layers
            .iter()
            .flatten()
            .chain(self.tables.iter().flatten())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub fields: Option<Vec<Field>>,
    pub unique_id_field: Option<UniqueIdField>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    pub geometry_type: Option<String>,
    pub extent: Option<Extent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniqueIdField {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub alias: Option<String>,
    pub nullable: Option<bool>,
    pub default_value: Option<serde_json::Value>,
    pub length: Option<u32>,
    pub domain: Option<Domain>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    #[serde(rename = "type")]
    pub domain_type: String,
    pub name: String,
    #[serde(default)]
    pub coded_values: Vec<CodedValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodedValue {
    pub name: String,
    pub code: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub fields: String,
    #[serde(default = "default_true")]
    pub is_ascending: bool,
    #[serde(default)]
    pub is_unique: bool,
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: i64,
    pub name: Option<String>,
    pub role: String,
    pub related_table_id: i64,
    pub key_field: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extent {
    pub spatial_reference: Option<SpatialReference>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialReference {
    pub wkid: Option<i32>,
    pub latest_wkid: Option<i32>,
}

impl SpatialReference {
    /// The EPSG code this reference denotes, normalising ESRI's
    /// Web Mercator aliases.
    pub fn epsg(&self) -> Option<i32> {
        match self.latest_wkid.or(self.wkid)? {
            102100 | 102113 | 900913 => Some(3857),
            code => Some(code),
        }
    }
}

/// Relationship side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipRole {
    Origin,
    Destination,
}

impl RelationshipRole {
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "esriRelRoleOrigin" => Some(Self::Origin),
            "esriRelRoleDestination" => Some(Self::Destination),
            _ => None,
        }
    }
}

/// ESRI field types the translator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsriFieldType {
    Oid,
    GlobalId,
    Guid,
    Integer,
    SmallInteger,
    Double,
    Single,
    String,
    Date,
    /// The shape field; its subtype comes from the layer's `geometryType`
    GeometryField,
    /// An `esriGeometry*` type; `None` for the null geometry
    Geometry(Option<GeometryKind>),
}

impl EsriFieldType {
    /// Parse a field type name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let parsed = match name {
            "esriFieldTypeOID" => Self::Oid,
            "esriFieldTypeGlobalID" => Self::GlobalId,
            "esriFieldTypeGUID" => Self::Guid,
            "esriFieldTypeInteger" => Self::Integer,
            "esriFieldTypeSmallInteger" => Self::SmallInteger,
            "esriFieldTypeDouble" => Self::Double,
            "esriFieldTypeSingle" => Self::Single,
            "esriFieldTypeString" => Self::String,
            "esriFieldTypeDate" => Self::Date,
            "esriFieldTypeGeometry" => Self::GeometryField,
            other => Self::Geometry(geometry_kind(other)?),
        };
        Some(parsed)
    }

    pub fn is_identifier(self) -> bool {
        matches!(self, Self::Oid | Self::GlobalId | Self::Guid)
    }
}

/// Map an `esriGeometry*` name to a spatial subtype.
///
/// Returns `None` for names that are not geometry types at all,
/// `Some(None)` for the null geometry, and falls back to the generic
/// geometry for unrecognised subtypes.
pub fn geometry_kind(name: &str) -> Option<Option<GeometryKind>> {
    let subtype = name.strip_prefix("esriGeometry")?;
    let kind = match subtype {
        "Null" => return Some(None),
        "Point" => GeometryKind::Point,
        "Multipoint" => GeometryKind::MultiPoint,
        "Polyline" => GeometryKind::LineString,
        "Polygon" => GeometryKind::Polygon,
        _ => GeometryKind::Geometry,
    };
    Some(Some(kind))
}
