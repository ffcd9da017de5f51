//! Canonical geometry model.
//!
//! Every inbound payload, legacy or GeoJSON-shaped, ends up as one
//! [`GeometryRecord`] holding a [`Geometry`] of one of the nine canonical kinds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::style::Style;

/// Free-form key/value properties carried alongside a geometry.
pub type Properties = Map<String, Value>;

/// Topics are opaque strings; equality is the only relation.
pub type Topic = String;

/// A 2-D coordinate.  Extra ordinates on the wire (altitude) are discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }
}

/// The nine canonical kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
    Feature,
    FeatureCollection,
}

impl GeometryKind {
    pub const ALL: [GeometryKind; 9] = [
        GeometryKind::Point,
        GeometryKind::MultiPoint,
        GeometryKind::LineString,
        GeometryKind::MultiLineString,
        GeometryKind::Polygon,
        GeometryKind::MultiPolygon,
        GeometryKind::GeometryCollection,
        GeometryKind::Feature,
        GeometryKind::FeatureCollection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GeometryKind::Point              => "Point",
            GeometryKind::MultiPoint         => "MultiPoint",
            GeometryKind::LineString         => "LineString",
            GeometryKind::MultiLineString    => "MultiLineString",
            GeometryKind::Polygon            => "Polygon",
            GeometryKind::MultiPolygon       => "MultiPolygon",
            GeometryKind::GeometryCollection => "GeometryCollection",
            GeometryKind::Feature            => "Feature",
            GeometryKind::FeatureCollection  => "FeatureCollection",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GeometryKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown geometry kind: {s}"))
    }
}

/// A GeoJSON feature: geometry plus properties and an optional id.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    /// Exterior ring first, holes after.
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
    GeometryCollection(Vec<Geometry>),
    Feature(Box<Feature>),
    FeatureCollection(Vec<Feature>),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_)              => GeometryKind::Point,
            Geometry::MultiPoint(_)         => GeometryKind::MultiPoint,
            Geometry::LineString(_)         => GeometryKind::LineString,
            Geometry::MultiLineString(_)    => GeometryKind::MultiLineString,
            Geometry::Polygon(_)            => GeometryKind::Polygon,
            Geometry::MultiPolygon(_)       => GeometryKind::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryKind::GeometryCollection,
            Geometry::Feature(_)            => GeometryKind::Feature,
            Geometry::FeatureCollection(_)  => GeometryKind::FeatureCollection,
        }
    }
}

/// Close a ring in place by repeating its first position when needed.
pub fn close_ring(ring: &mut Vec<Position>) {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last()) {
        if first != *last {
            ring.push(first);
        }
    }
}

/// Monotonic identity of a record within one history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A normalized geometry as retained by the history store.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    pub topic: Topic,
    pub geometry: Geometry,
    pub properties: Properties,
    /// Resolved draw style; an inline `color` property overrides the tables.
    pub style: Style,
    pub received_at: DateTime<Utc>,
}

impl GeometryRecord {
    pub fn kind(&self) -> GeometryKind {
        self.geometry.kind()
    }
}

/// Affine mapping from payload coordinates to drawing coordinates:
/// uniform scale followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform { scale: 1.0, offset_x: 0.0, offset_y: 0.0 };

    pub fn apply(&self, p: Position) -> Position {
        Position::new(p.x * self.scale + self.offset_x, p.y * self.scale + self.offset_y)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}
