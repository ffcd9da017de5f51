//! GeoJSON-shaped payloads → [`Geometry`].

use serde_json::{Map, Value};

use crate::geometry::{Feature, Geometry, GeometryKind, Position, Properties};

use super::NormalizeError;

type Result<T> = std::result::Result<T, NormalizeError>;

/// Parse a standalone GeoJSON object, discriminated by its `type` member.
pub fn parse_geojson(v: &Value) -> Result<Geometry> {
    let obj = v
        .as_object()
        .ok_or_else(|| NormalizeError::malformed("geojson payload is not an object"))?;
    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::malformed("geojson payload has no `type`"))?;
    let kind = ty.parse::<GeometryKind>().map_err(NormalizeError::Unsupported)?;
    parse_members(kind, obj)
}

/// Parse the members of `obj` as a geometry of the given kind.  The kind comes
/// from the caller (a `data_type` discriminator or the object's own `type`).
pub fn parse_members(kind: GeometryKind, obj: &Map<String, Value>) -> Result<Geometry> {
    match kind {
        GeometryKind::Point              => Ok(Geometry::Point(position(coordinates(obj)?)?)),
        GeometryKind::MultiPoint         => Ok(Geometry::MultiPoint(positions(coordinates(obj)?)?)),
        GeometryKind::LineString         => Ok(Geometry::LineString(line(coordinates(obj)?)?)),
        GeometryKind::MultiLineString    => Ok(Geometry::MultiLineString(
            array(coordinates(obj)?, "MultiLineString coordinates")?
                .iter()
                .map(line)
                .collect::<Result<_>>()?,
        )),
        GeometryKind::Polygon            => Ok(Geometry::Polygon(polygon(coordinates(obj)?)?)),
        GeometryKind::MultiPolygon       => Ok(Geometry::MultiPolygon(
            array(coordinates(obj)?, "MultiPolygon coordinates")?
                .iter()
                .map(polygon)
                .collect::<Result<_>>()?,
        )),
        GeometryKind::GeometryCollection => {
            let members = obj
                .get("geometries")
                .ok_or_else(|| NormalizeError::malformed("GeometryCollection without `geometries`"))?;
            Ok(Geometry::GeometryCollection(
                array(members, "geometries")?.iter().map(parse_geojson).collect::<Result<_>>()?,
            ))
        }
        GeometryKind::Feature            => Ok(Geometry::Feature(Box::new(feature(obj)?))),
        GeometryKind::FeatureCollection  => {
            let members = obj
                .get("features")
                .ok_or_else(|| NormalizeError::malformed("FeatureCollection without `features`"))?;
            let features = array(members, "features")?
                .iter()
                .map(|f| {
                    f.as_object()
                        .ok_or_else(|| NormalizeError::malformed("feature is not an object"))
                        .and_then(feature)
                })
                .collect::<Result<_>>()?;
            Ok(Geometry::FeatureCollection(features))
        }
    }
}

fn feature(obj: &Map<String, Value>) -> Result<Feature> {
    let geometry = match obj.get("geometry") {
        None | Some(Value::Null) => None,
        Some(g) => Some(parse_geojson(g)?),
    };
    Ok(Feature {
        id: obj.get("id").cloned(),
        geometry,
        properties: properties_of(obj),
    })
}

/// The `properties` member of a GeoJSON object, or an empty map.
pub fn properties_of(obj: &Map<String, Value>) -> Properties {
    match obj.get("properties") {
        Some(Value::Object(p)) => p.clone(),
        _ => Properties::new(),
    }
}

fn coordinates(obj: &Map<String, Value>) -> Result<&Value> {
    obj.get("coordinates")
        .ok_or_else(|| NormalizeError::malformed("geometry has no `coordinates`"))
}

fn array<'a>(v: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    v.as_array()
        .ok_or_else(|| NormalizeError::malformed(format!("{what} is not an array")))
}

fn position(v: &Value) -> Result<Position> {
    let coords = array(v, "position")?;
    match (coords.first().and_then(Value::as_f64), coords.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => Ok(Position::new(x, y)),
        _ => Err(NormalizeError::malformed("position needs two numeric ordinates")),
    }
}

fn positions(v: &Value) -> Result<Vec<Position>> {
    array(v, "coordinates")?.iter().map(position).collect()
}

fn line(v: &Value) -> Result<Vec<Position>> {
    let pts = positions(v)?;
    if pts.len() < 2 {
        return Err(NormalizeError::malformed(format!("line needs at least 2 points, got {}", pts.len())));
    }
    Ok(pts)
}

fn polygon(v: &Value) -> Result<Vec<Vec<Position>>> {
    let rings = array(v, "polygon rings")?
        .iter()
        .map(|r| {
            let ring = positions(r)?;
            if ring.len() < 3 {
                return Err(NormalizeError::malformed(format!(
                    "polygon ring needs at least 3 points, got {}",
                    ring.len()
                )));
            }
            Ok(ring)
        })
        .collect::<Result<Vec<_>>>()?;
    if rings.is_empty() {
        return Err(NormalizeError::malformed("polygon has no rings"));
    }
    Ok(rings)
}
