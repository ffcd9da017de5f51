//! Retained scene-graph backend.
//!
//! Flattens each record into draw primitives in drawing coordinates and keeps
//! them keyed by node id.  Whatever presents the scene (a canvas, a window)
//! reads [`SceneSink::nodes`]; this module never touches pixels.

use std::collections::BTreeMap;

use log::{trace, warn};

use crate::geometry::{Feature, Geometry, GeometryKind, GeometryRecord, Position, Transform};
use crate::style::Style;

use super::RenderSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// One drawable element.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Dot(Position),
    Path(Vec<Position>),
    /// Rings of one polygon: exterior first, holes after.  Rings are closed.
    Area(Vec<Vec<Position>>),
    Label { at: Position, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub kind: GeometryKind,
    pub topic: String,
    pub style: Style,
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Default)]
pub struct SceneSink {
    next: u64,
    transform: Transform,
    nodes: BTreeMap<NodeId, SceneNode>,
}

impl SceneSink {
    pub fn new(transform: Transform) -> Self {
        SceneSink { next: 0, transform, nodes: BTreeMap::new() }
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &SceneNode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn build(&self, record: &GeometryRecord, t: &Transform) -> SceneNode {
        let mut primitives = Vec::new();
        flatten(&record.geometry, t, &mut primitives);
        SceneNode {
            kind: record.kind(),
            topic: record.topic.clone(),
            style: record.style,
            primitives,
        }
    }
}

impl RenderSink for SceneSink {
    type Handle = NodeId;

    fn add(&mut self, kind: GeometryKind, record: &GeometryRecord) -> NodeId {
        self.next += 1;
        let id = NodeId(self.next);
        let node = self.build(record, &self.transform);
        trace!("scene: add {kind} node {} for {} ({} primitives)", id.0, record.topic, node.primitives.len());
        self.nodes.insert(id, node);
        id
    }

    fn remove(&mut self, handle: NodeId) {
        if self.nodes.remove(&handle).is_none() {
            warn!("scene: remove of unknown node {}", handle.0);
        }
    }

    fn redraw(&mut self, handle: &NodeId, record: &GeometryRecord, transform: &Transform) {
        self.transform = *transform;
        let node = self.build(record, transform);
        if let Some(slot) = self.nodes.get_mut(handle) {
            *slot = node;
        }
    }
}

fn project(ps: &[Position], t: &Transform) -> Vec<Position> {
    ps.iter().map(|p| t.apply(*p)).collect()
}

fn area(rings: &[Vec<Position>], t: &Transform) -> Primitive {
    Primitive::Area(
        rings
            .iter()
            .map(|r| {
                let mut ring = project(r, t);
                crate::geometry::close_ring(&mut ring);
                ring
            })
            .collect(),
    )
}

fn flatten(g: &Geometry, t: &Transform, out: &mut Vec<Primitive>) {
    match g {
        Geometry::Point(p)              => out.push(Primitive::Dot(t.apply(*p))),
        Geometry::MultiPoint(ps)        => out.extend(ps.iter().map(|p| Primitive::Dot(t.apply(*p)))),
        Geometry::LineString(ps)        => out.push(Primitive::Path(project(ps, t))),
        Geometry::MultiLineString(ls)   => out.extend(ls.iter().map(|l| Primitive::Path(project(l, t)))),
        Geometry::Polygon(rings)        => out.push(area(rings, t)),
        Geometry::MultiPolygon(polys)   => out.extend(polys.iter().map(|p| area(p, t))),
        Geometry::GeometryCollection(gs) => gs.iter().for_each(|g| flatten(g, t, out)),
        Geometry::Feature(f)            => flatten_feature(f, t, out),
        Geometry::FeatureCollection(fs) => fs.iter().for_each(|f| flatten_feature(f, t, out)),
    }
}

fn flatten_feature(f: &Feature, t: &Transform, out: &mut Vec<Primitive>) {
    let Some(g) = &f.geometry else { return };
    flatten(g, t, out);
    if let (Some(text), Geometry::Point(p)) = (f.properties.get("label").and_then(|v| v.as_str()), g) {
        out.push(Primitive::Label { at: t.apply(*p), text: text.to_string() });
    }
}
