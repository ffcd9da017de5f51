//! Render sink contract.
//!
//! The history store drives a backend through three calls.  Handles are
//! opaque to the core; a backend picks whatever identifies its own objects.

pub mod scene;

use crate::geometry::{GeometryKind, GeometryRecord, Transform};

pub trait RenderSink {
    type Handle;

    /// Create the visual object for `record` and return its handle.
    fn add(&mut self, kind: GeometryKind, record: &GeometryRecord) -> Self::Handle;

    /// Destroy a visual object.  Every handle is removed exactly once.
    fn remove(&mut self, handle: Self::Handle);

    /// Re-project an existing object through a new transform.
    fn redraw(&mut self, handle: &Self::Handle, record: &GeometryRecord, transform: &Transform);
}
