//! Real-time geometry visualization client.
//!
//! Receives topic-tagged geometry over a WebSocket, normalizes the legacy and
//! GeoJSON vocabularies into one model, and keeps a bounded, time-decaying
//! history per (kind, topic) drawn through a [`render::RenderSink`].

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod geometry;
pub mod history;
pub mod normalize;
pub mod render;
pub mod style;
pub mod subscription;
pub mod transport;

pub use client::{Client, ClientHandle, Control, TopicStats};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use geometry::{Geometry, GeometryKind, GeometryRecord, Transform};
pub use render::RenderSink;
pub use transport::{Command, ConnectionState};
