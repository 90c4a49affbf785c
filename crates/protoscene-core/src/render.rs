//! The boundary to a rendering backend.
//!
//! Template instances only need group bookkeeping from a viewer: open a
//! group, close it, reuse a cached one, or drop a stale one. Drawing of
//! built-in nodes is left to the backend through [`Viewer::draw_node`].

use crate::graph::node::Node;
use crate::models::{BoundingVolume, NodeId};

/// Opaque handle to an object the viewer has built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

/// Per-frame render settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderContext {
    pub frame: u64,
    pub draw_bounding_volumes: bool,
}

pub trait Viewer {
    /// Start recording a group and return the handle it will be known by.
    fn begin_group(&mut self, label: &str) -> ObjectHandle;

    fn end_group(&mut self);

    /// Reuse a previously built object instead of rebuilding it.
    fn insert_reference(&mut self, handle: ObjectHandle);

    fn remove_object(&mut self, handle: ObjectHandle);

    fn draw_node(&mut self, _id: NodeId, _node: &Node, _context: &RenderContext) {}

    fn draw_bounding_volume(&mut self, _volume: BoundingVolume) {}
}

/// One call received by a [`RecordingViewer`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerOp {
    BeginGroup { label: String, handle: ObjectHandle },
    EndGroup,
    InsertReference(ObjectHandle),
    RemoveObject(ObjectHandle),
    DrawNode(NodeId),
    DrawBoundingVolume(BoundingVolume),
}

/// Viewer that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingViewer {
    ops: Vec<ViewerOp>,
    next_handle: u64,
}

impl RecordingViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[ViewerOp] {
        &self.ops
    }

    /// Drain the recorded calls, e.g. between frames.
    pub fn take_ops(&mut self) -> Vec<ViewerOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn groups_begun(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, ViewerOp::BeginGroup { .. }))
            .count()
    }
}

impl Viewer for RecordingViewer {
    fn begin_group(&mut self, label: &str) -> ObjectHandle {
        self.next_handle += 1;
        let handle = ObjectHandle(self.next_handle);
        self.ops.push(ViewerOp::BeginGroup {
            label: label.to_string(),
            handle,
        });
        handle
    }

    fn end_group(&mut self) {
        self.ops.push(ViewerOp::EndGroup);
    }

    fn insert_reference(&mut self, handle: ObjectHandle) {
        self.ops.push(ViewerOp::InsertReference(handle));
    }

    fn remove_object(&mut self, handle: ObjectHandle) {
        self.ops.push(ViewerOp::RemoveObject(handle));
    }

    fn draw_node(&mut self, id: NodeId, _node: &Node, _context: &RenderContext) {
        self.ops.push(ViewerOp::DrawNode(id));
    }

    fn draw_bounding_volume(&mut self, volume: BoundingVolume) {
        self.ops.push(ViewerOp::DrawBoundingVolume(volume));
    }
}
