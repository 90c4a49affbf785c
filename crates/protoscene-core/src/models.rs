//! Shared typed models used by the node graph, templates, and the loader.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Node identity
// ---------------------------------------------------------------------------

/// Index of a node in its scene's [`NodeArena`](crate::graph::arena::NodeArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Field types and values
// ---------------------------------------------------------------------------

/// Closed set of value types a field or event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    SFBool,
    SFColor,
    SFFloat,
    SFInt32,
    SFNode,
    SFRotation,
    SFString,
    SFTime,
    SFVec2f,
    SFVec3f,
    MFColor,
    MFFloat,
    MFInt32,
    MFNode,
    MFRotation,
    MFString,
    MFVec2f,
    MFVec3f,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::SFBool => "SFBool",
            FieldType::SFColor => "SFColor",
            FieldType::SFFloat => "SFFloat",
            FieldType::SFInt32 => "SFInt32",
            FieldType::SFNode => "SFNode",
            FieldType::SFRotation => "SFRotation",
            FieldType::SFString => "SFString",
            FieldType::SFTime => "SFTime",
            FieldType::SFVec2f => "SFVec2f",
            FieldType::SFVec3f => "SFVec3f",
            FieldType::MFColor => "MFColor",
            FieldType::MFFloat => "MFFloat",
            FieldType::MFInt32 => "MFInt32",
            FieldType::MFNode => "MFNode",
            FieldType::MFRotation => "MFRotation",
            FieldType::MFString => "MFString",
            FieldType::MFVec2f => "MFVec2f",
            FieldType::MFVec3f => "MFVec3f",
        }
    }

    pub fn is_node(self) -> bool {
        matches!(self, FieldType::SFNode | FieldType::MFNode)
    }
}

/// An owned field value.
///
/// Node-valued variants hold arena indices, never the nodes themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    SFBool(bool),
    SFColor([f32; 3]),
    SFFloat(f32),
    SFInt32(i32),
    SFNode(Option<NodeId>),
    SFRotation([f32; 4]),
    SFString(String),
    SFTime(f64),
    SFVec2f([f32; 2]),
    SFVec3f([f32; 3]),
    MFColor(Vec<[f32; 3]>),
    MFFloat(Vec<f32>),
    MFInt32(Vec<i32>),
    MFNode(Vec<NodeId>),
    MFRotation(Vec<[f32; 4]>),
    MFString(Vec<String>),
    MFVec2f(Vec<[f32; 2]>),
    MFVec3f(Vec<[f32; 3]>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::SFBool(_) => FieldType::SFBool,
            FieldValue::SFColor(_) => FieldType::SFColor,
            FieldValue::SFFloat(_) => FieldType::SFFloat,
            FieldValue::SFInt32(_) => FieldType::SFInt32,
            FieldValue::SFNode(_) => FieldType::SFNode,
            FieldValue::SFRotation(_) => FieldType::SFRotation,
            FieldValue::SFString(_) => FieldType::SFString,
            FieldValue::SFTime(_) => FieldType::SFTime,
            FieldValue::SFVec2f(_) => FieldType::SFVec2f,
            FieldValue::SFVec3f(_) => FieldType::SFVec3f,
            FieldValue::MFColor(_) => FieldType::MFColor,
            FieldValue::MFFloat(_) => FieldType::MFFloat,
            FieldValue::MFInt32(_) => FieldType::MFInt32,
            FieldValue::MFNode(_) => FieldType::MFNode,
            FieldValue::MFRotation(_) => FieldType::MFRotation,
            FieldValue::MFString(_) => FieldType::MFString,
            FieldValue::MFVec2f(_) => FieldType::MFVec2f,
            FieldValue::MFVec3f(_) => FieldType::MFVec3f,
        }
    }

    /// Nodes referenced by this value, in order.
    pub fn node_refs(&self) -> Vec<NodeId> {
        match self {
            FieldValue::SFNode(Some(id)) => vec![*id],
            FieldValue::MFNode(ids) => ids.clone(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every node reference through `map`.
    pub fn map_nodes(&mut self, map: impl Fn(NodeId) -> NodeId) {
        match self {
            FieldValue::SFNode(Some(id)) => *id = map(*id),
            FieldValue::MFNode(ids) => {
                for id in ids.iter_mut() {
                    *id = map(*id);
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Template interface
// ---------------------------------------------------------------------------

/// Which list of a template's interface a member belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Field,
    EventIn,
    EventOut,
}

/// One `(implementation node, implementation field)` pair bound to an
/// interface member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsMapEntry {
    pub node: NodeId,
    pub field: String,
}

impl IsMapEntry {
    pub fn new(node: NodeId, field: impl Into<String>) -> Self {
        Self {
            node,
            field: field.into(),
        }
    }
}

/// A public field, eventIn, or eventOut of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceRecord {
    pub name: String,
    pub kind: InterfaceKind,
    pub value_type: FieldType,
    /// Only fields carry a default.
    pub default_value: Option<FieldValue>,
    /// IS mappings, in declaration order.
    pub is_map: Vec<IsMapEntry>,
}

impl InterfaceRecord {
    pub fn new(name: impl Into<String>, kind: InterfaceKind, value_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            value_type,
            default_value: None,
            is_map: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bounding volumes
// ---------------------------------------------------------------------------

/// Bounding sphere supplied by the node catalog for built-in nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    pub center: [f32; 3],
    pub radius: f32,
}

impl BoundingVolume {
    pub fn new(center: [f32; 3], radius: f32) -> Self {
        Self { center, radius }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_of_value() {
        assert_eq!(FieldValue::SFFloat(1.0).field_type(), FieldType::SFFloat);
        assert_eq!(FieldValue::MFNode(vec![]).field_type(), FieldType::MFNode);
        assert!(FieldType::SFNode.is_node());
        assert!(!FieldType::SFVec3f.is_node());
        assert_eq!(FieldType::MFString.name(), "MFString");
    }

    #[test]
    fn test_node_refs() {
        assert_eq!(
            FieldValue::SFNode(Some(NodeId(4))).node_refs(),
            vec![NodeId(4)]
        );
        assert!(FieldValue::SFNode(None).node_refs().is_empty());
        assert_eq!(
            FieldValue::MFNode(vec![NodeId(1), NodeId(2)]).node_refs(),
            vec![NodeId(1), NodeId(2)]
        );
        assert!(FieldValue::SFBool(true).node_refs().is_empty());
    }

    #[test]
    fn test_map_nodes() {
        let mut value = FieldValue::MFNode(vec![NodeId(1), NodeId(2)]);
        value.map_nodes(|id| NodeId(id.0 + 10));
        assert_eq!(value, FieldValue::MFNode(vec![NodeId(11), NodeId(12)]));

        let mut scalar = FieldValue::SFInt32(3);
        scalar.map_nodes(|_| NodeId(99));
        assert_eq!(scalar, FieldValue::SFInt32(3));
    }

    #[test]
    fn test_value_json_shape() {
        let value: FieldValue =
            serde_json::from_str(r#"{"type": "SFVec3f", "value": [1.0, 2.0, 3.0]}"#).unwrap();
        assert_eq!(value, FieldValue::SFVec3f([1.0, 2.0, 3.0]));

        let node: FieldValue = serde_json::from_str(r#"{"type": "SFNode", "value": null}"#).unwrap();
        assert_eq!(node, FieldValue::SFNode(None));
    }
}
