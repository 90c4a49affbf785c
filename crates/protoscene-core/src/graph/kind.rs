//! The closed catalog of built-in node kinds and the capability answer
//! returned for a node or template instance.

use crate::models::NodeId;

/// Built-in node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Anchor,
    Appearance,
    AudioClip,
    Background,
    Billboard,
    Box,
    Collision,
    Color,
    ColorInterpolator,
    Cone,
    Coordinate,
    CoordinateInterpolator,
    Cylinder,
    CylinderSensor,
    DirectionalLight,
    ElevationGrid,
    Extrusion,
    Fog,
    FontStyle,
    Group,
    ImageTexture,
    IndexedFaceSet,
    IndexedLineSet,
    Inline,
    Lod,
    Material,
    MovieTexture,
    NavigationInfo,
    Normal,
    NormalInterpolator,
    OrientationInterpolator,
    PixelTexture,
    PlaneSensor,
    PointLight,
    PointSet,
    PositionInterpolator,
    ProximitySensor,
    ScalarInterpolator,
    Script,
    Shape,
    Sound,
    Sphere,
    SphereSensor,
    SpotLight,
    Switch,
    Text,
    TextureCoordinate,
    TextureTransform,
    TimeSensor,
    TouchSensor,
    Transform,
    Viewpoint,
    VisibilitySensor,
    WorldInfo,
}

/// Coarse grouping used where callers care about "what sort of node" rather
/// than the exact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Grouping,
    Geometry,
    GeometricProperty,
    Appearance,
    Texture,
    Light,
    Sensor,
    Interpolator,
    Bindable,
    Leaf,
}

const ALL_KINDS: &[NodeKind] = &[
    NodeKind::Anchor,
    NodeKind::Appearance,
    NodeKind::AudioClip,
    NodeKind::Background,
    NodeKind::Billboard,
    NodeKind::Box,
    NodeKind::Collision,
    NodeKind::Color,
    NodeKind::ColorInterpolator,
    NodeKind::Cone,
    NodeKind::Coordinate,
    NodeKind::CoordinateInterpolator,
    NodeKind::Cylinder,
    NodeKind::CylinderSensor,
    NodeKind::DirectionalLight,
    NodeKind::ElevationGrid,
    NodeKind::Extrusion,
    NodeKind::Fog,
    NodeKind::FontStyle,
    NodeKind::Group,
    NodeKind::ImageTexture,
    NodeKind::IndexedFaceSet,
    NodeKind::IndexedLineSet,
    NodeKind::Inline,
    NodeKind::Lod,
    NodeKind::Material,
    NodeKind::MovieTexture,
    NodeKind::NavigationInfo,
    NodeKind::Normal,
    NodeKind::NormalInterpolator,
    NodeKind::OrientationInterpolator,
    NodeKind::PixelTexture,
    NodeKind::PlaneSensor,
    NodeKind::PointLight,
    NodeKind::PointSet,
    NodeKind::PositionInterpolator,
    NodeKind::ProximitySensor,
    NodeKind::ScalarInterpolator,
    NodeKind::Script,
    NodeKind::Shape,
    NodeKind::Sound,
    NodeKind::Sphere,
    NodeKind::SphereSensor,
    NodeKind::SpotLight,
    NodeKind::Switch,
    NodeKind::Text,
    NodeKind::TextureCoordinate,
    NodeKind::TextureTransform,
    NodeKind::TimeSensor,
    NodeKind::TouchSensor,
    NodeKind::Transform,
    NodeKind::Viewpoint,
    NodeKind::VisibilitySensor,
    NodeKind::WorldInfo,
];

impl NodeKind {
    /// Every built-in kind, in catalog order.
    pub fn all() -> &'static [NodeKind] {
        ALL_KINDS
    }

    /// Look up a kind by its document type name (`"Box"`, `"LOD"`, ...).
    pub fn from_type_name(name: &str) -> Option<NodeKind> {
        ALL_KINDS
            .iter()
            .copied()
            .find(|kind| kind.type_name() == name)
    }

    pub fn type_name(self) -> &'static str {
        match self {
            NodeKind::Anchor => "Anchor",
            NodeKind::Appearance => "Appearance",
            NodeKind::AudioClip => "AudioClip",
            NodeKind::Background => "Background",
            NodeKind::Billboard => "Billboard",
            NodeKind::Box => "Box",
            NodeKind::Collision => "Collision",
            NodeKind::Color => "Color",
            NodeKind::ColorInterpolator => "ColorInterpolator",
            NodeKind::Cone => "Cone",
            NodeKind::Coordinate => "Coordinate",
            NodeKind::CoordinateInterpolator => "CoordinateInterpolator",
            NodeKind::Cylinder => "Cylinder",
            NodeKind::CylinderSensor => "CylinderSensor",
            NodeKind::DirectionalLight => "DirectionalLight",
            NodeKind::ElevationGrid => "ElevationGrid",
            NodeKind::Extrusion => "Extrusion",
            NodeKind::Fog => "Fog",
            NodeKind::FontStyle => "FontStyle",
            NodeKind::Group => "Group",
            NodeKind::ImageTexture => "ImageTexture",
            NodeKind::IndexedFaceSet => "IndexedFaceSet",
            NodeKind::IndexedLineSet => "IndexedLineSet",
            NodeKind::Inline => "Inline",
            NodeKind::Lod => "LOD",
            NodeKind::Material => "Material",
            NodeKind::MovieTexture => "MovieTexture",
            NodeKind::NavigationInfo => "NavigationInfo",
            NodeKind::Normal => "Normal",
            NodeKind::NormalInterpolator => "NormalInterpolator",
            NodeKind::OrientationInterpolator => "OrientationInterpolator",
            NodeKind::PixelTexture => "PixelTexture",
            NodeKind::PlaneSensor => "PlaneSensor",
            NodeKind::PointLight => "PointLight",
            NodeKind::PointSet => "PointSet",
            NodeKind::PositionInterpolator => "PositionInterpolator",
            NodeKind::ProximitySensor => "ProximitySensor",
            NodeKind::ScalarInterpolator => "ScalarInterpolator",
            NodeKind::Script => "Script",
            NodeKind::Shape => "Shape",
            NodeKind::Sound => "Sound",
            NodeKind::Sphere => "Sphere",
            NodeKind::SphereSensor => "SphereSensor",
            NodeKind::SpotLight => "SpotLight",
            NodeKind::Switch => "Switch",
            NodeKind::Text => "Text",
            NodeKind::TextureCoordinate => "TextureCoordinate",
            NodeKind::TextureTransform => "TextureTransform",
            NodeKind::TimeSensor => "TimeSensor",
            NodeKind::TouchSensor => "TouchSensor",
            NodeKind::Transform => "Transform",
            NodeKind::Viewpoint => "Viewpoint",
            NodeKind::VisibilitySensor => "VisibilitySensor",
            NodeKind::WorldInfo => "WorldInfo",
        }
    }

    pub fn category(self) -> NodeCategory {
        use NodeKind::*;
        match self {
            Anchor | Billboard | Collision | Group | Inline | Lod | Switch | Transform => {
                NodeCategory::Grouping
            }
            Box | Cone | Cylinder | ElevationGrid | Extrusion | IndexedFaceSet
            | IndexedLineSet | PointSet | Sphere | Text => NodeCategory::Geometry,
            Color | Coordinate | Normal | TextureCoordinate => NodeCategory::GeometricProperty,
            Appearance | Material | FontStyle | TextureTransform => NodeCategory::Appearance,
            ImageTexture | MovieTexture | PixelTexture => NodeCategory::Texture,
            DirectionalLight | PointLight | SpotLight => NodeCategory::Light,
            CylinderSensor | PlaneSensor | ProximitySensor | SphereSensor | TimeSensor
            | TouchSensor | VisibilitySensor => NodeCategory::Sensor,
            ColorInterpolator | CoordinateInterpolator | NormalInterpolator
            | OrientationInterpolator | PositionInterpolator | ScalarInterpolator => {
                NodeCategory::Interpolator
            }
            Background | Fog | NavigationInfo | Viewpoint => NodeCategory::Bindable,
            AudioClip | Script | Shape | Sound | WorldInfo => NodeCategory::Leaf,
        }
    }

    /// Whether the kind may appear in a grouping node's `children`.
    pub fn is_child(self) -> bool {
        match self.category() {
            NodeCategory::Grouping
            | NodeCategory::Light
            | NodeCategory::Sensor
            | NodeCategory::Interpolator
            | NodeCategory::Bindable => true,
            NodeCategory::Leaf => !matches!(self, NodeKind::AudioClip),
            _ => false,
        }
    }

    pub fn is_geometry(self) -> bool {
        self.category() == NodeCategory::Geometry
    }
}

/// What a node (or a template instance standing in for one) can be used as.
///
/// For an instance this is the capability of the first node of its clone,
/// and `node` points at that cloned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    pub kind: NodeKind,
    pub node: NodeId,
}

impl Capability {
    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    pub fn category(&self) -> NodeCategory {
        self.kind.category()
    }

    pub fn is_child(&self) -> bool {
        self.kind.is_child()
    }

    pub fn is_geometry(&self) -> bool {
        self.kind.is_geometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_resolve_back() {
        for kind in NodeKind::all() {
            assert_eq!(NodeKind::from_type_name(kind.type_name()), Some(*kind));
        }
        assert_eq!(NodeKind::all().len(), 54);
    }

    #[test]
    fn test_lod_spelling() {
        assert_eq!(NodeKind::from_type_name("LOD"), Some(NodeKind::Lod));
        assert_eq!(NodeKind::from_type_name("Lod"), None);
        assert_eq!(NodeKind::from_type_name("Frobnicator"), None);
    }

    #[test]
    fn test_categories() {
        assert!(NodeKind::Box.is_geometry());
        assert!(!NodeKind::Box.is_child());
        assert!(NodeKind::Transform.is_child());
        assert!(NodeKind::Shape.is_child());
        assert!(!NodeKind::AudioClip.is_child());
        assert_eq!(NodeKind::Viewpoint.category(), NodeCategory::Bindable);
        assert_eq!(NodeKind::Material.category(), NodeCategory::Appearance);
    }

    #[test]
    fn test_capability_queries() {
        let capability = Capability {
            kind: NodeKind::Sphere,
            node: NodeId(3),
        };
        assert!(capability.is(NodeKind::Sphere));
        assert!(!capability.is(NodeKind::Box));
        assert!(capability.is_geometry());
        assert_eq!(capability.category(), NodeCategory::Geometry);
    }
}
