//! Nodes stored in the scene arena and the routes between them.

use indexmap::IndexMap;

use crate::graph::kind::NodeKind;
use crate::models::{BoundingVolume, FieldValue, NodeId};
use crate::proto::instance::PrototypeInstance;

/// A connection from one node's eventOut to another node's eventIn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub from_event_out: String,
    pub to_node: NodeId,
    pub to_event_in: String,
}

impl Route {
    pub fn new(
        from_event_out: impl Into<String>,
        to_node: NodeId,
        to_event_in: impl Into<String>,
    ) -> Self {
        Self {
            from_event_out: from_event_out.into(),
            to_node,
            to_event_in: to_event_in.into(),
        }
    }
}

#[derive(Debug)]
enum NodeBody {
    Builtin(NodeKind),
    /// `None` while the scene has the instance detached for an operation.
    Proto(Option<Box<PrototypeInstance>>),
}

/// A node in the arena: either a built-in node or a template instance.
#[derive(Debug)]
pub struct Node {
    name: Option<String>,
    body: NodeBody,
    fields: IndexMap<String, FieldValue>,
    routes: Vec<Route>,
    modified: bool,
    bounding_volume: Option<BoundingVolume>,
    /// Timestamp of the last event each eventOut emitted.
    fired: IndexMap<String, f64>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self::with_body(NodeBody::Builtin(kind))
    }

    pub fn proto(instance: PrototypeInstance) -> Self {
        Self::with_body(NodeBody::Proto(Some(Box::new(instance))))
    }

    fn with_body(body: NodeBody) -> Self {
        Self {
            name: None,
            body,
            fields: IndexMap::new(),
            routes: Vec::new(),
            modified: false,
            bounding_volume: None,
            fired: IndexMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_bounding_volume(mut self, volume: BoundingVolume) -> Self {
        self.bounding_volume = Some(volume);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Built-in kind, or `None` for a template instance.
    pub fn kind(&self) -> Option<NodeKind> {
        match self.body {
            NodeBody::Builtin(kind) => Some(kind),
            NodeBody::Proto(_) => None,
        }
    }

    pub fn is_proto(&self) -> bool {
        matches!(self.body, NodeBody::Proto(_))
    }

    pub fn instance(&self) -> Option<&PrototypeInstance> {
        match &self.body {
            NodeBody::Proto(Some(instance)) => Some(&**instance),
            _ => None,
        }
    }

    pub fn instance_mut(&mut self) -> Option<&mut PrototypeInstance> {
        match &mut self.body {
            NodeBody::Proto(Some(instance)) => Some(&mut **instance),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Assign a field and mark the node modified. On an instance this
    /// stores a per-instance override.
    pub fn set_field(&mut self, name: &str, value: FieldValue) {
        match &mut self.body {
            NodeBody::Builtin(_) => {
                self.fields.insert(name.to_string(), value);
            }
            NodeBody::Proto(Some(instance)) => instance.set_field(name, value),
            NodeBody::Proto(None) => {
                tracing::debug!(field = name, "dropping field write to a detached instance");
                return;
            }
        }
        self.modified = true;
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Attach an outgoing route. An instance keeps it pending until it is
    /// spliced onto the clone.
    pub fn add_route(&mut self, route: Route) {
        match &mut self.body {
            NodeBody::Proto(Some(instance)) => instance.push_route(route),
            _ => self.routes.push(route),
        }
    }

    /// Routes leaving `field`, whether declared on `field` or `field_changed`.
    pub(crate) fn routes_from(&self, field: &str) -> Vec<Route> {
        let changed = format!("{field}_changed");
        self.routes
            .iter()
            .filter(|route| route.from_event_out == field || route.from_event_out == changed)
            .cloned()
            .collect()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn bounding_volume(&self) -> Option<BoundingVolume> {
        self.bounding_volume
    }

    pub fn set_bounding_volume(&mut self, volume: Option<BoundingVolume>) {
        self.bounding_volume = volume;
    }

    /// Nodes this node holds through node-valued fields or overrides.
    pub fn node_refs(&self) -> Vec<NodeId> {
        let mut refs: Vec<NodeId> = self
            .fields
            .values()
            .flat_map(|value| value.node_refs())
            .collect();
        if let Some(instance) = self.instance() {
            refs.extend(instance.children());
        }
        refs
    }

    /// Field name an incoming event should write, accepting both `name`
    /// and `set_name` forms.
    pub(crate) fn accept_event(&self, event_in: &str) -> Option<String> {
        if self.fields.contains_key(event_in) {
            return Some(event_in.to_string());
        }
        event_in
            .strip_prefix("set_")
            .filter(|field| self.fields.contains_key(*field))
            .map(str::to_string)
    }

    /// Record that `event_out` fired at `time`. Returns `false` when it has
    /// already fired at that timestamp, which breaks routing loops.
    pub(crate) fn mark_fired(&mut self, event_out: &str, time: f64) -> bool {
        if self.fired.get(event_out) == Some(&time) {
            return false;
        }
        self.fired.insert(event_out.to_string(), time);
        true
    }

    /// Copy for cloning. Node references still point at the source graph
    /// until [`Node::remap`] runs; instances come back uninstantiated.
    pub(crate) fn duplicate(&self) -> Node {
        let body = match &self.body {
            NodeBody::Builtin(kind) => NodeBody::Builtin(*kind),
            NodeBody::Proto(Some(instance)) => NodeBody::Proto(Some(Box::new(instance.duplicate()))),
            NodeBody::Proto(None) => NodeBody::Proto(None),
        };
        Node {
            name: self.name.clone(),
            body,
            fields: self.fields.clone(),
            routes: self.routes.clone(),
            modified: false,
            bounding_volume: self.bounding_volume,
            fired: IndexMap::new(),
        }
    }

    pub(crate) fn remap(&mut self, map: &impl Fn(NodeId) -> NodeId) {
        for value in self.fields.values_mut() {
            value.map_nodes(map);
        }
        for route in &mut self.routes {
            route.to_node = map(route.to_node);
        }
        if let Some(instance) = self.instance_mut() {
            instance.remap_nodes(map);
        }
    }

    pub(crate) fn is_detached(&self) -> bool {
        matches!(self.body, NodeBody::Proto(None))
    }

    pub(crate) fn detach_instance(&mut self) -> Option<Box<PrototypeInstance>> {
        match &mut self.body {
            NodeBody::Proto(slot) => slot.take(),
            NodeBody::Builtin(_) => None,
        }
    }

    pub(crate) fn attach_instance(&mut self, instance: Box<PrototypeInstance>) {
        if let NodeBody::Proto(slot) = &mut self.body {
            *slot = Some(instance);
        }
    }

    pub(crate) fn into_instance(self) -> Option<Box<PrototypeInstance>> {
        match self.body {
            NodeBody::Proto(instance) => instance,
            NodeBody::Builtin(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_event_forms() {
        let node = Node::new(NodeKind::Box).with_field("size", FieldValue::SFVec3f([1.0; 3]));
        assert_eq!(node.accept_event("size").as_deref(), Some("size"));
        assert_eq!(node.accept_event("set_size").as_deref(), Some("size"));
        assert_eq!(node.accept_event("set_radius"), None);
        assert_eq!(node.accept_event("radius"), None);
    }

    #[test]
    fn test_set_field_marks_modified() {
        let mut node = Node::new(NodeKind::Sphere);
        assert!(!node.is_modified());
        node.set_field("radius", FieldValue::SFFloat(2.0));
        assert!(node.is_modified());
        assert_eq!(node.field("radius"), Some(&FieldValue::SFFloat(2.0)));
    }

    #[test]
    fn test_mark_fired_once_per_timestamp() {
        let mut node = Node::new(NodeKind::TimeSensor);
        assert!(node.mark_fired("fraction", 1.0));
        assert!(!node.mark_fired("fraction", 1.0));
        assert!(node.mark_fired("fraction", 2.0));
        assert!(node.mark_fired("isActive", 2.0));
    }

    #[test]
    fn test_routes_from_matches_changed_suffix() {
        let mut node = Node::new(NodeKind::PositionInterpolator);
        node.add_route(Route::new("value_changed", NodeId(7), "set_translation"));
        node.add_route(Route::new("key", NodeId(8), "set_key"));
        let routes = node.routes_from("value");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].to_node, NodeId(7));
    }

    #[test]
    fn test_duplicate_and_remap() {
        let mut node = Node::new(NodeKind::Group)
            .named("G")
            .with_field("children", FieldValue::MFNode(vec![NodeId(1), NodeId(2)]));
        node.add_route(Route::new("children_changed", NodeId(2), "set_children"));
        node.set_modified(true);

        let mut copy = node.duplicate();
        assert!(!copy.is_modified());
        copy.remap(&|id: NodeId| NodeId(id.0 + 100));

        assert_eq!(copy.name(), Some("G"));
        assert_eq!(
            copy.field("children"),
            Some(&FieldValue::MFNode(vec![NodeId(101), NodeId(102)]))
        );
        assert_eq!(copy.routes()[0].to_node, NodeId(102));
        // The source is untouched.
        assert_eq!(node.node_refs(), vec![NodeId(1), NodeId(2)]);
    }
}
