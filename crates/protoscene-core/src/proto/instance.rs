//! Template use-sites.
//!
//! A [`PrototypeInstance`] is created uninstantiated. The first event or
//! render (or an explicit [`PrototypeInstance::instantiate`]) clones the
//! template's implementation into the scene arena, builds the dispatch
//! table from the descriptor's IS mappings, splices the instance's routes
//! onto the inner nodes and applies the stored overrides. From then on the
//! instance forwards everything to its clone.

use std::cell::Cell;

use indexmap::IndexMap;
use tracing::debug;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::graph::arena::NodeArena;
use crate::graph::kind::{Capability, NodeKind};
use crate::graph::namespace::{clone_nodes, IdentityMap, Namespace};
use crate::graph::node::Route;
use crate::models::{BoundingVolume, FieldValue, IsMapEntry, NodeId};
use crate::proto::descriptor::{DescriptorHandle, PrototypeDescriptor};
use crate::render::{ObjectHandle, RenderContext, Viewer};
use crate::scene::Scene;

/// Interface name to the cloned `(node, field)` pairs it feeds.
pub type DispatchTable = IndexMap<String, Vec<IsMapEntry>>;

/// Everything an instance owns once its template has been cloned.
#[derive(Debug)]
struct Instantiation {
    nodes: Vec<NodeId>,
    namespace: Namespace,
    identity: IdentityMap,
    dispatch: DispatchTable,
    capability: Option<Capability>,
}

#[derive(Debug)]
enum InstanceState {
    Uninstantiated,
    Instantiated(Box<Instantiation>),
}

#[derive(Debug)]
pub struct PrototypeInstance {
    descriptor: DescriptorHandle,
    overrides: IndexMap<String, FieldValue>,
    /// Outgoing routes declared on the instance itself.
    routes: Vec<Route>,
    state: InstanceState,
    modified: bool,
    bounding_volume_dirty: Cell<bool>,
    render_handle: Option<ObjectHandle>,
    rendering: bool,
}

impl PrototypeInstance {
    pub fn new(descriptor: DescriptorHandle) -> Self {
        Self {
            descriptor,
            overrides: IndexMap::new(),
            routes: Vec::new(),
            state: InstanceState::Uninstantiated,
            modified: false,
            bounding_volume_dirty: Cell::new(false),
            render_handle: None,
            rendering: false,
        }
    }

    pub fn descriptor(&self) -> &DescriptorHandle {
        &self.descriptor
    }

    pub fn template_name(&self) -> String {
        match self.descriptor.try_borrow() {
            Ok(descriptor) => descriptor.name().to_string(),
            Err(_) => String::from("<busy>"),
        }
    }

    // -----------------------------------------------------------------------
    // Fields and routes
    // -----------------------------------------------------------------------

    /// Store an override. Only [`instantiate`](Self::instantiate) pushes
    /// overrides into the clone, so a value set afterwards is kept here but
    /// does not reach the inner nodes.
    pub fn set_field(&mut self, name: &str, value: FieldValue) {
        if self.is_instantiated() {
            debug!(field = name, "override stored after instantiation");
        }
        self.overrides.insert(name.to_string(), value);
    }

    /// The override for `name`, else the template default.
    pub fn get_field(&self, name: &str) -> Option<FieldValue> {
        if let Some(value) = self.overrides.get(name) {
            return Some(value.clone());
        }
        self.descriptor
            .try_borrow()
            .ok()
            .and_then(|descriptor| descriptor.field_default(name).cloned())
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.overrides
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Record an outgoing route without splicing it.
    pub fn push_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Record an outgoing route and, if the clone already exists, splice it
    /// onto the inner nodes right away.
    pub fn add_route(&mut self, scene: &mut Scene, route: Route) {
        if let InstanceState::Instantiated(instantiation) = &self.state {
            let diagnostics = scene.diagnostics().clone();
            match self.descriptor.try_borrow() {
                Ok(descriptor) => splice_route(
                    &descriptor,
                    &instantiation.identity,
                    &mut scene.nodes,
                    &diagnostics,
                    &route,
                ),
                Err(_) => diagnostics.error(
                    DiagnosticKind::Reentrant,
                    "route added while the template is busy",
                ),
            }
        }
        self.routes.push(route);
    }

    /// Nodes held by node-valued overrides.
    pub fn children(&self) -> Vec<NodeId> {
        self.overrides
            .values()
            .flat_map(|value| value.node_refs())
            .collect()
    }

    /// Fresh, uninstantiated copy sharing the descriptor and carrying the
    /// same overrides and routes.
    pub fn duplicate(&self) -> PrototypeInstance {
        let mut copy = PrototypeInstance::new(self.descriptor.clone());
        copy.overrides = self.overrides.clone();
        copy.routes = self.routes.clone();
        copy
    }

    pub(crate) fn remap_nodes(&mut self, map: &impl Fn(NodeId) -> NodeId) {
        for value in self.overrides.values_mut() {
            value.map_nodes(map);
        }
        for route in &mut self.routes {
            route.to_node = map(route.to_node);
        }
    }

    /// Consume the instance, returning every node its clone created.
    pub(crate) fn into_clone_ids(self) -> Vec<NodeId> {
        match self.state {
            InstanceState::Instantiated(instantiation) => {
                instantiation.identity.cloned_ids().collect()
            }
            InstanceState::Uninstantiated => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Instantiation
    // -----------------------------------------------------------------------

    pub fn is_instantiated(&self) -> bool {
        matches!(self.state, InstanceState::Instantiated(_))
    }

    /// Clone the template and wire it up. Does nothing the second time.
    pub fn instantiate(&mut self, scene: &mut Scene) {
        if self.is_instantiated() {
            return;
        }
        let diagnostics = scene.diagnostics().clone();

        let template = match self.descriptor.try_borrow_mut() {
            Ok(mut descriptor) => {
                descriptor.resolve_implementation(&mut scene.nodes, &mut *scene.loader)
            }
            Err(_) => {
                diagnostics.error(
                    DiagnosticKind::Reentrant,
                    "template instantiated inside its own instantiation",
                );
                return;
            }
        };

        // Held until the end so a nested use of the same template is refused
        // instead of recursing.
        let Ok(descriptor) = self.descriptor.try_borrow() else {
            return;
        };

        let cloned = clone_nodes(&mut scene.nodes, &template);
        let dispatch = build_dispatch(&descriptor, &cloned.identity, &diagnostics);
        for route in &self.routes {
            splice_route(&descriptor, &cloned.identity, &mut scene.nodes, &diagnostics, route);
        }
        apply_overrides(
            &descriptor,
            &cloned.identity,
            &self.overrides,
            &mut scene.nodes,
            &diagnostics,
        );

        let capability = match cloned.roots.first() {
            Some(&first) => first_node_capability(scene, first),
            None => None,
        };
        debug!(
            template = descriptor.name(),
            nodes = cloned.identity.len(),
            "template instantiated"
        );

        self.state = InstanceState::Instantiated(Box::new(Instantiation {
            nodes: cloned.roots,
            namespace: cloned.namespace,
            identity: cloned.identity,
            dispatch,
            capability,
        }));
        self.bounding_volume_dirty.set(true);
    }

    // -----------------------------------------------------------------------
    // Events and rendering
    // -----------------------------------------------------------------------

    /// Inner `(node, field)` pairs an incoming event is relayed to.
    ///
    /// Instantiates on first use and marks the instance modified. The caller
    /// delivers to the targets once the instance is back in the arena, so a
    /// cascade may route into this instance again.
    pub fn event_targets(&mut self, scene: &mut Scene, name: &str) -> Vec<IsMapEntry> {
        self.instantiate(scene);
        self.modified = true;
        match self.dispatch_targets(name) {
            Some(targets) => targets.to_vec(),
            None => {
                scene.diagnostics().warn(
                    DiagnosticKind::UnknownEvent,
                    format!("unknown eventIn {name} on {}", self.template_name()),
                );
                Vec::new()
            }
        }
    }

    /// Deliver an incoming event to every inner field bound to `name`.
    pub fn event_in(&mut self, scene: &mut Scene, time: f64, name: &str, value: FieldValue) {
        for target in self.event_targets(scene, name) {
            scene.send_event(target.node, time, &target.field, value.clone());
        }
    }

    /// Open this instance's group for a frame.
    ///
    /// Returns the cloned nodes to draw inside the group, or `None` when the
    /// cached object was reused or there is nothing to draw. A `Some` must be
    /// followed by [`finish_render`](Self::finish_render).
    pub fn begin_render(&mut self, scene: &mut Scene, viewer: &mut dyn Viewer) -> Option<Vec<NodeId>> {
        if self.rendering {
            scene.diagnostics().error(
                DiagnosticKind::Reentrant,
                format!("{} reached again while it is being rendered", self.template_name()),
            );
            return None;
        }
        self.instantiate(scene);

        if let Some(handle) = self.render_handle {
            if !self.is_modified(scene) {
                viewer.insert_reference(handle);
                return None;
            }
            viewer.remove_object(handle);
            self.render_handle = None;
        }

        let nodes = self.implementation_nodes().to_vec();
        if nodes.is_empty() {
            self.modified = false;
            return None;
        }
        self.render_handle = Some(viewer.begin_group(&self.template_name()));
        self.rendering = true;
        Some(nodes)
    }

    /// Close the group opened by [`begin_render`](Self::begin_render).
    pub fn finish_render(&mut self, scene: &Scene, viewer: &mut dyn Viewer, context: &RenderContext) {
        viewer.end_group();
        if context.draw_bounding_volumes {
            if let Some(volume) = self.bounding_volume(scene) {
                viewer.draw_bounding_volume(volume);
            }
        }
        self.rendering = false;
        self.modified = false;
    }

    pub fn render(&mut self, scene: &mut Scene, viewer: &mut dyn Viewer, context: &RenderContext) {
        let Some(nodes) = self.begin_render(scene, viewer) else {
            return;
        };
        for id in nodes {
            scene.render_node(id, viewer, context);
        }
        self.finish_render(scene, viewer, context);
    }

    /// Own flag, or any top-level cloned node reporting a change.
    pub fn is_modified(&self, scene: &Scene) -> bool {
        self.modified
            || self
                .implementation_nodes()
                .iter()
                .any(|id| scene.is_modified(*id))
    }

    // -----------------------------------------------------------------------
    // Delegated queries
    // -----------------------------------------------------------------------

    /// Bounding volume of the first cloned node. An instance has none of
    /// its own.
    pub fn bounding_volume(&self, scene: &Scene) -> Option<BoundingVolume> {
        let Some(instantiation) = self.instantiation() else {
            scene.diagnostics().warn(
                DiagnosticKind::NotInstantiated,
                format!("bounding volume of {} requested before instantiation", self.template_name()),
            );
            return None;
        };
        let Some(&first) = instantiation.nodes.first() else {
            scene.diagnostics().warn(
                DiagnosticKind::EmptyImplementation,
                format!("bounding volume of {} requested but it has no nodes", self.template_name()),
            );
            return None;
        };
        self.bounding_volume_dirty.set(false);
        scene.bounding_volume(first)
    }

    pub fn is_bounding_volume_dirty(&self) -> bool {
        self.bounding_volume_dirty.get()
    }

    /// What the first cloned node can be used as; `None` before
    /// instantiation or for an empty implementation.
    pub fn capability(&self) -> Option<Capability> {
        self.instantiation()?.capability
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.capability().map(|capability| capability.kind)
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.implementation_nodes().first().copied()
    }

    /// Top-level cloned nodes, in template order.
    pub fn implementation_nodes(&self) -> &[NodeId] {
        match self.instantiation() {
            Some(instantiation) => instantiation.nodes.as_slice(),
            None => &[],
        }
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.instantiation().map(|instantiation| &instantiation.namespace)
    }

    pub fn dispatch_table(&self) -> Option<&DispatchTable> {
        self.instantiation().map(|instantiation| &instantiation.dispatch)
    }

    /// Cloned targets for an incoming event, trying `name` without its
    /// `set_` prefix first and then as given.
    pub fn dispatch_targets(&self, name: &str) -> Option<&[IsMapEntry]> {
        let dispatch = &self.instantiation()?.dispatch;
        let normalized = name.strip_prefix("set_").unwrap_or(name);
        let stripped = dispatch.get(normalized);
        match stripped {
            Some(targets) if !targets.is_empty() => Some(targets.as_slice()),
            _ => dispatch.get(name).or(stripped).map(Vec::as_slice),
        }
    }

    fn instantiation(&self) -> Option<&Instantiation> {
        match &self.state {
            InstanceState::Instantiated(instantiation) => Some(&**instantiation),
            InstanceState::Uninstantiated => None,
        }
    }
}

/// eventIns are keyed without their `set_` prefix and fields by name, so
/// `set_size` and `size` land on the same entry.
fn build_dispatch(
    descriptor: &PrototypeDescriptor,
    identity: &IdentityMap,
    diagnostics: &Diagnostics,
) -> DispatchTable {
    let mut dispatch = DispatchTable::new();
    let records = descriptor
        .event_ins()
        .iter()
        .map(|record| (record.name.strip_prefix("set_").unwrap_or(&record.name), record))
        .chain(descriptor.fields().iter().map(|record| (record.name.as_str(), record)));

    for (key, record) in records {
        // Declared members get an entry even when nothing is bound to them.
        dispatch.entry(key.to_string()).or_default();
        for entry in &record.is_map {
            let Some(node) = identity.get(entry.node) else {
                diagnostics.warn(
                    DiagnosticKind::UnresolvedIs,
                    format!(
                        "{}.{} maps to node {} which is not part of the implementation",
                        descriptor.name(),
                        record.name,
                        entry.node.0
                    ),
                );
                continue;
            };
            let target = IsMapEntry::new(node, entry.field.clone());
            let targets = dispatch.entry(key.to_string()).or_default();
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    dispatch
}

/// Move a route leaving the instance onto the inner nodes that produce the
/// eventOut, so they fire directly.
fn splice_route(
    descriptor: &PrototypeDescriptor,
    identity: &IdentityMap,
    arena: &mut NodeArena,
    diagnostics: &Diagnostics,
    route: &Route,
) {
    let Some(sources) = event_out_sources(descriptor, &route.from_event_out) else {
        diagnostics.warn(
            DiagnosticKind::UnknownEvent,
            format!(
                "route from unknown eventOut {} of {}",
                route.from_event_out,
                descriptor.name()
            ),
        );
        return;
    };
    for entry in sources {
        let Some(node) = identity.get(entry.node).and_then(|id| arena.get_mut(id)) else {
            continue;
        };
        node.add_route(Route::new(
            entry.field.clone(),
            route.to_node,
            route.to_event_in.clone(),
        ));
    }
}

/// Inner `(node, field)` pairs behind an eventOut. An exposed field bound
/// through its field record emits from the same pairs.
fn event_out_sources<'d>(
    descriptor: &'d PrototypeDescriptor,
    event_out: &str,
) -> Option<&'d [IsMapEntry]> {
    let changed = format!("{event_out}_changed");
    let declared = descriptor
        .event_outs()
        .iter()
        .find(|record| record.name == event_out)
        .or_else(|| descriptor.event_outs().iter().find(|record| record.name == changed));
    if let Some(record) = declared {
        if !record.is_map.is_empty() {
            return Some(record.is_map.as_slice());
        }
    }
    let field = event_out.strip_suffix("_changed").unwrap_or(event_out);
    match descriptor.has_exposed_field(field) {
        Some(_) => descriptor.field_is_map(field),
        None => declared.map(|record| record.is_map.as_slice()),
    }
}

fn apply_overrides(
    descriptor: &PrototypeDescriptor,
    identity: &IdentityMap,
    overrides: &IndexMap<String, FieldValue>,
    arena: &mut NodeArena,
    diagnostics: &Diagnostics,
) {
    for (name, value) in overrides {
        let Some(is_map) = descriptor.field_is_map(name) else {
            diagnostics.warn(
                DiagnosticKind::NoSuchField,
                format!("{} has no field {name}", descriptor.name()),
            );
            continue;
        };
        for entry in is_map {
            if let Some(node) = identity.get(entry.node).and_then(|id| arena.get_mut(id)) {
                node.set_field(&entry.field, value.clone());
            }
        }
    }
}

/// Capability of the first cloned node, instantiating it first when it is
/// itself a template instance.
fn first_node_capability(scene: &mut Scene, first: NodeId) -> Option<Capability> {
    let kind = scene.nodes.get(first)?.kind();
    match kind {
        Some(kind) => Some(Capability { kind, node: first }),
        None => {
            scene.instantiate(first);
            scene.capability(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::Node;
    use crate::models::FieldType;
    use crate::proto::descriptor::ExternalSource;
    use crate::render::{RecordingViewer, ViewerOp};

    /// `Foo { exposedField SFFloat size 1.0 }` whose body is a single Box
    /// with `size IS size`.
    fn foo_scene() -> (Scene, DescriptorHandle, NodeId) {
        let mut scene = Scene::default();
        let mut descriptor = scene.new_descriptor("Foo");
        descriptor.add_exposed_field("size", FieldType::SFFloat, Some(FieldValue::SFFloat(1.0)));
        let inner = scene.add_node(Node::new(NodeKind::Box).with_bounding_volume(
            BoundingVolume::new([0.0, 0.0, 0.0], 1.0),
        ));
        descriptor.add_node(inner);
        descriptor.add_is("size", inner, "size");
        let handle = scene.define_template(descriptor);
        (scene, handle, inner)
    }

    fn inner_size(scene: &Scene, instance: &PrototypeInstance) -> Option<FieldValue> {
        let first = instance.first_node()?;
        scene.nodes().get(first)?.field("size").cloned()
    }

    #[test]
    fn test_instantiate_is_idempotent() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        instance.instantiate(&mut scene);
        let nodes = instance.implementation_nodes().to_vec();
        let live = scene.nodes().len();

        instance.instantiate(&mut scene);
        assert_eq!(instance.implementation_nodes(), nodes.as_slice());
        assert_eq!(scene.nodes().len(), live);
        assert_eq!(instance.dispatch_targets("size").unwrap().len(), 1);
    }

    #[test]
    fn test_override_set_before_instantiation_wins() {
        let (mut scene, handle, template_box) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        instance.set_field("size", FieldValue::SFFloat(2.0));
        assert_eq!(instance.get_field("size"), Some(FieldValue::SFFloat(2.0)));

        instance.instantiate(&mut scene);
        assert_eq!(inner_size(&scene, &instance), Some(FieldValue::SFFloat(2.0)));
        // The template keeps its default.
        assert_eq!(
            scene.nodes().get(template_box).unwrap().field("size"),
            Some(&FieldValue::SFFloat(1.0))
        );
    }

    #[test]
    fn test_get_field_falls_back_to_default() {
        let (_, handle, _) = foo_scene();
        let instance = PrototypeInstance::new(handle);
        assert_eq!(instance.get_field("size"), Some(FieldValue::SFFloat(1.0)));
        assert_eq!(instance.get_field("missing"), None);
    }

    #[test]
    fn test_late_override_is_not_pushed_into_clone() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        instance.instantiate(&mut scene);

        instance.set_field("size", FieldValue::SFFloat(5.0));
        assert_eq!(instance.get_field("size"), Some(FieldValue::SFFloat(5.0)));
        assert_eq!(inner_size(&scene, &instance), Some(FieldValue::SFFloat(1.0)));
    }

    #[test]
    fn test_event_name_normalization() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);

        instance.event_in(&mut scene, 1.0, "set_size", FieldValue::SFFloat(3.0));
        assert_eq!(inner_size(&scene, &instance), Some(FieldValue::SFFloat(3.0)));

        instance.event_in(&mut scene, 2.0, "size", FieldValue::SFFloat(4.0));
        assert_eq!(inner_size(&scene, &instance), Some(FieldValue::SFFloat(4.0)));
        assert!(instance.is_modified(&scene));
    }

    #[test]
    fn test_fan_out_follows_declaration_order() {
        let mut scene = Scene::default();
        let mut descriptor = scene.new_descriptor("Pair");
        descriptor.add_exposed_field("radius", FieldType::SFFloat, None);
        let group = scene.add_node(Node::new(NodeKind::Group));
        let first = scene.add_node(Node::new(NodeKind::Sphere));
        let second = scene.add_node(Node::new(NodeKind::Cylinder));
        scene
            .nodes_mut()
            .get_mut(group)
            .unwrap()
            .set_field("children", FieldValue::MFNode(vec![first, second]));
        descriptor.add_node(group);
        descriptor.add_is("radius", second, "radius");
        descriptor.add_is("radius", first, "radius");
        let mut instance = PrototypeInstance::new(scene.define_template(descriptor));

        instance.instantiate(&mut scene);
        let targets = instance.dispatch_targets("set_radius").unwrap();
        let kinds: Vec<Option<NodeKind>> = targets
            .iter()
            .map(|target| scene.nodes().get(target.node).and_then(|node| node.kind()))
            .collect();
        assert_eq!(kinds, vec![Some(NodeKind::Cylinder), Some(NodeKind::Sphere)]);
    }

    #[test]
    fn test_instances_are_isolated() {
        let (mut scene, handle, _) = foo_scene();
        let mut a = PrototypeInstance::new(handle.clone());
        let mut b = PrototypeInstance::new(handle);
        a.instantiate(&mut scene);
        b.instantiate(&mut scene);
        assert_ne!(a.first_node(), b.first_node());

        a.event_in(&mut scene, 1.0, "set_size", FieldValue::SFFloat(7.0));
        assert_eq!(inner_size(&scene, &a), Some(FieldValue::SFFloat(7.0)));
        assert_eq!(inner_size(&scene, &b), Some(FieldValue::SFFloat(1.0)));
    }

    #[test]
    fn test_capability_before_and_after() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        assert!(instance.capability().is_none());
        assert!(instance.kind().is_none());

        instance.instantiate(&mut scene);
        let capability = instance.capability().unwrap();
        assert!(capability.is(NodeKind::Box));
        assert!(capability.is_geometry());
        assert_eq!(Some(capability.node), instance.first_node());
    }

    #[test]
    fn test_nested_instance_capability() {
        let (mut scene, _, _) = foo_scene();
        let mut outer = scene.new_descriptor("Outer");
        let inner_use = scene.create_instance("Foo").unwrap();
        outer.add_node(inner_use);
        let mut instance = PrototypeInstance::new(scene.define_template(outer));

        instance.instantiate(&mut scene);
        assert_eq!(instance.kind(), Some(NodeKind::Box));
        let nested = instance.first_node().unwrap();
        assert_ne!(nested, inner_use);
        assert!(scene.nodes().get(nested).unwrap().instance().unwrap().is_instantiated());
    }

    #[test]
    fn test_recursive_template_is_refused() {
        let mut scene = Scene::default();
        let descriptor = scene.new_descriptor("Loop");
        let handle = scene.define_template(descriptor);
        let self_use = scene.add_node(Node::proto(PrototypeInstance::new(handle.clone())));
        handle.borrow_mut().add_node(self_use);

        let mut instance = PrototypeInstance::new(handle);
        instance.instantiate(&mut scene);
        assert!(instance.is_instantiated());
        assert!(instance.capability().is_none());
        assert!(scene.diagnostics().has(DiagnosticKind::Reentrant));
    }

    #[test]
    fn test_failed_fetch_degrades_to_inert() {
        let mut scene = Scene::default();
        let source = ExternalSource {
            locations: vec!["missing.json".to_string()],
            base_document: None,
        };
        let mut descriptor =
            PrototypeDescriptor::external("Gone", source, scene.diagnostics().clone());
        descriptor.add_exposed_field("size", FieldType::SFFloat, None);
        let mut instance = PrototypeInstance::new(scene.define_template(descriptor));
        let mut viewer = RecordingViewer::new();

        instance.instantiate(&mut scene);
        instance.render(&mut scene, &mut viewer, &RenderContext::default());
        instance.event_in(&mut scene, 1.0, "set_size", FieldValue::SFFloat(1.0));

        assert!(instance.is_instantiated());
        assert!(instance.bounding_volume(&scene).is_none());
        assert!(instance.capability().is_none());
        assert!(viewer.ops().is_empty());
        let diagnostics = scene.diagnostics();
        assert_eq!(diagnostics.count(DiagnosticKind::FetchFailed), 1);
        assert!(diagnostics.has(DiagnosticKind::EmptyImplementation));
        // `size` is still declared, so the event is accepted and goes nowhere.
        assert!(!diagnostics.has(DiagnosticKind::UnknownEvent));
    }

    #[test]
    fn test_bounding_volume_needs_instantiation() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        assert!(instance.bounding_volume(&scene).is_none());
        assert!(scene.diagnostics().has(DiagnosticKind::NotInstantiated));

        instance.instantiate(&mut scene);
        assert!(instance.is_bounding_volume_dirty());
        assert_eq!(
            instance.bounding_volume(&scene),
            Some(BoundingVolume::new([0.0, 0.0, 0.0], 1.0))
        );
        assert!(!instance.is_bounding_volume_dirty());
    }

    #[test]
    fn test_render_reuses_handle_until_modified() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        let mut viewer = RecordingViewer::new();
        let context = RenderContext::default();

        instance.render(&mut scene, &mut viewer, &context);
        let first = viewer.take_ops();
        let ViewerOp::BeginGroup { label, handle } = &first[0] else {
            panic!("expected a group, got {first:?}");
        };
        assert_eq!(label, "Foo");
        assert!(!instance.is_modified(&scene));

        instance.render(&mut scene, &mut viewer, &context);
        assert_eq!(viewer.take_ops(), vec![ViewerOp::InsertReference(*handle)]);

        instance.event_in(&mut scene, 1.0, "set_size", FieldValue::SFFloat(2.0));
        instance.render(&mut scene, &mut viewer, &context);
        let third = viewer.take_ops();
        assert_eq!(third[0], ViewerOp::RemoveObject(*handle));
        assert!(matches!(third[1], ViewerOp::BeginGroup { .. }));
        assert!(!instance.is_modified(&scene));
    }

    #[test]
    fn test_render_draws_bounding_volume_when_asked() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        let mut viewer = RecordingViewer::new();
        let context = RenderContext {
            draw_bounding_volumes: true,
            ..RenderContext::default()
        };

        instance.render(&mut scene, &mut viewer, &context);
        assert_eq!(
            viewer.ops().last(),
            Some(&ViewerOp::DrawBoundingVolume(BoundingVolume::new([0.0, 0.0, 0.0], 1.0)))
        );
    }

    #[test]
    fn test_routes_are_spliced_onto_inner_nodes() {
        let mut scene = Scene::default();
        let mut descriptor = scene.new_descriptor("Clock");
        descriptor.add_event_out("tick", FieldType::SFFloat);
        let sensor = scene.add_node(Node::new(NodeKind::TimeSensor));
        descriptor.add_node(sensor);
        descriptor.add_is("tick", sensor, "fraction_changed");
        let handle = scene.define_template(descriptor);
        let listener = scene.add_node(Node::new(NodeKind::Transform));
        let other = scene.add_node(Node::new(NodeKind::Transform));

        let mut instance = PrototypeInstance::new(handle);
        instance.push_route(Route::new("tick", listener, "set_scale"));
        instance.instantiate(&mut scene);
        instance.add_route(&mut scene, Route::new("tick", other, "set_scale"));

        let inner = scene.nodes().get(instance.first_node().unwrap()).unwrap();
        let targets: Vec<NodeId> = inner.routes().iter().map(|route| route.to_node).collect();
        assert_eq!(targets, vec![listener, other]);
        assert_eq!(inner.routes()[0].from_event_out, "fraction_changed");
        assert_eq!(instance.routes().len(), 2);
    }

    #[test]
    fn test_unknown_event_is_reported() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        instance.event_in(&mut scene, 1.0, "set_color", FieldValue::SFColor([1.0, 0.0, 0.0]));
        assert!(scene.diagnostics().has(DiagnosticKind::UnknownEvent));
        assert!(instance.is_modified(&scene));
    }

    #[test]
    fn test_unbound_declared_event_is_accepted_quietly() {
        let (mut scene, _, _) = foo_scene();
        let mut descriptor = scene.new_descriptor("Lamp");
        descriptor.add_event_in("set_color", FieldType::SFColor);
        descriptor.add_exposed_field("intensity", FieldType::SFFloat, None);
        let bulb = scene.add_node(Node::new(NodeKind::PointLight));
        descriptor.add_node(bulb);
        let mut instance = PrototypeInstance::new(scene.define_template(descriptor));

        instance.event_in(&mut scene, 1.0, "set_color", FieldValue::SFColor([1.0, 0.5, 0.0]));
        instance.event_in(&mut scene, 1.0, "set_intensity", FieldValue::SFFloat(0.5));
        assert!(!scene.diagnostics().has(DiagnosticKind::UnknownEvent));
        assert_eq!(instance.dispatch_targets("set_color"), Some(&[][..]));
        assert!(instance.is_modified(&scene));

        instance.event_in(&mut scene, 2.0, "set_radius", FieldValue::SFFloat(1.0));
        assert_eq!(scene.diagnostics().count(DiagnosticKind::UnknownEvent), 1);
    }

    #[test]
    fn test_duplicate_is_uninstantiated_copy() {
        let (mut scene, handle, _) = foo_scene();
        let mut instance = PrototypeInstance::new(handle);
        instance.set_field("size", FieldValue::SFFloat(2.0));
        instance.instantiate(&mut scene);

        let copy = instance.duplicate();
        assert!(!copy.is_instantiated());
        assert_eq!(copy.get_field("size"), Some(FieldValue::SFFloat(2.0)));
        assert!(std::rc::Rc::ptr_eq(copy.descriptor(), instance.descriptor()));
    }
}
