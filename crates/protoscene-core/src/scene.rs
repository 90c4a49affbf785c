//! The scene: node arena, template registry, and uniform node operations.
//!
//! Built-in nodes and template instances are both plain arena nodes, and
//! every operation here accepts either. While an instance is being worked
//! on its body is taken out of the arena, so the instance and the rest of
//! the scene can be borrowed mutably at the same time.

use indexmap::IndexMap;
use tracing::debug;

use crate::config::SceneConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::errors::{ProtoError, ProtoResult};
use crate::graph::arena::NodeArena;
use crate::graph::kind::Capability;
use crate::graph::node::{Node, Route};
use crate::loader::json::JsonTemplateLoader;
use crate::loader::{NullLoader, TemplateLoader};
use crate::models::{BoundingVolume, FieldValue, NodeId};
use crate::proto::descriptor::{release_unreferenced, DescriptorHandle, PrototypeDescriptor};
use crate::proto::instance::PrototypeInstance;
use crate::render::{RenderContext, Viewer};

pub struct Scene {
    pub(crate) nodes: NodeArena,
    pub(crate) loader: Box<dyn TemplateLoader>,
    diagnostics: Diagnostics,
    config: SceneConfig,
    templates: IndexMap<String, DescriptorHandle>,
    /// Replaced definitions, kept until their last instance is gone.
    retired: Vec<DescriptorHandle>,
    roots: Vec<NodeId>,
    cascade_depth: usize,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(SceneConfig::default(), Box::new(NullLoader))
    }
}

impl Scene {
    pub fn new(config: SceneConfig, loader: Box<dyn TemplateLoader>) -> Self {
        Self {
            nodes: NodeArena::new(),
            loader,
            diagnostics: Diagnostics::new(),
            config,
            templates: IndexMap::new(),
            retired: Vec::new(),
            roots: Vec::new(),
            cascade_depth: 0,
        }
    }

    /// Scene that reads external templates from JSON documents on disk.
    pub fn with_json_loader(config: SceneConfig) -> Self {
        let loader = JsonTemplateLoader::new(&config);
        Self::new(config, Box::new(loader))
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut NodeArena {
        &mut self.nodes
    }

    // -----------------------------------------------------------------------
    // Templates and graph construction
    // -----------------------------------------------------------------------

    /// An empty local template reporting into this scene's diagnostics.
    pub fn new_descriptor(&self, name: impl Into<String>) -> PrototypeDescriptor {
        PrototypeDescriptor::new(name, self.diagnostics.clone())
    }

    /// Register a template under its name. A second definition of the same
    /// name is reported and replaces the first for later uses.
    pub fn define_template(&mut self, descriptor: PrototypeDescriptor) -> DescriptorHandle {
        let name = descriptor.name().to_string();
        let handle = descriptor.into_handle();
        if let Some(previous) = self.templates.insert(name.clone(), handle.clone()) {
            self.diagnostics.warn(
                DiagnosticKind::DuplicateTemplate,
                format!("template {name} redefined"),
            );
            self.retired.push(previous);
            self.release_unused_templates();
        }
        handle
    }

    pub(crate) fn register_template(&mut self, name: String, handle: DescriptorHandle) {
        if let Some(previous) = self.templates.insert(name, handle) {
            self.retired.push(previous);
        }
    }

    /// Free the graphs of replaced templates that no instance uses any more.
    /// Returns how many templates were released.
    pub fn release_unused_templates(&mut self) -> usize {
        release_unreferenced(&mut self.retired, &mut self.nodes)
    }

    pub fn template(&self, name: &str) -> Option<DescriptorHandle> {
        self.templates.get(name).cloned()
    }

    pub fn templates(&self) -> impl Iterator<Item = (&str, &DescriptorHandle)> {
        self.templates
            .iter()
            .map(|(name, handle)| (name.as_str(), handle))
    }

    /// Insert a node into the arena without making it a root.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    pub fn add_root(&mut self, node: NodeId) {
        if !self.roots.contains(&node) {
            self.roots.push(node);
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// A new, uninstantiated use of the template `name`.
    pub fn create_instance(&mut self, name: &str) -> ProtoResult<NodeId> {
        let handle = self
            .template(name)
            .ok_or_else(|| ProtoError::UnknownTemplate(name.to_string()))?;
        Ok(self.nodes.insert(Node::proto(PrototypeInstance::new(handle))))
    }

    /// Drop a node and everything its instance cloned.
    pub fn remove_node(&mut self, id: NodeId) {
        self.roots.retain(|root| *root != id);
        self.nodes.release([id]);
        self.release_unused_templates();
    }

    /// Run `f` on the instance stored at `id` with the scene available.
    ///
    /// Returns `None` for built-in or missing nodes and for an instance that
    /// is already being worked on further up the stack.
    pub fn with_instance<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut PrototypeInstance, &mut Scene) -> R,
    ) -> Option<R> {
        let node = self.nodes.get_mut(id)?;
        if node.is_detached() {
            self.diagnostics.error(
                DiagnosticKind::Reentrant,
                format!("instance {} re-entered while busy", id.0),
            );
            return None;
        }
        let mut instance = node.detach_instance()?;
        let result = f(&mut *instance, self);
        match self.nodes.get_mut(id) {
            Some(node) => node.attach_instance(instance),
            // Removed while detached: free its clone too.
            None => self.nodes.release(instance.into_clone_ids()),
        }
        Some(result)
    }

    // -----------------------------------------------------------------------
    // Node operations
    // -----------------------------------------------------------------------

    pub fn instantiate(&mut self, id: NodeId) {
        self.with_instance(id, |instance, scene| instance.instantiate(scene));
    }

    /// Assign a field. On an instance this stores an override.
    pub fn set_field(&mut self, id: NodeId, name: &str, value: FieldValue) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.set_field(name, value);
                true
            }
            None => false,
        }
    }

    pub fn get_field(&self, id: NodeId, name: &str) -> Option<FieldValue> {
        let node = self.nodes.get(id)?;
        if node.is_proto() {
            return node.instance()?.get_field(name);
        }
        node.field(name).cloned()
    }

    /// Attach an outgoing route to `from`.
    pub fn add_route(&mut self, from: NodeId, route: Route) {
        let is_proto = match self.nodes.get(from) {
            Some(node) => node.is_proto(),
            None => return,
        };
        if is_proto {
            self.with_instance(from, |instance, scene| instance.add_route(scene, route));
        } else if let Some(node) = self.nodes.get_mut(from) {
            node.add_route(route);
        }
    }

    /// Deliver an event and everything it routes to.
    ///
    /// A built-in node stores the value in the named field, accepting the
    /// `set_` form, then forwards it along the routes leaving that field. Each
    /// eventOut fires at most once per timestamp, and chains longer than the
    /// configured cascade depth are cut off.
    pub fn send_event(&mut self, id: NodeId, time: f64, event_in: &str, value: FieldValue) {
        if self.cascade_depth >= self.config.max_cascade_depth {
            self.diagnostics.warn(
                DiagnosticKind::CascadeLimit,
                format!("event cascade cut at {event_in} of node {}", id.0),
            );
            return;
        }
        self.cascade_depth += 1;
        self.deliver(id, time, event_in, value);
        self.cascade_depth -= 1;
    }

    fn deliver(&mut self, id: NodeId, time: f64, event_in: &str, value: FieldValue) {
        let Some(node) = self.nodes.get(id) else {
            debug!(node = id.0, event = event_in, "event to a removed node dropped");
            return;
        };
        if node.is_proto() {
            // Relay with the instance back in place, so routes may lead into it again.
            let targets = self
                .with_instance(id, |instance, scene| instance.event_targets(scene, event_in))
                .unwrap_or_default();
            for target in targets {
                self.send_event(target.node, time, &target.field, value.clone());
            }
            return;
        }

        let field = node
            .accept_event(event_in)
            .unwrap_or_else(|| event_in.strip_prefix("set_").unwrap_or(event_in).to_string());
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.set_field(&field, value.clone());
        if !node.mark_fired(&field, time) {
            return;
        }
        for route in node.routes_from(&field) {
            self.send_event(route.to_node, time, &route.to_event_in, value.clone());
        }
    }

    pub fn render(&mut self, viewer: &mut dyn Viewer, context: &RenderContext) {
        for root in self.roots.clone() {
            self.render_node(root, viewer, context);
        }
    }

    /// Render one node and the nodes below it, then clear its modified flag.
    pub fn render_node(&mut self, id: NodeId, viewer: &mut dyn Viewer, context: &RenderContext) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if node.is_proto() {
            let nodes = self
                .with_instance(id, |instance, scene| instance.begin_render(scene, viewer))
                .flatten();
            if let Some(nodes) = nodes {
                for child in nodes {
                    self.render_node(child, viewer, context);
                }
                self.with_instance(id, |instance, scene| {
                    instance.finish_render(scene, viewer, context)
                });
            }
        } else {
            viewer.draw_node(id, node, context);
            for child in node.node_refs() {
                self.render_node(child, viewer, context);
            }
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_modified(false);
        }
    }

    pub fn is_modified(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        node.is_modified()
            || node
                .instance()
                .is_some_and(|instance| instance.is_modified(self))
    }

    pub fn bounding_volume(&self, id: NodeId) -> Option<BoundingVolume> {
        let node = self.nodes.get(id)?;
        if node.is_proto() {
            return node.instance()?.bounding_volume(self);
        }
        node.bounding_volume()
    }

    /// What `id` can be used as. For an instance this is `None` until it
    /// has been instantiated.
    pub fn capability(&self, id: NodeId) -> Option<Capability> {
        let node = self.nodes.get(id)?;
        match node.kind() {
            Some(kind) => Some(Capability { kind, node: id }),
            None => node.instance()?.capability(),
        }
    }
}
