//! JSON template documents.
//!
//! A document declares inline templates (`protos`), external template
//! references (`extern_protos`), scene nodes and routes:
//!
//! ```json
//! {
//!   "protos": [{
//!     "name": "Foo",
//!     "interface": [
//!       { "access": "exposedField", "name": "size", "type": "SFFloat",
//!         "default": { "type": "SFFloat", "value": 1.0 } }
//!     ],
//!     "body": [{ "type": "Box", "is": { "size": "size" } }]
//!   }],
//!   "nodes": [{ "type": "Foo", "def": "A" }]
//! }
//! ```
//!
//! Field values use the tagged [`FieldValue`] form; node-valued fields hold
//! nested node declarations instead.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::errors::{ProtoError, ProtoResult};
use crate::graph::arena::NodeArena;
use crate::graph::kind::NodeKind;
use crate::graph::namespace::Namespace;
use crate::graph::node::{Node, Route};
use crate::models::{FieldType, FieldValue, NodeId};
use crate::proto::descriptor::{DescriptorHandle, ExternalSource, PrototypeDescriptor};
use crate::proto::instance::PrototypeInstance;
use crate::scene::Scene;

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateDocument {
    pub protos: Vec<ProtoDecl>,
    pub extern_protos: Vec<ExternProtoDecl>,
    pub nodes: Vec<NodeDecl>,
    pub routes: Vec<RouteDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoDecl {
    pub name: String,
    #[serde(default)]
    pub interface: Vec<InterfaceDecl>,
    #[serde(default)]
    pub body: Vec<NodeDecl>,
    /// Routes between body nodes.
    #[serde(default)]
    pub routes: Vec<RouteDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternProtoDecl {
    pub name: String,
    #[serde(default)]
    pub interface: Vec<InterfaceDecl>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    Field,
    EventIn,
    EventOut,
    ExposedField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub access: Access,
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDecl {
    /// Built-in node type or template name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub def: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_name: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, FieldDecl>,
    /// Node field name to the interface member it is bound to.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub is: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldDecl {
    Value(FieldValue),
    Node(Box<NodeDecl>),
    Nodes(Vec<NodeDecl>),
}

/// `"from": "DEF.eventOut"`, `"to": "DEF.eventIn"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecl {
    pub from: String,
    pub to: String,
}

impl TemplateDocument {
    pub fn from_json_str(text: &str) -> ProtoResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// What [`load_document`] added to a scene.
#[derive(Debug, Clone, Default)]
pub struct LoadedDocument {
    pub roots: Vec<NodeId>,
    /// Templates declared by the document, in declaration order.
    pub templates: Vec<String>,
    /// DEF names of the document's scene nodes.
    pub namespace: Namespace,
}

/// Parse `text` and add its templates, nodes and routes to `scene`.
///
/// Templates already registered in the scene may be used by the document.
pub fn load_document(
    scene: &mut Scene,
    text: &str,
    base_document: Option<&str>,
) -> ProtoResult<LoadedDocument> {
    let document = TemplateDocument::from_json_str(text)?;
    let diagnostics = scene.diagnostics().clone();

    let mut known: IndexMap<String, DescriptorHandle> = scene
        .templates()
        .map(|(name, handle)| (name.to_string(), handle.clone()))
        .collect();
    let built = build_templates(&document, &mut scene.nodes, &diagnostics, &mut known, base_document)?;

    let mut templates = Vec::with_capacity(built.len());
    for handle in built {
        let name = handle.borrow().name().to_string();
        if scene.template(&name).is_some() && !templates.contains(&name) {
            diagnostics.warn(
                DiagnosticKind::DuplicateTemplate,
                format!("template {name} redefined"),
            );
        }
        scene.register_template(name.clone(), handle);
        templates.push(name);
    }

    let mut builder = BodyBuilder::new(&mut scene.nodes, &known, None);
    let roots = document
        .nodes
        .iter()
        .map(|decl| builder.build(decl))
        .collect::<ProtoResult<Vec<NodeId>>>()?;
    let namespace = builder.defs;
    drop(known);
    scene.release_unused_templates();

    for route in &document.routes {
        let (from, route) = resolve_route(route, &namespace)?;
        scene.add_route(from, route);
    }
    for root in &roots {
        scene.add_root(*root);
    }
    debug!(
        roots = roots.len(),
        templates = templates.len(),
        "document loaded"
    );
    Ok(LoadedDocument {
        roots,
        templates,
        namespace,
    })
}

/// Build every template declared in `document` into `arena`.
///
/// `known` holds templates usable by name and receives each new one as it
/// is built, so later templates can use earlier ones. Returns the new
/// templates in declaration order, externals first.
pub fn build_templates(
    document: &TemplateDocument,
    arena: &mut NodeArena,
    diagnostics: &Diagnostics,
    known: &mut IndexMap<String, DescriptorHandle>,
    base_document: Option<&str>,
) -> ProtoResult<Vec<DescriptorHandle>> {
    let mut built = Vec::new();

    for decl in &document.extern_protos {
        let source = ExternalSource {
            locations: decl.urls.clone(),
            base_document: base_document.map(str::to_string),
        };
        let mut descriptor =
            PrototypeDescriptor::external(decl.name.clone(), source, diagnostics.clone());
        declare_interface(&mut descriptor, &decl.interface);
        register(known, &mut built, with_base(descriptor, base_document), diagnostics);
    }

    for decl in &document.protos {
        let mut descriptor = PrototypeDescriptor::new(decl.name.clone(), diagnostics.clone());
        declare_interface(&mut descriptor, &decl.interface);

        let mut builder = BodyBuilder::new(arena, known, Some(decl.name.as_str()));
        let body = decl
            .body
            .iter()
            .map(|node| builder.build(node))
            .collect::<ProtoResult<Vec<NodeId>>>()?;
        let BodyBuilder {
            defs, is_bindings, ..
        } = builder;

        for id in body {
            descriptor.add_node(id);
        }
        for binding in is_bindings {
            descriptor.add_is(&binding.interface, binding.node, &binding.field);
        }
        for route in &decl.routes {
            let (from, route) = resolve_route(route, &defs)?;
            if let Some(node) = arena.get_mut(from) {
                node.add_route(route);
            }
        }
        register(known, &mut built, with_base(descriptor, base_document), diagnostics);
    }
    Ok(built)
}

fn with_base(descriptor: PrototypeDescriptor, base_document: Option<&str>) -> PrototypeDescriptor {
    match base_document {
        Some(base) => descriptor.with_scope(base),
        None => descriptor,
    }
}

fn register(
    known: &mut IndexMap<String, DescriptorHandle>,
    built: &mut Vec<DescriptorHandle>,
    descriptor: PrototypeDescriptor,
    diagnostics: &Diagnostics,
) {
    let name = descriptor.name().to_string();
    if built.iter().any(|handle| handle.borrow().name() == name) {
        diagnostics.warn(
            DiagnosticKind::DuplicateTemplate,
            format!("template {name} declared twice in one document"),
        );
    }
    let handle = descriptor.into_handle();
    known.insert(name, handle.clone());
    built.push(handle);
}

fn declare_interface(descriptor: &mut PrototypeDescriptor, interface: &[InterfaceDecl]) {
    for member in interface {
        let name = member.name.clone();
        match member.access {
            Access::Field => descriptor.add_field(name, member.value_type, member.default.clone()),
            Access::ExposedField => {
                descriptor.add_exposed_field(name, member.value_type, member.default.clone())
            }
            Access::EventIn => descriptor.add_event_in(name, member.value_type),
            Access::EventOut => descriptor.add_event_out(name, member.value_type),
        }
    }
}

fn resolve_route(decl: &RouteDecl, defs: &Namespace) -> ProtoResult<(NodeId, Route)> {
    let (from_name, event_out) = split_endpoint(&decl.from)?;
    let (to_name, event_in) = split_endpoint(&decl.to)?;
    let from = defs
        .find_node(from_name)
        .ok_or_else(|| ProtoError::UnresolvedUse(from_name.to_string()))?;
    let to = defs
        .find_node(to_name)
        .ok_or_else(|| ProtoError::UnresolvedUse(to_name.to_string()))?;
    Ok((from, Route::new(event_out, to, event_in)))
}

fn split_endpoint(endpoint: &str) -> ProtoResult<(&str, &str)> {
    endpoint
        .split_once('.')
        .filter(|(node, event)| !node.is_empty() && !event.is_empty())
        .ok_or_else(|| ProtoError::Parse(format!("route endpoint {endpoint:?} is not NODE.event")))
}

struct IsBinding {
    interface: String,
    node: NodeId,
    field: String,
}

/// Builds node declarations into the arena within one DEF scope.
struct BodyBuilder<'a> {
    arena: &'a mut NodeArena,
    templates: &'a IndexMap<String, DescriptorHandle>,
    /// Template whose body is being built; `None` for scene nodes.
    template: Option<&'a str>,
    defs: Namespace,
    is_bindings: Vec<IsBinding>,
}

impl<'a> BodyBuilder<'a> {
    fn new(
        arena: &'a mut NodeArena,
        templates: &'a IndexMap<String, DescriptorHandle>,
        template: Option<&'a str>,
    ) -> Self {
        Self {
            arena,
            templates,
            template,
            defs: Namespace::new(),
            is_bindings: Vec::new(),
        }
    }

    fn build(&mut self, decl: &NodeDecl) -> ProtoResult<NodeId> {
        if let Some(name) = &decl.use_name {
            return self
                .defs
                .find_node(name)
                .ok_or_else(|| ProtoError::UnresolvedUse(name.clone()));
        }
        let type_name = decl
            .node_type
            .as_deref()
            .ok_or_else(|| ProtoError::Parse("node declaration needs a type or use".to_string()))?;

        let mut fields = Vec::with_capacity(decl.fields.len());
        for (name, value) in &decl.fields {
            let value = match value {
                FieldDecl::Value(value) => value.clone(),
                FieldDecl::Node(node) => FieldValue::SFNode(Some(self.build(node)?)),
                FieldDecl::Nodes(nodes) => FieldValue::MFNode(
                    nodes
                        .iter()
                        .map(|node| self.build(node))
                        .collect::<ProtoResult<Vec<NodeId>>>()?,
                ),
            };
            fields.push((name.clone(), value));
        }

        let mut node = if let Some(kind) = NodeKind::from_type_name(type_name) {
            fields
                .into_iter()
                .fold(Node::new(kind), |node, (name, value)| node.with_field(name, value))
        } else if let Some(handle) = self.templates.get(type_name) {
            let mut instance = PrototypeInstance::new(handle.clone());
            for (name, value) in fields {
                instance.set_field(&name, value);
            }
            Node::proto(instance)
        } else {
            return Err(ProtoError::UnknownNodeType(type_name.to_string()));
        };
        if let Some(def) = &decl.def {
            node.set_name(def.clone());
        }
        let id = self.arena.insert(node);
        if let Some(def) = &decl.def {
            self.defs.define(def.clone(), id);
        }

        if !decl.is.is_empty() && self.template.is_none() {
            return Err(ProtoError::Parse(format!(
                "IS on {type_name} outside a template body"
            )));
        }
        for (field, interface) in &decl.is {
            self.is_bindings.push(IsBinding {
                interface: interface.clone(),
                node: id,
                field: field.clone(),
            });
        }
        Ok(id)
    }
}
