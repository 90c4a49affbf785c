//! Template definitions.
//!
//! A [`PrototypeDescriptor`] holds a template's public interface and its
//! implementation node sequence. One exists per template name in a
//! document and it is shared by every instance through a
//! [`DescriptorHandle`]. Externally defined templates start out without
//! nodes and fetch them on first use; that fetch happens at most once and
//! its outcome is permanent.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::errors::{ProtoError, ProtoResult};
use crate::graph::arena::NodeArena;
use crate::loader::{FetchRequest, TemplateLoader};
use crate::models::{FieldType, FieldValue, InterfaceKind, InterfaceRecord, IsMapEntry, NodeId};

/// Shared, reference-counted descriptor.
pub type DescriptorHandle = Rc<RefCell<PrototypeDescriptor>>;

/// Where an externally defined template may be fetched from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSource {
    /// Candidate locations, tried in order.
    pub locations: Vec<String>,
    /// Document the locations are relative to.
    pub base_document: Option<String>,
}

/// Coarse lifecycle state of a descriptor's implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorStatus {
    Pending,
    Fetching,
    Resolved,
    Failed,
}

#[derive(Debug)]
enum Implementation {
    /// Nodes collected while parsing, or an external source not yet fetched.
    Pending {
        nodes: Vec<NodeId>,
        external: Option<ExternalSource>,
    },
    Fetching,
    Resolved {
        nodes: Vec<NodeId>,
        actual_location: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// Interface lists and nodes moved out of a fetched descriptor.
struct TemplateParts {
    fields: Vec<InterfaceRecord>,
    event_ins: Vec<InterfaceRecord>,
    event_outs: Vec<InterfaceRecord>,
    nodes: Vec<NodeId>,
}

#[derive(Debug)]
pub struct PrototypeDescriptor {
    name: String,
    scope: Option<String>,
    fields: Vec<InterfaceRecord>,
    event_ins: Vec<InterfaceRecord>,
    event_outs: Vec<InterfaceRecord>,
    implementation: Implementation,
    diagnostics: Diagnostics,
}

impl PrototypeDescriptor {
    /// A locally defined template. Nodes are added with [`add_node`](Self::add_node).
    pub fn new(name: impl Into<String>, diagnostics: Diagnostics) -> Self {
        Self {
            name: name.into(),
            scope: None,
            fields: Vec::new(),
            event_ins: Vec::new(),
            event_outs: Vec::new(),
            implementation: Implementation::Pending {
                nodes: Vec::new(),
                external: None,
            },
            diagnostics,
        }
    }

    /// An externally defined template whose implementation is fetched lazily.
    pub fn external(
        name: impl Into<String>,
        source: ExternalSource,
        diagnostics: Diagnostics,
    ) -> Self {
        let mut descriptor = Self::new(name, diagnostics);
        descriptor.implementation = Implementation::Pending {
            nodes: Vec::new(),
            external: Some(source),
        };
        descriptor
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn into_handle(self) -> DescriptorHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The document this template was declared in, if known.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // -----------------------------------------------------------------------
    // Interface declaration
    // -----------------------------------------------------------------------

    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        value_type: FieldType,
        default: Option<FieldValue>,
    ) {
        let name = name.into();
        if !self.fields.iter().any(|record| record.name == name) {
            self.fields
                .push(InterfaceRecord::new(name.clone(), InterfaceKind::Field, value_type));
        }
        if let Some(default) = default {
            self.set_field_default(&name, default);
        }
    }

    pub fn add_event_in(&mut self, name: impl Into<String>, value_type: FieldType) {
        let name = name.into();
        if !self.event_ins.iter().any(|record| record.name == name) {
            self.event_ins
                .push(InterfaceRecord::new(name, InterfaceKind::EventIn, value_type));
        }
    }

    pub fn add_event_out(&mut self, name: impl Into<String>, value_type: FieldType) {
        let name = name.into();
        if !self.event_outs.iter().any(|record| record.name == name) {
            self.event_outs
                .push(InterfaceRecord::new(name, InterfaceKind::EventOut, value_type));
        }
    }

    /// A field plus its `set_<name>` eventIn and `<name>_changed` eventOut.
    pub fn add_exposed_field(
        &mut self,
        name: impl Into<String>,
        value_type: FieldType,
        default: Option<FieldValue>,
    ) {
        let name = name.into();
        self.add_field(name.clone(), value_type, default);
        self.add_event_in(format!("set_{name}"), value_type);
        self.add_event_out(format!("{name}_changed"), value_type);
    }

    /// Set the default of a declared field. A second assignment is reported
    /// and replaces the first.
    pub fn set_field_default(&mut self, name: &str, value: FieldValue) -> bool {
        let Some(record) = self.fields.iter_mut().find(|record| record.name == name) else {
            self.diagnostics.error(
                DiagnosticKind::NoSuchField,
                format!("setting default of {name} on {} failed: no such field", self.name),
            );
            return false;
        };
        if record.default_value.is_some() {
            self.diagnostics.error(
                DiagnosticKind::DuplicateDefault,
                format!("default for field {name} of {} already set", self.name),
            );
        }
        record.default_value = Some(value);
        true
    }

    /// Append a node to a locally defined implementation.
    pub fn add_node(&mut self, node: NodeId) -> bool {
        match &mut self.implementation {
            Implementation::Pending {
                nodes,
                external: None,
            } => {
                nodes.push(node);
                true
            }
            _ => {
                debug!(template = %self.name, "ignoring node added to a non-local template");
                false
            }
        }
    }

    /// Bind `interface_name` to `impl_field` of `impl_node`. The first
    /// interface member with that name wins, searching fields, then
    /// eventIns, then eventOuts. Entries keep declaration order.
    pub fn add_is(&mut self, interface_name: &str, impl_node: NodeId, impl_field: &str) -> bool {
        debug!(
            template = %self.name,
            interface = interface_name,
            node = impl_node.0,
            field = impl_field,
            "add IS mapping"
        );
        let record = self
            .fields
            .iter_mut()
            .chain(self.event_ins.iter_mut())
            .chain(self.event_outs.iter_mut())
            .find(|record| record.name == interface_name);
        match record {
            Some(record) => {
                record.is_map.push(IsMapEntry::new(impl_node, impl_field));
                true
            }
            None => {
                self.diagnostics.error(
                    DiagnosticKind::NoSuchField,
                    format!("IS to {interface_name}: {} has no such interface member", self.name),
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Return the implementation nodes, fetching them first for an external
    /// template.
    ///
    /// The first successful call also names every anonymous IS-mapped node
    /// and pushes each field default onto its IS-mapped nodes. A failed
    /// fetch leaves the implementation permanently empty.
    pub fn resolve_implementation(
        &mut self,
        arena: &mut NodeArena,
        loader: &mut dyn TemplateLoader,
    ) -> Vec<NodeId> {
        let state = std::mem::replace(&mut self.implementation, Implementation::Fetching);
        match state {
            Implementation::Resolved {
                nodes,
                actual_location,
            } => {
                let resolved = nodes.clone();
                self.implementation = Implementation::Resolved {
                    nodes,
                    actual_location,
                };
                resolved
            }
            Implementation::Failed { reason } => {
                self.implementation = Implementation::Failed { reason };
                Vec::new()
            }
            Implementation::Fetching => {
                self.diagnostics.error(
                    DiagnosticKind::Reentrant,
                    format!("template {} used while its implementation is being fetched", self.name),
                );
                Vec::new()
            }
            Implementation::Pending { nodes, external } => {
                let (nodes, actual_location) = match external {
                    Some(source) if nodes.is_empty() => match self.fetch(&source, arena, loader) {
                        Ok(fetched) => fetched,
                        Err(err) => {
                            self.diagnostics.warn(
                                DiagnosticKind::FetchFailed,
                                format!("couldn't read external template {}: {err}", self.name),
                            );
                            self.implementation = Implementation::Failed {
                                reason: err.to_string(),
                            };
                            return Vec::new();
                        }
                    },
                    _ => (nodes, None),
                };
                self.initialize_is_targets(arena);
                info!(
                    template = %self.name,
                    nodes = nodes.len(),
                    location = actual_location.as_deref().unwrap_or("<local>"),
                    "template resolved"
                );
                self.implementation = Implementation::Resolved {
                    nodes: nodes.clone(),
                    actual_location,
                };
                nodes
            }
        }
    }

    /// Fetch the external definition and adopt its interface and nodes.
    fn fetch(
        &mut self,
        source: &ExternalSource,
        arena: &mut NodeArena,
        loader: &mut dyn TemplateLoader,
    ) -> ProtoResult<(Vec<NodeId>, Option<String>)> {
        let request = FetchRequest {
            name: &self.name,
            locations: &source.locations,
            base_document: source.base_document.as_deref(),
            diagnostics: &self.diagnostics,
        };
        let fetched = loader.fetch_template(&request, arena)?;
        let parts = fetched.descriptor.borrow_mut().take_parts()?;

        // The fetched lists carry the IS maps, so they replace ours wholesale.
        self.fields = parts.fields;
        self.event_ins = parts.event_ins;
        self.event_outs = parts.event_outs;
        Ok((parts.nodes, Some(fetched.location)))
    }

    fn take_parts(&mut self) -> ProtoResult<TemplateParts> {
        let nodes = match &mut self.implementation {
            Implementation::Pending {
                nodes,
                external: None,
            }
            | Implementation::Resolved { nodes, .. } => std::mem::take(nodes),
            _ => {
                return Err(ProtoError::Fetch {
                    name: self.name.clone(),
                    reason: "fetched definition is not an inline template".to_string(),
                })
            }
        };
        Ok(TemplateParts {
            fields: std::mem::take(&mut self.fields),
            event_ins: std::mem::take(&mut self.event_ins),
            event_outs: std::mem::take(&mut self.event_outs),
            nodes,
        })
    }

    fn initialize_is_targets(&self, arena: &mut NodeArena) {
        let records = self
            .fields
            .iter()
            .chain(self.event_ins.iter())
            .chain(self.event_outs.iter());
        for record in records {
            for entry in &record.is_map {
                let Some(node) = arena.get_mut(entry.node) else {
                    self.diagnostics.warn(
                        DiagnosticKind::UnresolvedIs,
                        format!(
                            "{}.{} is mapped to missing node {}",
                            self.name, record.name, entry.node.0
                        ),
                    );
                    continue;
                };
                if node.name().is_none() {
                    node.set_name(format!("#{}", entry.node.0));
                }
                if record.kind == InterfaceKind::Field {
                    if let Some(default) = &record.default_value {
                        node.set_field(&entry.field, default.clone());
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn fields(&self) -> &[InterfaceRecord] {
        &self.fields
    }

    pub fn event_ins(&self) -> &[InterfaceRecord] {
        &self.event_ins
    }

    pub fn event_outs(&self) -> &[InterfaceRecord] {
        &self.event_outs
    }

    pub fn field_default(&self, name: &str) -> Option<&FieldValue> {
        find(&self.fields, name)?.default_value.as_ref()
    }

    pub fn field_is_map(&self, name: &str) -> Option<&[IsMapEntry]> {
        find(&self.fields, name).map(|record| record.is_map.as_slice())
    }

    pub fn has_field(&self, name: &str) -> Option<FieldType> {
        find(&self.fields, name).map(|record| record.value_type)
    }

    pub fn has_event_in(&self, name: &str) -> Option<FieldType> {
        find(&self.event_ins, name).map(|record| record.value_type)
    }

    pub fn has_event_out(&self, name: &str) -> Option<FieldType> {
        find(&self.event_outs, name).map(|record| record.value_type)
    }

    /// Field, `set_<name>` eventIn and `<name>_changed` eventOut all
    /// declared with the same type.
    pub fn has_exposed_field(&self, name: &str) -> Option<FieldType> {
        let value_type = self.has_field(name)?;
        let same_in = self.has_event_in(&format!("set_{name}")) == Some(value_type);
        let same_out = self.has_event_out(&format!("{name}_changed")) == Some(value_type);
        (same_in && same_out).then_some(value_type)
    }

    pub fn has_interface(&self, name: &str) -> Option<FieldType> {
        self.has_field(name)
            .or_else(|| self.has_event_in(name))
            .or_else(|| self.has_event_out(name))
    }

    pub fn status(&self) -> DescriptorStatus {
        match self.implementation {
            Implementation::Pending { .. } => DescriptorStatus::Pending,
            Implementation::Fetching => DescriptorStatus::Fetching,
            Implementation::Resolved { .. } => DescriptorStatus::Resolved,
            Implementation::Failed { .. } => DescriptorStatus::Failed,
        }
    }

    /// Implementation nodes once resolved; empty before that or after a
    /// failed fetch.
    pub fn implementation_nodes(&self) -> &[NodeId] {
        match &self.implementation {
            Implementation::Resolved { nodes, .. } => nodes.as_slice(),
            _ => &[],
        }
    }

    /// First implementation node, without triggering a fetch.
    pub fn first_node(&self) -> Option<NodeId> {
        match &self.implementation {
            Implementation::Pending { nodes, .. } | Implementation::Resolved { nodes, .. } => {
                nodes.first().copied()
            }
            _ => None,
        }
    }

    /// Location an external implementation was actually read from.
    pub fn actual_location(&self) -> Option<&str> {
        match &self.implementation {
            Implementation::Resolved {
                actual_location, ..
            } => actual_location.as_deref(),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.implementation {
            Implementation::Failed { reason } => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Consume the descriptor, returning the roots of its template graph.
    fn into_implementation_nodes(self) -> Vec<NodeId> {
        match self.implementation {
            Implementation::Pending { nodes, .. } | Implementation::Resolved { nodes, .. } => nodes,
            Implementation::Fetching | Implementation::Failed { .. } => Vec::new(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(
            self.implementation,
            Implementation::Pending {
                external: Some(_),
                ..
            }
        ) || self.actual_location().is_some()
    }
}

/// Free the template graphs of descriptors in `handles` that nothing else
/// refers to any more, and drop them from `handles`.
///
/// Releasing a graph can drop the last use of another template, so this
/// runs until no unreferenced descriptor is left. Returns how many were
/// released.
pub fn release_unreferenced(handles: &mut Vec<DescriptorHandle>, arena: &mut NodeArena) -> usize {
    let mut released = 0;
    while let Some(index) = handles
        .iter()
        .position(|handle| Rc::strong_count(handle) == 1)
    {
        let Ok(cell) = Rc::try_unwrap(handles.swap_remove(index)) else {
            continue;
        };
        let descriptor = cell.into_inner();
        let name = descriptor.name.clone();
        let nodes = arena.reachable(&descriptor.into_implementation_nodes());
        debug!(template = %name, nodes = nodes.len(), "releasing unused template");
        arena.release(nodes);
        released += 1;
    }
    released
}

fn find<'a>(records: &'a [InterfaceRecord], name: &str) -> Option<&'a InterfaceRecord> {
    records.iter().find(|record| record.name == name)
}
