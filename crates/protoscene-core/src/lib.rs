//! Protoscene core library: reusable node templates for VRML-style scenes.
//!
//! A template (PROTO) is declared once with a public interface and a private
//! implementation graph. Every use of it is an instance that clones the
//! implementation on first use, wires the interface onto the clone through
//! its IS mappings, and from then on behaves like the first node of that
//! clone. External templates (EXTERNPROTO) are fetched once, on demand.
//!
//! All nodes of a scene live in one [`graph::arena::NodeArena`]; the
//! [`scene::Scene`] owns it together with the template registry, the
//! diagnostics sink and the template loader.

pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod graph;
pub mod guards;
pub mod loader;
pub mod models;
pub mod proto;
pub mod render;
pub mod scene;

pub use config::SceneConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use errors::{ProtoError, ProtoResult};
pub use graph::kind::{Capability, NodeCategory, NodeKind};
pub use graph::node::{Node, Route};
pub use loader::document::{load_document, LoadedDocument, TemplateDocument};
pub use loader::json::JsonTemplateLoader;
pub use loader::{NullLoader, TemplateLoader};
pub use models::{BoundingVolume, FieldType, FieldValue, NodeId};
pub use proto::descriptor::{DescriptorHandle, DescriptorStatus, PrototypeDescriptor};
pub use proto::instance::PrototypeInstance;
pub use render::{ObjectHandle, RecordingViewer, RenderContext, Viewer};
pub use scene::Scene;
