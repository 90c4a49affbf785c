//! Diagnostics sink shared by a scene and the templates declared in it.
//!
//! Every recoverable condition is emitted as a `tracing` event and also kept
//! as a [`Diagnostic`] record, so callers can inspect what went wrong without
//! installing a subscriber. The handle is passed explicitly to whoever needs
//! it; there is no process-wide sink.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error, warn};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

/// What kind of condition a diagnostic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A field default was assigned more than once; the new value wins.
    DuplicateDefault,
    /// An interface member was referenced that the template does not declare.
    NoSuchField,
    /// An external template could not be fetched or parsed.
    FetchFailed,
    /// A query that needs an instantiated template ran before instantiation.
    NotInstantiated,
    /// The template implementation has no nodes.
    EmptyImplementation,
    /// An event was delivered to a name nothing listens on.
    UnknownEvent,
    /// An IS mapping pointed at a node that did not survive cloning.
    UnresolvedIs,
    /// An event cascade hit the configured depth limit.
    CascadeLimit,
    /// A template or instance was re-entered while it was being worked on.
    Reentrant,
    /// A template name was declared twice in one document.
    DuplicateTemplate,
}

/// A single recorded diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Cheaply clonable handle to a shared list of diagnostics.
///
/// Clones share the same underlying record list.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    records: Rc<RefCell<Vec<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` through `tracing` and keep a record of it.
    pub fn report(&self, severity: Severity, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Debug => debug!(kind = ?kind, "{message}"),
            Severity::Warning => warn!(kind = ?kind, "{message}"),
            Severity::Error => error!(kind = ?kind, "{message}"),
        }
        self.records.borrow_mut().push(Diagnostic {
            severity,
            kind,
            message,
        });
    }

    pub fn warn(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.report(Severity::Warning, kind, message);
    }

    pub fn error(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.report(Severity::Error, kind, message);
    }

    /// Snapshot of every record so far, oldest first.
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.borrow().clone()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.records
            .borrow()
            .iter()
            .filter(|record| record.kind == kind)
            .count()
    }

    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.count(kind) > 0
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}
