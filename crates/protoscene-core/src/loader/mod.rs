//! Reading template documents and fetching external templates.

pub mod document;
pub mod json;

use crate::diagnostics::Diagnostics;
use crate::errors::{ProtoError, ProtoResult};
use crate::graph::arena::NodeArena;
use crate::proto::descriptor::DescriptorHandle;

/// What an external template reference asks the loader for.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Name the template was declared under.
    pub name: &'a str,
    /// Candidate locations, in preference order.
    pub locations: &'a [String],
    /// Document the reference appeared in.
    pub base_document: Option<&'a str>,
    pub diagnostics: &'a Diagnostics,
}

/// A fetched definition and where it actually came from.
#[derive(Debug)]
pub struct FetchedTemplate {
    pub descriptor: DescriptorHandle,
    pub location: String,
}

/// Source of external template definitions.
///
/// Implementations build the fetched template's nodes into `arena`, which
/// is the arena of the scene that will use them.
pub trait TemplateLoader {
    fn fetch_template(
        &mut self,
        request: &FetchRequest<'_>,
        arena: &mut NodeArena,
    ) -> ProtoResult<FetchedTemplate>;
}

/// Loader for scenes that have no external templates. Every fetch fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLoader;

impl TemplateLoader for NullLoader {
    fn fetch_template(
        &mut self,
        request: &FetchRequest<'_>,
        _arena: &mut NodeArena,
    ) -> ProtoResult<FetchedTemplate> {
        Err(ProtoError::Fetch {
            name: request.name.to_string(),
            reason: "no template loader configured".to_string(),
        })
    }
}
