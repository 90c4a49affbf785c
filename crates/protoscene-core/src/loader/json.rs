//! Fetching external templates from JSON documents on disk.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, info};

use crate::config::SceneConfig;
use crate::errors::{ProtoError, ProtoResult};
use crate::graph::arena::NodeArena;
use crate::loader::document::{build_templates, TemplateDocument};
use crate::loader::{FetchRequest, FetchedTemplate, TemplateLoader};
use crate::proto::descriptor::{release_unreferenced, DescriptorHandle};

// URI scheme prefix, e.g. `file:` or `https:`. Single letters are left to
// Windows drive paths.
static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]+):").unwrap());

/// Reads external templates from local JSON template documents.
///
/// Each candidate location is `path[#TemplateName]`, optionally with a
/// `file:` scheme. Relative paths are tried next to the referring document
/// first and then under each configured search path.
#[derive(Debug, Clone)]
pub struct JsonTemplateLoader {
    config: SceneConfig,
}

impl JsonTemplateLoader {
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Local file a location refers to, if it exists.
    pub fn resolve_path(&self, target: &str, base_document: Option<&str>) -> ProtoResult<PathBuf> {
        let local = match SCHEME_RE.captures(target) {
            Some(caps) => {
                let scheme = caps[1].to_ascii_lowercase();
                if !self.config.allows_scheme(&scheme) {
                    return Err(ProtoError::Fetch {
                        name: target.to_string(),
                        reason: format!("scheme {scheme} is not allowed"),
                    });
                }
                if scheme != "file" {
                    return Err(ProtoError::Fetch {
                        name: target.to_string(),
                        reason: format!("no reader for scheme {scheme}"),
                    });
                }
                strip_file_scheme(target)
            }
            None => target,
        };

        let path = Path::new(local);
        let mut candidates: Vec<PathBuf> = Vec::new();
        if path.is_absolute() {
            candidates.push(path.to_path_buf());
        } else {
            if let Some(base_dir) = base_document.and_then(base_directory) {
                candidates.push(base_dir.join(path));
            }
            candidates.push(path.to_path_buf());
            candidates.extend(self.config.search_paths.iter().map(|dir| dir.join(path)));
        }

        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ProtoError::Fetch {
                name: target.to_string(),
                reason: "file not found".to_string(),
            })
    }

    fn fetch_location(
        &self,
        location: &str,
        request: &FetchRequest<'_>,
        arena: &mut NodeArena,
    ) -> ProtoResult<FetchedTemplate> {
        let (target, fragment) = match location.split_once('#') {
            Some((target, fragment)) => (target, Some(fragment)),
            None => (location, None),
        };
        let path = self.resolve_path(target, request.base_document)?;
        let text = std::fs::read_to_string(&path)?;
        let document = TemplateDocument::from_json_str(&text)?;
        let document_name = path.to_string_lossy().into_owned();

        let mut known = IndexMap::new();
        let built = build_templates(
            &document,
            arena,
            request.diagnostics,
            &mut known,
            Some(&document_name),
        )?;

        let wanted = fragment.unwrap_or(request.name);
        let selected = match known.get(wanted) {
            Some(handle) => Some(handle.clone()),
            None if fragment.is_none() => built.first().cloned(),
            None => None,
        };
        drop(known);
        let descriptor = selected.ok_or_else(|| ProtoError::UnknownTemplate(wanted.to_string()))?;

        // Other templates of the document are kept only if the selected one uses them.
        let mut unused: Vec<DescriptorHandle> = built
            .into_iter()
            .filter(|handle| !Rc::ptr_eq(handle, &descriptor))
            .collect();
        release_unreferenced(&mut unused, arena);

        let location = match fragment {
            Some(fragment) => format!("{document_name}#{fragment}"),
            None => document_name,
        };
        Ok(FetchedTemplate {
            descriptor,
            location,
        })
    }
}

impl TemplateLoader for JsonTemplateLoader {
    fn fetch_template(
        &mut self,
        request: &FetchRequest<'_>,
        arena: &mut NodeArena,
    ) -> ProtoResult<FetchedTemplate> {
        let mut failures: Vec<String> = Vec::new();
        for location in request.locations.iter().take(self.config.max_external_candidates) {
            let mark = arena.mark();
            match self.fetch_location(location, request, arena) {
                Ok(fetched) => {
                    info!(
                        template = request.name,
                        location = %fetched.location,
                        "external template fetched"
                    );
                    return Ok(fetched);
                }
                Err(err) => {
                    arena.release_since(mark);
                    debug!(template = request.name, location = %location, error = %err, "candidate skipped");
                    failures.push(format!("{location}: {err}"));
                }
            }
        }
        let reason = if failures.is_empty() {
            "no candidate locations".to_string()
        } else {
            failures.join("; ")
        };
        Err(ProtoError::Fetch {
            name: request.name.to_string(),
            reason,
        })
    }
}

fn strip_file_scheme(target: &str) -> &str {
    let rest = &target["file:".len()..];
    // `file:///abs/path` keeps its leading slash; `file://host/` is not supported.
    rest.strip_prefix("//").unwrap_or(rest)
}

fn base_directory(base_document: &str) -> Option<PathBuf> {
    let local = if SCHEME_RE
        .captures(base_document)
        .is_some_and(|caps| caps[1].eq_ignore_ascii_case("file"))
    {
        strip_file_scheme(base_document)
    } else {
        base_document
    };
    Path::new(local).parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, Diagnostics};
    use crate::models::FieldValue;
    use crate::proto::descriptor::{DescriptorStatus, ExternalSource, PrototypeDescriptor};
    use tempfile::TempDir;

    const LIBRARY: &str = r#"{
        "protos": [
            { "name": "First", "body": [{ "type": "Sphere" }] },
            {
                "name": "Remote",
                "interface": [
                    { "access": "exposedField", "name": "size", "type": "SFFloat",
                      "default": { "type": "SFFloat", "value": 4.0 } }
                ],
                "body": [{ "type": "Box", "is": { "size": "size" } }]
            }
        ]
    }"#;

    fn write_library(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, LIBRARY).unwrap();
        path
    }

    fn fetch(
        loader: &mut JsonTemplateLoader,
        name: &str,
        locations: &[String],
        base: Option<&str>,
    ) -> (ProtoResult<FetchedTemplate>, NodeArena) {
        let diagnostics = Diagnostics::new();
        let mut arena = NodeArena::new();
        let request = FetchRequest {
            name,
            locations,
            base_document: base,
            diagnostics: &diagnostics,
        };
        let result = loader.fetch_template(&request, &mut arena);
        (result, arena)
    }

    #[test]
    fn test_fragment_selects_template() {
        let dir = TempDir::new().unwrap();
        write_library(&dir, "lib.json");
        let base = dir.path().join("scene.json");
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());

        let (result, arena) = fetch(
            &mut loader,
            "Anything",
            &["lib.json#Remote".to_string()],
            base.to_str(),
        );
        let fetched = result.unwrap();
        assert!(fetched.location.ends_with("lib.json#Remote"));
        let descriptor = fetched.descriptor.borrow();
        assert_eq!(descriptor.name(), "Remote");
        assert_eq!(descriptor.field_default("size"), Some(&FieldValue::SFFloat(4.0)));
        // `First` was not asked for, so its Sphere is gone again.
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_without_fragment_prefers_requested_name() {
        let dir = TempDir::new().unwrap();
        let path = write_library(&dir, "lib.json");
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());
        let location = path.to_string_lossy().into_owned();

        let (result, _) = fetch(&mut loader, "Remote", &[location.clone()], None);
        assert_eq!(result.unwrap().descriptor.borrow().name(), "Remote");

        let (result, _) = fetch(&mut loader, "Unlisted", &[location], None);
        assert_eq!(result.unwrap().descriptor.borrow().name(), "First");
    }

    #[test]
    fn test_candidates_tried_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_library(&dir, "lib.json");
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());
        let locations = vec![
            "https://example.com/lib.json#Remote".to_string(),
            dir.path().join("missing.json").to_string_lossy().into_owned(),
            format!("file://{}#Remote", path.display()),
        ];

        let (result, _) = fetch(&mut loader, "Remote", &locations, None);
        assert!(result.unwrap().location.ends_with("lib.json#Remote"));
    }

    #[test]
    fn test_candidate_limit_and_failure_reason() {
        let dir = TempDir::new().unwrap();
        let path = write_library(&dir, "lib.json");
        let config = SceneConfig::from_json_str(r#"{ "max_external_candidates": 1 }"#).unwrap();
        let mut loader = JsonTemplateLoader::new(&config);
        let locations = vec![
            "nowhere.json".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        let (result, _) = fetch(&mut loader, "Remote", &locations, None);
        let Err(ProtoError::Fetch { name, reason }) = result else {
            panic!("expected a fetch error");
        };
        assert_eq!(name, "Remote");
        assert!(reason.contains("nowhere.json"));
    }

    #[test]
    fn test_templates_used_by_the_selected_one_are_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested.json");
        std::fs::write(
            &path,
            r#"{
                "protos": [
                    { "name": "Inner", "body": [{ "type": "Sphere" }] },
                    { "name": "Outer", "body": [{ "type": "Transform", "fields": {
                        "children": [{ "type": "Inner" }] } }] },
                    { "name": "Spare", "body": [{ "type": "Cone" }, { "type": "Inner" }] }
                ]
            }"#,
        )
        .unwrap();
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());
        let location = format!("{}#Outer", path.display());

        let (result, arena) = fetch(&mut loader, "Outer", &[location], None);
        assert_eq!(result.unwrap().descriptor.borrow().name(), "Outer");
        // Outer's Transform and nested use, plus Inner's Sphere.
        assert_eq!(arena.len(), 3);
        let kinds: Vec<_> = arena.iter().filter_map(|(_, node)| node.kind()).collect();
        assert!(!kinds.contains(&crate::graph::kind::NodeKind::Cone));
    }

    #[test]
    fn test_failed_candidate_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.json");
        std::fs::write(
            &broken,
            r#"{ "protos": [
                { "name": "Remote", "body": [{ "type": "Box" }] },
                { "name": "Later", "body": [{ "type": "Teapot" }] }
            ] }"#,
        )
        .unwrap();
        let good = write_library(&dir, "lib.json");
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());
        let locations = vec![
            broken.to_string_lossy().into_owned(),
            format!("{}#Remote", good.display()),
        ];

        let (result, arena) = fetch(&mut loader, "Remote", &locations, None);
        assert!(result.unwrap().location.ends_with("lib.json#Remote"));
        assert_eq!(arena.len(), 1);
        assert_eq!(
            arena.iter().next().and_then(|(_, node)| node.kind()),
            Some(crate::graph::kind::NodeKind::Box)
        );
    }

    #[test]
    fn test_disallowed_scheme() {
        let config = SceneConfig::from_json_str(r#"{ "allowed_schemes": ["FILE"] }"#).unwrap();
        let loader = JsonTemplateLoader::new(&config);
        let err = loader.resolve_path("ftp://host/lib.json", None).unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_search_paths() {
        let dir = TempDir::new().unwrap();
        write_library(&dir, "shared.json");
        let config = SceneConfig {
            search_paths: vec![dir.path().to_path_buf()],
            ..SceneConfig::default()
        };
        let loader = JsonTemplateLoader::new(&config);
        let resolved = loader.resolve_path("shared.json", Some("/elsewhere/scene.json")).unwrap();
        assert_eq!(resolved, dir.path().join("shared.json"));
    }

    #[test]
    fn test_descriptor_fetches_through_json_loader() {
        let dir = TempDir::new().unwrap();
        write_library(&dir, "lib.json");
        let base = dir.path().join("scene.json").to_string_lossy().into_owned();
        let diagnostics = Diagnostics::new();
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());
        let mut arena = NodeArena::new();
        let source = ExternalSource {
            locations: vec!["lib.json#Remote".to_string()],
            base_document: Some(base),
        };
        let mut descriptor = PrototypeDescriptor::external("Remote", source, diagnostics.clone());

        let nodes = descriptor.resolve_implementation(&mut arena, &mut loader);
        assert_eq!(nodes.len(), 1);
        assert_eq!(descriptor.status(), DescriptorStatus::Resolved);
        assert!(descriptor.actual_location().unwrap().ends_with("lib.json#Remote"));
        assert!(!diagnostics.has(DiagnosticKind::FetchFailed));
    }

    #[test]
    fn test_extern_chain_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.json");
        std::fs::write(
            &path,
            r#"{ "extern_protos": [{ "name": "Remote", "urls": ["other.json"] }] }"#,
        )
        .unwrap();
        let diagnostics = Diagnostics::new();
        let mut loader = JsonTemplateLoader::new(&SceneConfig::default());
        let mut arena = NodeArena::new();
        let source = ExternalSource {
            locations: vec![path.to_string_lossy().into_owned()],
            base_document: None,
        };
        let mut descriptor = PrototypeDescriptor::external("Remote", source, diagnostics.clone());

        assert!(descriptor.resolve_implementation(&mut arena, &mut loader).is_empty());
        assert_eq!(descriptor.status(), DescriptorStatus::Failed);
        assert!(diagnostics.has(DiagnosticKind::FetchFailed));
    }
}
