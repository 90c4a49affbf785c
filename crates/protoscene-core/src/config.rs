//! Scene configuration, loadable from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtoError, ProtoResult};
use crate::guards::{
    clamp_candidates, clamp_cascade_depth, DEFAULT_EVENT_CASCADE_DEPTH,
    DEFAULT_EXTERNAL_CANDIDATES,
};

/// Settings shared by a scene and its template loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Extra directories tried when a relative external location does not
    /// resolve next to the referring document.
    pub search_paths: Vec<PathBuf>,
    /// Longest chain of routed events delivered from one external event.
    pub max_cascade_depth: usize,
    /// How many candidate locations of an external template are tried.
    pub max_external_candidates: usize,
    /// URI schemes the loader will follow. Locations without a scheme are
    /// always treated as local paths.
    pub allowed_schemes: Vec<String>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            max_cascade_depth: DEFAULT_EVENT_CASCADE_DEPTH,
            max_external_candidates: DEFAULT_EXTERNAL_CANDIDATES,
            allowed_schemes: vec!["file".to_string()],
        }
    }
}

impl SceneConfig {
    pub fn from_json_str(text: &str) -> ProtoResult<Self> {
        let config: SceneConfig = serde_json::from_str(text)?;
        config.validated()
    }

    pub fn from_path(path: impl AsRef<Path>) -> ProtoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values that cannot work and clamp the rest into the guards.
    fn validated(mut self) -> ProtoResult<Self> {
        if self.max_cascade_depth == 0 {
            return Err(ProtoError::Config(
                "max_cascade_depth must be at least 1".to_string(),
            ));
        }
        if self.max_external_candidates == 0 {
            return Err(ProtoError::Config(
                "max_external_candidates must be at least 1".to_string(),
            ));
        }
        self.max_cascade_depth = clamp_cascade_depth(self.max_cascade_depth);
        self.max_external_candidates = clamp_candidates(self.max_external_candidates);
        self.allowed_schemes = self
            .allowed_schemes
            .iter()
            .map(|scheme| scheme.trim().to_ascii_lowercase())
            .filter(|scheme| !scheme.is_empty())
            .collect();
        Ok(self)
    }

    pub fn allows_scheme(&self, scheme: &str) -> bool {
        self.allowed_schemes
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
    }
}
