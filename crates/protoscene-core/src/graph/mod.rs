//! Node graph: the per-scene arena, the built-in node catalog, DEF-name
//! scopes, and graph cloning.

pub mod arena;
pub mod kind;
pub mod namespace;
pub mod node;
