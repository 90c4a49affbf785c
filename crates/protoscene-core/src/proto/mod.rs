//! Template definitions and their use-sites.

pub mod descriptor;
pub mod instance;
