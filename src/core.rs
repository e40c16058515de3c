use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

/// Map of original asset filenames to the hashed ones emitted by the host
/// bundler.
pub type AssetsManifest = BTreeMap<String, String>;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// Name of the directory the host writes the generated website to.
pub const PUBLIC_DIR: &str = "public";

/// What the host build system tells us about the site being built.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The name of the generator (defaults to "postbuild").
    pub generator: &'static str,
    /// Root directory of the site project.
    pub root: Utf8PathBuf,
    /// Prefix every public URL is served under, empty for none.
    pub path_prefix: String,
}

impl Environment {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            generator: "postbuild",
            root: root.into(),
            path_prefix: String::new(),
        }
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.path_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    /// Directory holding the generated output, every task works inside it.
    pub fn public(&self) -> Utf8PathBuf {
        self.root.join(PUBLIC_DIR)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}
