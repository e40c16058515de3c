//! Access to the output tree, rooted at the directory the host generated.
//!
//! Every path going in or out is relative to the root. Writes are recorded
//! by the [`Reporter`].

use std::collections::BTreeMap;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::MatchOptions;
use tracing::debug;

use crate::error::{PostbuildError, Result};
use crate::files::FileInfo;
use crate::report::{FileReport, Reporter};

const GLOB_OPTS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

#[derive(Debug)]
pub struct Filesystem {
    root: Utf8PathBuf,
    path_prefix: String,
    reporter: Reporter,
}

impl Filesystem {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            path_prefix: String::new(),
            reporter: Reporter::default(),
        }
    }

    /// URL prefix stripped from hrefs before they are resolved.
    pub fn with_path_prefix(mut self, prefix: &str) -> Self {
        self.path_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Files under the root matching `pattern`, relative to the root.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<Utf8PathBuf>> {
        let root = self.root.clone();
        let pattern = format!("{}/{}", glob::Pattern::escape(root.as_str()), pattern);

        tokio::task::spawn_blocking(move || -> Result<Vec<Utf8PathBuf>> {
            let mut paths = Vec::new();
            for entry in glob::glob_with(&pattern, GLOB_OPTS)? {
                let path = Utf8PathBuf::try_from(entry?)?;
                if !path.is_file() {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&root) {
                    paths.push(relative.to_path_buf());
                }
            }
            debug!(pattern = %pattern, files = paths.len(), "glob");
            Ok(paths)
        })
        .await?
    }

    /// Reads a text file, failing on content that isn't UTF-8.
    pub async fn read(&self, path: &Utf8Path) -> Result<String> {
        tokio::fs::read_to_string(self.root.join(path))
            .await
            .map_err(PostbuildError::fs("read", path))
    }

    pub async fn read_bytes(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        tokio::fs::read(self.root.join(path))
            .await
            .map_err(PostbuildError::fs("read", path))
    }

    /// Writes a new file, creating missing parent directories.
    pub async fn create(
        &self,
        path: &Utf8Path,
        data: impl AsRef<[u8]>,
        meta: BTreeMap<String, String>,
    ) -> Result<()> {
        let data = data.as_ref();
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(PostbuildError::fs("create", path))?;
        }
        tokio::fs::write(&target, data)
            .await
            .map_err(PostbuildError::fs("create", path))?;

        self.reporter
            .add(FileReport::create(path.as_str(), data.len() as u64, meta));
        Ok(())
    }

    /// Overwrites an existing file, which must already be there.
    pub async fn update(
        &self,
        path: &Utf8Path,
        data: impl AsRef<[u8]>,
        meta: BTreeMap<String, String>,
    ) -> Result<()> {
        let data = data.as_ref();
        let target = self.root.join(path);
        let previous = tokio::fs::metadata(&target)
            .await
            .map_err(PostbuildError::fs("update", path))?;
        if !previous.is_file() {
            return Err(PostbuildError::Filesystem {
                action: "update",
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file"),
            });
        }

        tokio::fs::write(&target, data)
            .await
            .map_err(PostbuildError::fs("update", path))?;

        self.reporter.add(FileReport::update(
            path.as_str(),
            data.len() as u64,
            previous.len(),
            meta,
        ));
        Ok(())
    }

    /// Lowercase extension of `path`, empty if it has none.
    pub fn extension(path: &Utf8Path) -> String {
        path.extension().map(str::to_lowercase).unwrap_or_default()
    }

    /// Resolves an href found in `file` to a path.
    ///
    /// Empty hrefs and hrefs with a scheme resolve to nothing. Absolute hrefs
    /// are resolved against the root (after stripping the path prefix),
    /// relative ones against the directory of `file`. The query and fragment
    /// are dropped.
    ///
    /// With `relative` the result is relative to the root, otherwise it is
    /// absolute. With `strict`, hrefs escaping the root resolve to nothing;
    /// without it they resolve to their absolute path.
    pub fn resolve_href(&self, file: &FileInfo, href: &str, relative: bool, strict: bool) -> Option<Utf8PathBuf> {
        let href = href.trim();
        let href = href.split(['?', '#']).next().unwrap_or_default();
        if href.is_empty() || has_scheme(href) {
            return None;
        }

        let absolute = if href.starts_with('/') {
            let href = match href.strip_prefix(self.path_prefix.as_str()) {
                Some(rest) if !self.path_prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
                _ => href,
            };
            self.root.join(href.trim_start_matches('/'))
        } else {
            let dir = file.path.parent().unwrap_or(&self.root);
            dir.join(href)
        };
        let absolute = normalize_path(&absolute);

        match absolute.strip_prefix(&self.root) {
            Ok(inner) if relative => Some(inner.to_path_buf()),
            Ok(_) => Some(absolute),
            Err(_) if strict => None,
            Err(_) => Some(absolute),
        }
    }
}

fn has_scheme(href: &str) -> bool {
    if href.starts_with("//") {
        return true;
    }
    match href.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Lexically resolves `.` and `..` components.
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => {}
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }

    ret
}
