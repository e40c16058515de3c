//! Handles for the files found in the output tree.
//!
//! Each file goes through three stages, `read`, `process` and `write`, and
//! the kind of the file decides which events are fired along the way:
//!
//! | kind | read | process | write |
//! |---|---|---|---|
//! | structured | `parse`, `tree` | `node` | `serialize`, `write` |
//! | opaque | | `content` | |
//!
//! Opaque files are carried as raw bytes, so binary files pass through
//! untouched unless a handler rewrites them.
pub mod document;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::AssetsManifest;
use crate::error::{PostbuildError, Result};
use crate::filesystem::Filesystem;
use crate::task::{EventName, GroupKey, Payload, Tasks};

use self::document::{Document, Node};

/// Extensions handled as structured documents.
const STRUCTURED: &[&str] = &["html", "htm"];

/// What tasks know about the file an event is fired for.
#[derive(Debug)]
pub struct FileInfo {
    /// Path relative to the output root, the key tasks are routed by.
    pub relative: Utf8PathBuf,
    /// Absolute path on disk.
    pub path: Utf8PathBuf,
    pub extension: String,
    meta: Mutex<BTreeMap<String, String>>,
}

impl FileInfo {
    pub fn new(root: &Utf8Path, relative: impl Into<Utf8PathBuf>) -> Self {
        let relative = relative.into();
        Self {
            path: root.join(&relative),
            extension: Filesystem::extension(&relative),
            relative,
            meta: Mutex::new(BTreeMap::new()),
        }
    }

    /// Attaches a note to the write report of this file.
    pub fn set_meta(&self, key: impl Into<String>, value: impl ToString) {
        self.meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.to_string());
    }

    pub fn meta(&self) -> BTreeMap<String, String> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Stage state of a file, by kind.
#[derive(Debug)]
pub enum FileKind {
    Structured(Option<Document>),
    Opaque(Option<Vec<u8>>),
}

impl FileKind {
    fn name(&self) -> &'static str {
        match self {
            FileKind::Structured(_) => "structured",
            FileKind::Opaque(_) => "opaque",
        }
    }
}

/// Shared by every file handle of a run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileContext<'a> {
    pub tasks: &'a Tasks,
    pub filesystem: &'a Arc<Filesystem>,
    pub assets: &'a Arc<AssetsManifest>,
}

impl FileContext<'_> {
    fn payload(&self, file: &Arc<FileInfo>) -> Payload {
        Payload::new()
            .with_file(file.clone())
            .with_filesystem(self.filesystem.clone())
            .with_assets(self.assets.clone())
    }
}

/// One discovered file on its way through the pipeline.
#[derive(Debug)]
pub struct FileHandle {
    info: Arc<FileInfo>,
    kind: FileKind,
}

impl FileHandle {
    /// Picks the handle kind from the file extension, anything not known to
    /// be structured is opaque.
    pub fn new(relative: impl Into<Utf8PathBuf>, filesystem: &Filesystem) -> Self {
        let info = FileInfo::new(filesystem.root(), relative);
        let kind = if STRUCTURED.contains(&info.extension.as_str()) {
            FileKind::Structured(None)
        } else {
            FileKind::Opaque(None)
        };

        Self {
            info: Arc::new(info),
            kind,
        }
    }

    pub fn relative(&self) -> &Utf8Path {
        &self.info.relative
    }

    pub fn info(&self) -> &Arc<FileInfo> {
        &self.info
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub(crate) async fn read(&mut self, cx: &FileContext<'_>) -> Result<()> {
        let group = self.group();

        match &mut self.kind {
            FileKind::Structured(slot) => {
                let text = cx.filesystem.read(&self.info.relative).await?;
                let html = cx
                    .tasks
                    .fold(&group, EventName::Parse, cx.payload(&self.info), "html", text)
                    .await?;
                let document = Document::parse(&html);
                cx.tasks
                    .run(
                        &group,
                        EventName::Tree,
                        cx.payload(&self.info).with("document", document.clone()),
                    )
                    .await?;
                *slot = Some(document);
            }
            FileKind::Opaque(slot) => {
                *slot = Some(cx.filesystem.read_bytes(&self.info.relative).await?);
            }
        }

        Ok(())
    }

    pub(crate) async fn process(&mut self, cx: &FileContext<'_>) -> Result<()> {
        let group = self.group();
        let state = self.kind.name();

        match &mut self.kind {
            FileKind::Structured(slot) => {
                let document = slot.as_mut().ok_or(PostbuildError::InvalidState {
                    action: "process",
                    state,
                })?;
                if !cx.tasks.handles(&self.info.relative, EventName::Node) {
                    return Ok(());
                }

                let mut nodes = Vec::with_capacity(document.nodes().len());
                for node in std::mem::take(document.nodes_mut()) {
                    let node: Option<Node> = cx
                        .tasks
                        .fold(&group, EventName::Node, cx.payload(&self.info), "node", Some(node))
                        .await?;
                    nodes.extend(node);
                }
                *document.nodes_mut() = nodes;
            }
            FileKind::Opaque(slot) => {
                let content = slot.take().ok_or(PostbuildError::InvalidState {
                    action: "process",
                    state,
                })?;
                let content = cx
                    .tasks
                    .fold(&group, EventName::Content, cx.payload(&self.info), "content", content)
                    .await?;
                *slot = Some(content);
            }
        }

        Ok(())
    }

    /// Writes the file back, dropping its content.
    pub(crate) async fn write(&mut self, cx: &FileContext<'_>) -> Result<()> {
        let group = self.group();
        let state = self.kind.name();

        let data = match &mut self.kind {
            FileKind::Structured(slot) => {
                let document = slot.take().ok_or(PostbuildError::InvalidState {
                    action: "write",
                    state,
                })?;
                let document = cx
                    .tasks
                    .fold(&group, EventName::Serialize, cx.payload(&self.info), "document", document)
                    .await?;
                cx.tasks
                    .fold(
                        &group,
                        EventName::Write,
                        cx.payload(&self.info),
                        "html",
                        document.serialize(),
                    )
                    .await?
                    .into_bytes()
            }
            FileKind::Opaque(slot) => slot.take().ok_or(PostbuildError::InvalidState {
                action: "write",
                state,
            })?,
        };

        cx.filesystem
            .update(&self.info.relative, data, self.info.meta())
            .await
    }

    fn group(&self) -> GroupKey {
        GroupKey::Extension(self.info.extension.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::task::{EventValue, Handler, Task};

    struct Fixture {
        _dir: tempfile::TempDir,
        filesystem: Arc<Filesystem>,
        tasks: Tasks,
        assets: Arc<AssetsManifest>,
    }

    impl Fixture {
        async fn new<C: AsRef<[u8]>>(files: &[(&str, C)], tasks: Vec<Task>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
            for (name, content) in files {
                std::fs::write(root.join(name), content).unwrap();
            }

            let filesystem = Arc::new(Filesystem::new(root));
            let mut registry = Tasks::new();
            for task in tasks {
                registry.register(task).unwrap();
            }
            registry.resolve_options(&json!({})).unwrap();
            registry.get_filenames(&filesystem).await.unwrap();

            Self {
                _dir: dir,
                filesystem,
                tasks: registry,
                assets: Arc::new(AssetsManifest::new()),
            }
        }

        fn cx(&self) -> FileContext<'_> {
            FileContext {
                tasks: &self.tasks,
                filesystem: &self.filesystem,
                assets: &self.assets,
            }
        }

        fn contents(&self, name: &str) -> String {
            std::fs::read_to_string(self.filesystem.root().join(name)).unwrap()
        }
    }

    #[test]
    fn test_kind_by_extension() {
        let fs = Filesystem::new("/site/public");
        assert!(matches!(FileHandle::new("a/index.html", &fs).kind(), FileKind::Structured(None)));
        assert!(matches!(FileHandle::new("app.js", &fs).kind(), FileKind::Opaque(None)));
        assert!(matches!(FileHandle::new("LICENSE", &fs).kind(), FileKind::Opaque(None)));

        let handle = FileHandle::new("a/index.html", &fs);
        assert_eq!(handle.info().path, Utf8PathBuf::from("/site/public/a/index.html"));
        assert_eq!(handle.info().extension, "html");
    }

    #[tokio::test]
    async fn test_opaque_content_chain() {
        let upper = Task::new("upper").on(
            "txt",
            EventName::Content,
            Handler::sync(|args| Ok(args.text("content").unwrap_or_default().to_uppercase())),
        );
        let trim = Task::new("trim").on(
            "txt",
            EventName::Content,
            Handler::sync(|args| {
                args.file().unwrap().set_meta("trimmed", true);
                Ok(args.text("content").unwrap_or_default().trim().to_string())
            }),
        );
        let fixture = Fixture::new(&[("a.txt", "  hello  ")], vec![upper, trim]).await;
        let cx = fixture.cx();

        let mut handle = FileHandle::new("a.txt", &fixture.filesystem);
        handle.read(&cx).await.unwrap();
        handle.process(&cx).await.unwrap();
        handle.write(&cx).await.unwrap();

        assert_eq!(fixture.contents("a.txt"), "HELLO");
        assert!(matches!(handle.kind(), FileKind::Opaque(None)));

        let reports = fixture.filesystem.reporter().reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].meta.get("trimmed").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_structured_events() {
        let task = Task::new("rewrite")
            .on(
                "html",
                EventName::Parse,
                Handler::sync(|args| Ok(args.text("html").unwrap_or_default().replace("old", "new"))),
            )
            .on(
                "html",
                EventName::Tree,
                Handler::sync(|args| {
                    let count = args
                        .get("document")
                        .and_then(EventValue::as_document)
                        .map(|doc| doc.elements("img").count())
                        .unwrap_or_default();
                    args.file().unwrap().set_meta("images", count);
                    Ok(())
                }),
            )
            .on(
                "html",
                EventName::Node,
                Handler::sync(|mut args| {
                    let mut node = args.take("node").and_then(EventValue::into_node).unwrap();
                    if let Some(element) = node.as_element_mut() {
                        element.remove_attr("data-drop");
                    }
                    Ok(node)
                }),
            )
            .on(
                "html",
                EventName::Write,
                Handler::sync(|args| Ok(format!("{}\n", args.text("html").unwrap_or_default()))),
            );

        let fixture = Fixture::new(
            &[("index.html", "<p data-drop class=old>old</p><img src=a.png>")],
            vec![task],
        )
        .await;
        let cx = fixture.cx();

        let mut handle = FileHandle::new("index.html", &fixture.filesystem);
        handle.read(&cx).await.unwrap();
        handle.process(&cx).await.unwrap();
        handle.write(&cx).await.unwrap();

        assert_eq!(
            fixture.contents("index.html"),
            "<p class=\"new\">new</p><img src=\"a.png\">\n"
        );
        let reports = fixture.filesystem.reporter().reports();
        assert_eq!(reports[0].meta.get("images").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_binary_content() {
        let stamp = Task::new("stamp").on(
            "/**/*.png",
            EventName::Content,
            Handler::sync(|args| {
                let file = args.file().unwrap();
                file.set_meta("text", args.text("content").is_some());
                let mut bytes = args.bytes("content").unwrap().to_vec();
                bytes.push(0x00);
                Ok(bytes)
            }),
        );
        let logo = [0x89, b'P', b'N', b'G', 0xff, 0xfe];
        let fixture = Fixture::new(&[("logo.png", logo)], vec![stamp]).await;
        let cx = fixture.cx();

        let mut handle = FileHandle::new("logo.png", &fixture.filesystem);
        handle.read(&cx).await.unwrap();
        assert!(matches!(handle.kind(), FileKind::Opaque(Some(bytes)) if bytes == &logo));
        handle.process(&cx).await.unwrap();
        handle.write(&cx).await.unwrap();

        let written = std::fs::read(fixture.filesystem.root().join("logo.png")).unwrap();
        assert_eq!(written, [0x89, b'P', b'N', b'G', 0xff, 0xfe, 0x00]);
        let reports = fixture.filesystem.reporter().reports();
        assert_eq!(reports[0].meta.get("text").map(String::as_str), Some("false"));
    }

    #[tokio::test]
    async fn test_detach_nodes() {
        let strip = Task::new("strip").on(
            "html",
            EventName::Node,
            Handler::sync(|mut args| {
                let node = args.take("node").and_then(EventValue::into_node);
                Ok(node.filter(|node| node.as_element().is_none_or(|element| element.name != "meta")))
            }),
        );
        let fixture = Fixture::new(
            &[("index.html", "<meta http-equiv=\"refresh\" content=\"0\"><p>hi</p>")],
            vec![strip],
        )
        .await;
        let cx = fixture.cx();

        let mut handle = FileHandle::new("index.html", &fixture.filesystem);
        handle.read(&cx).await.unwrap();
        handle.process(&cx).await.unwrap();
        handle.write(&cx).await.unwrap();

        assert_eq!(fixture.contents("index.html"), "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_stage_out_of_order() {
        let task = Task::new("t").on("css", EventName::Content, Handler::sync(|_| Ok("")));
        let fixture = Fixture::new(&[("a.css", "p{}")], vec![task]).await;
        let cx = fixture.cx();

        let mut handle = FileHandle::new("a.css", &fixture.filesystem);
        let err = handle.write(&cx).await.unwrap_err();
        assert!(matches!(err, PostbuildError::InvalidState { action: "write", .. }));
    }
}
