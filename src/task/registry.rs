use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use futures::FutureExt;
use futures::future::try_join_all;
use indexmap::IndexMap;
use schemars::Schema;
use serde_json::Value;
use tracing::debug;

use crate::error::{PostbuildError, Result};
use crate::filesystem::Filesystem;
use crate::options::{as_object, merge};

use super::{Accumulate, Event, EventArgs, EventName, EventValue, GroupKey, Payload, Task};

/// Registered tasks ordered so the most recently registered one comes first.
///
/// Every dispatch walks tasks in this order, which lets a task registered
/// later (like the inline `user` task) see an event before the built-ins.
#[derive(Debug, Default)]
struct RegistrationOrder(VecDeque<Arc<Task>>);

impl RegistrationOrder {
    fn push_latest(&mut self, task: Arc<Task>) {
        self.0.push_front(task);
    }

    fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|task| task.id() == id)
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|task| task.id() != id);
        self.0.len() != before
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.0.iter()
    }
}

/// What `resolve_options` computed for an enabled task.
#[derive(Debug)]
struct Resolved {
    options: Arc<Value>,
    ignore: HashSet<Utf8PathBuf>,
}

/// Interested `(task, group)` pairs for one discovered file, in dispatch order.
type Interest = Vec<(Arc<Task>, GroupKey)>;

/// The task registry, owns every task and routes events to their handlers.
#[derive(Debug, Default)]
pub struct Tasks {
    registered: RegistrationOrder,
    /// Enabled tasks, same order as `registered`.
    active: Vec<Arc<Task>>,
    resolved: HashMap<String, Resolved>,
    ignore: HashSet<Utf8PathBuf>,
    file_events: HashMap<Utf8PathBuf, Interest>,
}

impl Tasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.registered.contains(task.id()) {
            return Err(PostbuildError::DuplicateTaskId(task.id().to_string()));
        }
        task.validate()?;

        debug!(task = task.id(), events = ?task, "registered task");
        self.registered.push_latest(Arc::new(task));
        Ok(())
    }

    /// Drops a registered task, returns whether it was there.
    ///
    /// Resolved options are left as they are, resolve them again before
    /// dispatching.
    pub(crate) fn unregister(&mut self, id: &str) -> bool {
        self.registered.remove(id)
    }

    /// Resolves the options of every registered task against the plugin
    /// options and narrows the active tasks to the enabled ones.
    ///
    /// Returns the plugin options with every enabled task's resolved options
    /// under its id. Disabled tasks have their key removed.
    pub fn resolve_options(&mut self, options: &Value) -> Result<Value> {
        let plugin = as_object(options, "plugin options")?;
        let mut resolved = plugin.clone();

        self.ignore = match plugin.get("ignore") {
            Some(ignore) => paths(ignore, "ignore")?,
            None => HashSet::new(),
        };
        self.active.clear();
        self.resolved.clear();
        self.file_events.clear();

        for task in self.registered.iter() {
            let id = task.id();
            let mut task_options = task.option_defaults();
            if let Some(user) = plugin.get(id) {
                as_object(user, &format!("options of task \"{id}\""))?;
                merge(&mut task_options, user);
            }

            let enabled = match task_options.get("enabled") {
                None => true,
                Some(Value::Bool(enabled)) => *enabled,
                Some(other) => {
                    return Err(PostbuildError::Options(format!(
                        "\"{id}.enabled\" must be a boolean, got {other}"
                    )));
                }
            };

            if !enabled {
                debug!(task = id, "task disabled");
                resolved.remove(id);
                continue;
            }

            let ignore = match task_options.get("ignore") {
                Some(ignore) => paths(ignore, &format!("{id}.ignore"))?,
                None => HashSet::new(),
            };

            resolved.insert(id.to_string(), task_options.clone());
            self.resolved.insert(
                id.to_string(),
                Resolved {
                    options: Arc::new(task_options),
                    ignore,
                },
            );
            self.active.push(task.clone());
        }

        Ok(Value::Object(resolved))
    }

    /// Finds every file some active task is interested in.
    ///
    /// Returns the files grouped by their real extension, each group in
    /// discovery order, and keeps the per-file interest for dispatch.
    pub async fn get_filenames(&mut self, fs: &Filesystem) -> Result<IndexMap<String, Vec<Utf8PathBuf>>> {
        // pattern -> interested (task, group), in first-seen order
        let mut patterns: IndexMap<String, Interest> = IndexMap::new();
        for task in &self.active {
            for group in task.events().file_groups() {
                if let Some(pattern) = group.pattern() {
                    patterns
                        .entry(pattern)
                        .or_default()
                        .push((task.clone(), group.clone()));
                }
            }
        }

        let matches = try_join_all(patterns.keys().map(|pattern| fs.glob(pattern))).await?;

        // first pass: collect interest, remember the lowest pattern index
        let mut priority: IndexMap<Utf8PathBuf, usize> = IndexMap::new();
        let mut file_events: HashMap<Utf8PathBuf, Interest> = HashMap::new();
        for (index, (paths, (_, interest))) in matches.into_iter().zip(&patterns).enumerate() {
            for path in paths {
                if self.ignore.contains(&path) {
                    continue;
                }
                priority.entry(path.clone()).or_insert(index);
                file_events
                    .entry(path)
                    .or_default()
                    .extend(interest.iter().cloned());
            }
        }

        // second pass: order and apply per-task ignores
        priority.sort_by(|_, a, _, b| a.cmp(b));

        let mut filenames: IndexMap<String, Vec<Utf8PathBuf>> = IndexMap::new();
        self.file_events.clear();
        for path in priority.into_keys() {
            let Some(mut interest) = file_events.remove(&path) else {
                continue;
            };
            interest.retain(|(task, _)| {
                self.resolved
                    .get(task.id())
                    .is_some_and(|resolved| !resolved.ignore.contains(&path))
            });
            if interest.is_empty() {
                continue;
            }

            filenames
                .entry(Filesystem::extension(&path))
                .or_default()
                .push(path.clone());
            self.file_events.insert(path, interest);
        }

        debug!(
            files = self.file_events.len(),
            extensions = filenames.len(),
            "discovered files"
        );
        Ok(filenames)
    }

    /// Dispatches an event and collects every handler's return value in
    /// dispatch order.
    pub async fn run(&self, group: &GroupKey, name: EventName, payload: Payload) -> Result<Vec<EventValue>> {
        let mut results = Vec::new();
        for (task, group) in self.matching(group, name, &payload) {
            results.push(self.invoke(task, group, name, payload.clone()).await?);
        }
        Ok(results)
    }

    /// Dispatches an event as a fold over `payload[field]`: every handler
    /// sees the value returned by the previous one and must return a value
    /// of the same kind. Text is taken where bytes are expected.
    ///
    /// With no matching handler the original value is returned untouched.
    /// A detached node ends the fold, later handlers don't see it.
    pub async fn run_fold(
        &self,
        group: &GroupKey,
        name: EventName,
        mut payload: Payload,
        field: &'static str,
    ) -> Result<EventValue> {
        let Some(mut state) = payload.take(field) else {
            return Err(PostbuildError::MissingAccumulator {
                event: Event {
                    group: group.clone(),
                    name,
                }
                .to_string(),
                field: field.to_string(),
            });
        };

        let expected = state.kind();
        for (task, group) in self.matching(group, name, &payload) {
            let mut args = payload.clone();
            args.insert(field, state);
            let value = self.invoke(task, group, name, args).await?.conform(expected);
            if value.kind() != expected {
                return Err(PostbuildError::AccumulatorTypeMismatch {
                    task: task.id().to_string(),
                    event: format!("{group}.{name}"),
                    expected,
                    found: value.kind(),
                });
            }
            state = value;
            if state.is_detached() {
                debug!(task = task.id(), "node detached");
                break;
            }
        }

        Ok(state)
    }

    /// Typed [`Tasks::run_fold`] starting from `init`.
    pub async fn fold<T: Accumulate>(
        &self,
        group: &GroupKey,
        name: EventName,
        payload: Payload,
        field: &'static str,
        init: T,
    ) -> Result<T> {
        let value = self
            .run_fold(group, name, payload.with(field, init), field)
            .await?;

        // run_fold keeps the kind of the initial value
        let found = value.kind();
        T::from_value(value).ok_or_else(|| PostbuildError::AccumulatorTypeMismatch {
            task: String::new(),
            event: format!("{group}.{name}"),
            expected: T::KIND,
            found,
        })
    }

    /// Whether any task interested in `file` listens to `name`.
    pub fn handles(&self, file: &Utf8Path, name: EventName) -> bool {
        self.file_events
            .get(file)
            .is_some_and(|interest| {
                interest
                    .iter()
                    .any(|(task, group)| task.events().defines(group, name))
            })
    }

    /// Resolved options of an active task.
    pub fn options_for(&self, id: &str) -> Option<&Arc<Value>> {
        self.resolved.get(id).map(|resolved| &resolved.options)
    }

    /// Schema of every registered task, keyed by task id.
    pub fn options_schemas(&self) -> BTreeMap<String, Schema> {
        self.registered
            .iter()
            .map(|task| (task.id().to_string(), task.options_schema()))
            .collect()
    }

    /// Enabled tasks, most recently registered first.
    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.active.iter().map(Arc::as_ref)
    }

    /// Every registered task, most recently registered first.
    pub fn registered(&self) -> impl Iterator<Item = &Task> {
        self.registered.iter().map(Arc::as_ref)
    }

    fn matching<'a>(
        &'a self,
        group: &'a GroupKey,
        name: EventName,
        payload: &Payload,
    ) -> Vec<(&'a Task, &'a GroupKey)> {
        match payload.file() {
            Some(file) => self
                .file_events
                .get(&file.relative)
                .map(|interest| {
                    interest
                        .iter()
                        .filter(|(task, group)| task.events().defines(group, name))
                        .map(|(task, group)| (task.as_ref(), group))
                        .collect()
                })
                .unwrap_or_default(),
            None => self
                .active
                .iter()
                .filter(|task| task.events().defines(group, name))
                .map(|task| (task.as_ref(), group))
                .collect(),
        }
    }

    async fn invoke(&self, task: &Task, group: &GroupKey, name: EventName, payload: Payload) -> Result<EventValue> {
        let event = Event {
            group: group.clone(),
            name,
        };
        let Some(handler) = task.events().get(group, name) else {
            return Ok(EventValue::Unit);
        };

        let args = EventArgs {
            options: self.options_for(task.id()).cloned().unwrap_or_default(),
            event: event.clone(),
            payload,
        };

        debug!(task = task.id(), event = %event, "dispatching");

        // called inside the future, panics before the first await count too
        let result = AssertUnwindSafe(async { handler.call(args).await })
            .catch_unwind()
            .await;

        let source = match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Task panicked: {s}")
                } else {
                    String::from("Task panicked with unknown payload")
                };
                anyhow::anyhow!(msg)
            }
        };

        Err(PostbuildError::TaskExecution {
            task: task.id().to_string(),
            event: event.to_string(),
            source,
        })
    }
}

fn paths(value: &Value, what: &str) -> Result<HashSet<Utf8PathBuf>> {
    let invalid = || PostbuildError::Options(format!("\"{what}\" must be a list of paths, got {value}"));
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|path| {
            path.as_str()
                .map(|path| Utf8PathBuf::from(path.trim_start_matches('/')))
                .ok_or_else(invalid)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::files::FileInfo;
    use crate::files::document::Node;
    use crate::task::Handler;

    fn noop() -> Handler {
        Handler::sync(|_| Ok(()))
    }

    fn echo(id: &'static str) -> Handler {
        Handler::sync(move |_| Ok(id))
    }

    fn touch(root: &Utf8Path, files: &[&str]) {
        for file in files {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "x").unwrap();
        }
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_duplicate_id() {
        let mut tasks = Tasks::new();
        tasks.register(Task::new("a").on("on", EventName::Bootstrap, noop())).unwrap();
        let err = tasks
            .register(Task::new("a").on("html", EventName::Parse, noop()))
            .unwrap_err();
        assert!(matches!(err, PostbuildError::DuplicateTaskId(id) if id == "a"));
    }

    #[test]
    fn test_unregister() {
        let mut tasks = Tasks::new();
        tasks.register(Task::new("a").on("on", EventName::Bootstrap, noop())).unwrap();
        assert!(tasks.unregister("a"));
        assert!(!tasks.unregister("a"));
        assert_eq!(tasks.registered().count(), 0);

        tasks.register(Task::new("a").on("on", EventName::Bootstrap, noop())).unwrap();
    }

    #[test]
    fn test_empty_groups() {
        let err = Tasks::new().register(Task::new("empty")).unwrap_err();
        assert!(matches!(err, PostbuildError::EmptyEventGroups(_)));
    }

    #[test]
    fn test_resolve_options_idempotent() {
        let mut tasks = Tasks::new();
        tasks
            .register(
                Task::new("purge")
                    .on("html", EventName::Parse, noop())
                    .defaults(json!({ "level": 1 })),
            )
            .unwrap();
        tasks.register(Task::new("off").on("css", EventName::Content, noop())).unwrap();

        let input = json!({ "purge": { "level": 3 }, "off": { "enabled": false } });
        let first = tasks.resolve_options(&input).unwrap();
        let second = tasks.resolve_options(&input).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            json!({ "purge": { "enabled": true, "ignore": [], "level": 3 } })
        );
        let active: Vec<_> = tasks.active_tasks().map(Task::id).collect();
        assert_eq!(active, ["purge"]);
        assert!(tasks.options_for("off").is_none());
    }

    #[test]
    fn test_resolve_rejects_bad_options() {
        let mut tasks = Tasks::new();
        tasks.register(Task::new("a").on("on", EventName::Bootstrap, noop())).unwrap();

        assert!(tasks.resolve_options(&json!([])).is_err());
        assert!(tasks.resolve_options(&json!({ "a": 1 })).is_err());
        assert!(tasks.resolve_options(&json!({ "a": { "enabled": "no" } })).is_err());
        assert!(tasks.resolve_options(&json!({ "ignore": "x.html" })).is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_order_latest_first() {
        let mut tasks = Tasks::new();
        tasks.register(Task::new("first").on("on", EventName::Bootstrap, echo("first"))).unwrap();
        tasks.register(Task::new("second").on("on", EventName::Bootstrap, echo("second"))).unwrap();
        tasks.register(Task::new("quiet").on("on", EventName::Shutdown, noop())).unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let results = tasks
            .run(&GroupKey::Lifecycle, EventName::Bootstrap, Payload::new())
            .await
            .unwrap();
        assert_eq!(results, [EventValue::from("second"), EventValue::from("first")]);
    }

    #[tokio::test]
    async fn test_disabled_task_gets_nothing() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut tasks = Tasks::new();
        tasks
            .register(Task::new("off").on(
                "on",
                EventName::Bootstrap,
                Handler::sync(move |_| {
                    *counter.lock().unwrap() += 1;
                    Ok(())
                }),
            ))
            .unwrap();
        tasks.resolve_options(&json!({ "off": { "enabled": false } })).unwrap();

        let results = tasks
            .run(&GroupKey::Lifecycle, EventName::Bootstrap, Payload::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(tasks.active_tasks().count(), 0);
    }

    #[tokio::test]
    async fn test_fold_identity() {
        let tasks = Tasks::new();
        let value = tasks
            .run_fold(
                &GroupKey::extension("html"),
                EventName::Parse,
                Payload::new().with("html", "<p>"),
                "html",
            )
            .await
            .unwrap();
        assert_eq!(value, EventValue::from("<p>"));
    }

    #[tokio::test]
    async fn test_fold_missing_field() {
        let err = Tasks::new()
            .run_fold(&GroupKey::Lifecycle, EventName::Bootstrap, Payload::new(), "html")
            .await
            .unwrap_err();
        assert!(matches!(err, PostbuildError::MissingAccumulator { field, .. } if field == "html"));
    }

    #[tokio::test]
    async fn test_fold_chains_handlers() {
        let append = |suffix: &'static str| {
            Handler::sync(move |args| Ok(format!("{}{suffix}", args.text("html").unwrap_or_default())))
        };
        let mut tasks = Tasks::new();
        tasks.register(Task::new("a").on("on", EventName::Postbuild, append("a"))).unwrap();
        tasks.register(Task::new("b").on("on", EventName::Postbuild, append("b"))).unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let value = tasks
            .fold(
                &GroupKey::Lifecycle,
                EventName::Postbuild,
                Payload::new(),
                "html",
                String::from(">"),
            )
            .await
            .unwrap();
        assert_eq!(value, ">ba");
    }

    #[tokio::test]
    async fn test_fold_type_mismatch() {
        let mut tasks = Tasks::new();
        tasks.register(Task::new("bad").on("on", EventName::Postbuild, noop())).unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let err = tasks
            .run_fold(
                &GroupKey::Lifecycle,
                EventName::Postbuild,
                Payload::new().with("html", ""),
                "html",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PostbuildError::AccumulatorTypeMismatch { task, expected: "text", found: "unit", .. } if task == "bad"
        ));
    }

    #[tokio::test]
    async fn test_fold_text_into_bytes() {
        let mut tasks = Tasks::new();
        tasks
            .register(Task::new("banner").on(
                "on",
                EventName::Postbuild,
                Handler::sync(|args| Ok(format!("/* hi */{}", args.text("content").unwrap_or_default()))),
            ))
            .unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let value = tasks
            .fold(
                &GroupKey::Lifecycle,
                EventName::Postbuild,
                Payload::new(),
                "content",
                b"p{}".to_vec(),
            )
            .await
            .unwrap();
        assert_eq!(value, b"/* hi */p{}");
    }

    #[tokio::test]
    async fn test_detached_node_ends_fold() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut tasks = Tasks::new();
        tasks
            .register(Task::new("late").on(
                "on",
                EventName::Postbuild,
                Handler::sync(move |mut args| {
                    *counter.lock().unwrap() += 1;
                    Ok(args.take("node").and_then(EventValue::into_node))
                }),
            ))
            .unwrap();
        tasks
            .register(Task::new("detach").on(
                "on",
                EventName::Postbuild,
                Handler::sync(|_| Ok(None::<Node>)),
            ))
            .unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let node = tasks
            .fold(
                &GroupKey::Lifecycle,
                EventName::Postbuild,
                Payload::new(),
                "node",
                Some(Node::Text("x".into())),
            )
            .await
            .unwrap();
        assert_eq!(node, None);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_names_task_and_event() {
        let mut tasks = Tasks::new();
        tasks
            .register(Task::new("boom").on(
                "on",
                EventName::Shutdown,
                Handler::sync(|_| -> anyhow::Result<()> { anyhow::bail!("kaput") }),
            ))
            .unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let err = tasks
            .run(&GroupKey::Lifecycle, EventName::Shutdown, Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err.task(), Some("boom"));
        assert!(matches!(&err, PostbuildError::TaskExecution { event, .. } if event == "on.shutdown"));
        assert_eq!(
            err.to_string(),
            "The task \"boom\" encountered an error while running event \"on.shutdown\": kaput"
        );
    }

    #[tokio::test]
    async fn test_handler_panic() {
        let mut tasks = Tasks::new();
        tasks
            .register(Task::new("panics").on(
                "on",
                EventName::Bootstrap,
                Handler::sync(|_| -> anyhow::Result<()> { panic!("oh no") }),
            ))
            .unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let err = tasks
            .run(&GroupKey::Lifecycle, EventName::Bootstrap, Payload::new())
            .await
            .unwrap_err();
        assert!(matches!(&err, PostbuildError::TaskExecution { task, .. } if task == "panics"));
        assert!(err.to_string().contains("oh no"));
    }

    #[tokio::test]
    async fn test_get_filenames_ignores() {
        let (_dir, root) = tempdir();
        touch(
            &root,
            &["index.html", "about/index.html", "skip.html", "draft.html", "app.js"],
        );

        let mut tasks = Tasks::new();
        tasks.register(Task::new("html").on("html", EventName::Parse, noop())).unwrap();
        tasks.register(Task::new("js").on("js", EventName::Content, noop())).unwrap();
        tasks
            .resolve_options(&json!({
                "ignore": ["/skip.html"],
                "html": { "ignore": ["draft.html"] },
            }))
            .unwrap();

        let fs = Filesystem::new(root);
        let mut filenames = tasks.get_filenames(&fs).await.unwrap();
        filenames.values_mut().for_each(|files| files.sort());

        assert_eq!(
            filenames.get("html").unwrap(),
            &[Utf8PathBuf::from("about/index.html"), Utf8PathBuf::from("index.html")]
        );
        assert_eq!(filenames.get("js").unwrap(), &[Utf8PathBuf::from("app.js")]);
        assert!(!tasks.handles(Utf8Path::new("skip.html"), EventName::Parse));
        assert!(!tasks.handles(Utf8Path::new("draft.html"), EventName::Parse));
        assert!(tasks.handles(Utf8Path::new("index.html"), EventName::Parse));
        assert!(!tasks.handles(Utf8Path::new("index.html"), EventName::Tree));
    }

    #[tokio::test]
    async fn test_get_filenames_skips_disabled_patterns() {
        let (_dir, root) = tempdir();
        touch(&root, &["index.html", "style.css"]);

        let mut tasks = Tasks::new();
        tasks.register(Task::new("css").on("css", EventName::Content, noop())).unwrap();
        tasks.register(Task::new("html").on("html", EventName::Parse, noop())).unwrap();
        tasks.resolve_options(&json!({ "css": { "enabled": false } })).unwrap();

        let filenames = tasks.get_filenames(&Filesystem::new(root)).await.unwrap();
        assert!(filenames.get("css").is_none());
        assert_eq!(filenames.get("html").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_get_filenames_orders_by_pattern() {
        let (_dir, root) = tempdir();
        touch(&root, &["a.html", "assets/b.js", "assets/c.js"]);

        let mut tasks = Tasks::new();
        tasks.register(Task::new("html").on("html", EventName::Parse, noop())).unwrap();
        tasks.register(Task::new("assets").on("/assets/*.js", EventName::Content, noop())).unwrap();
        tasks.register(Task::new("js").on("js", EventName::Content, noop())).unwrap();
        tasks.resolve_options(&json!({})).unwrap();

        let filenames = tasks.get_filenames(&Filesystem::new(root)).await.unwrap();
        let extensions: Vec<_> = filenames.keys().map(String::as_str).collect();
        // "js" registered last, so its pattern goes first
        assert_eq!(extensions, ["js", "html"]);

        // both js tasks see the file, in registration order
        let info = Arc::new(FileInfo::new(Utf8Path::new("/"), "assets/b.js"));
        let payload = Payload::new().with_file(info);
        let results = tasks
            .run(&GroupKey::extension("js"), EventName::Content, payload)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_options_schemas() {
        let mut tasks = Tasks::new();
        tasks
            .register(
                Task::new("minify")
                    .on("js", EventName::Content, noop())
                    .schema(|| {
                        schemars::json_schema!({
                            "type": "object",
                            "properties": { "level": { "type": "number" } }
                        })
                    }),
            )
            .unwrap();
        tasks.register(Task::new("bare").on("css", EventName::Content, noop())).unwrap();

        let schemas = tasks.options_schemas();
        let minify = serde_json::to_value(&schemas["minify"]).unwrap();
        for field in ["level", "enabled", "ignore"] {
            assert!(minify["properties"][field].is_object(), "missing {field}");
        }

        let bare = serde_json::to_value(&schemas["bare"]).unwrap();
        assert_eq!(bare["type"], "object");
        assert_eq!(bare["properties"]["ignore"]["items"]["type"], "string");
    }
}
