//! Tasks and the events they subscribe to.
//!
//! A task is a bag of handlers keyed first by [`GroupKey`] (the lifecycle
//! group or a file pattern) and then by [`EventName`]. Tasks never talk to
//! each other, the [`registry::Tasks`] decides who gets called and in which
//! order.
pub(crate) mod registry;

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use schemars::{Schema, json_schema};
use serde_json::{Value, json};

use crate::core::{ArcStr, AssetsManifest};
use crate::error::{PostbuildError, Result};
use crate::files::FileInfo;
use crate::files::document::{Document, Node};
use crate::filesystem::Filesystem;
use crate::options::{ProcessingOptions, insert_property, merge};

pub use registry::Tasks;

/// Bucket of handlers inside a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Build lifecycle events, written as `on`.
    Lifecycle,
    /// Files with the given extension, written as the bare extension.
    Extension(String),
    /// Files matching a glob relative to the output root, written with a
    /// leading `/`.
    Glob(String),
}

impl GroupKey {
    pub fn extension(ext: impl Into<String>) -> Self {
        GroupKey::Extension(ext.into())
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        GroupKey::Glob(pattern.into())
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, GroupKey::Lifecycle)
    }

    /// Glob pattern finding the files of this group, relative to the
    /// output root.
    pub fn pattern(&self) -> Option<String> {
        match self {
            GroupKey::Lifecycle => None,
            GroupKey::Extension(ext) => Some(format!("**/*.{ext}")),
            GroupKey::Glob(glob) => Some(glob.clone()),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        if value == "on" {
            GroupKey::Lifecycle
        } else if let Some(glob) = value.strip_prefix('/') {
            GroupKey::Glob(glob.to_string())
        } else {
            GroupKey::Extension(value.to_lowercase())
        }
    }
}

impl From<String> for GroupKey {
    fn from(value: String) -> Self {
        GroupKey::from(value.as_str())
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::Lifecycle => f.write_str("on"),
            GroupKey::Extension(ext) => f.write_str(ext),
            GroupKey::Glob(glob) => write!(f, "/{glob}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Bootstrap,
    Postbuild,
    Shutdown,
    Configure,
    Parse,
    Tree,
    /// Fired for every node of a structured document. Returning
    /// `None::<Node>` detaches the node, nodes are tokens so detaching a
    /// start tag leaves its content and end tag in place.
    Node,
    Serialize,
    Write,
    Content,
}

impl EventName {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventName::Bootstrap => "bootstrap",
            EventName::Postbuild => "postbuild",
            EventName::Shutdown => "shutdown",
            EventName::Configure => "configure",
            EventName::Parse => "parse",
            EventName::Tree => "tree",
            EventName::Node => "node",
            EventName::Serialize => "serialize",
            EventName::Write => "write",
            EventName::Content => "content",
        }
    }

    pub const fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventName::Bootstrap | EventName::Postbuild | EventName::Shutdown
        )
    }

    /// Whether a handler for this event may live in `group`.
    pub fn fits(self, group: &GroupKey) -> bool {
        self.is_lifecycle() == group.is_lifecycle()
    }
}

impl Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = PostbuildError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "bootstrap" => EventName::Bootstrap,
            "postbuild" => EventName::Postbuild,
            "shutdown" => EventName::Shutdown,
            "configure" => EventName::Configure,
            "parse" => EventName::Parse,
            "tree" => EventName::Tree,
            "node" => EventName::Node,
            "serialize" => EventName::Serialize,
            "write" => EventName::Write,
            "content" => EventName::Content,
            other => return Err(PostbuildError::Options(format!("unknown event \"{other}\""))),
        })
    }
}

/// The event currently being dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub group: GroupKey,
    pub name: EventName,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Values flowing into and out of handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Unit,
    Text(String),
    /// Raw content of an opaque file, not necessarily UTF-8.
    Bytes(Vec<u8>),
    Document(Document),
    /// A document node, `None` once a handler detached it.
    Node(Option<Node>),
    Config(ProcessingOptions),
    Json(Value),
}

impl EventValue {
    pub fn kind(&self) -> &'static str {
        match self {
            EventValue::Unit => "unit",
            EventValue::Text(_) => "text",
            EventValue::Bytes(_) => "bytes",
            EventValue::Document(_) => "document",
            EventValue::Node(_) => "node",
            EventValue::Config(_) => "config",
            EventValue::Json(_) => "json",
        }
    }

    /// Converts a value to the `kind` of an accumulator where that loses
    /// nothing, text is accepted where bytes are expected.
    pub(crate) fn conform(self, kind: &str) -> Self {
        match (self, kind) {
            (EventValue::Text(text), "bytes") => EventValue::Bytes(text.into_bytes()),
            (value, _) => value,
        }
    }

    /// Text, or bytes that happen to be valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Text(text) => Some(text),
            EventValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            EventValue::Text(text) => Some(text.as_bytes()),
            EventValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            EventValue::Text(text) => Some(text.into_bytes()),
            EventValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Whether this is a node some handler detached.
    pub fn is_detached(&self) -> bool {
        matches!(self, EventValue::Node(None))
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            EventValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            EventValue::Document(document) => Some(document),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            EventValue::Document(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            EventValue::Node(node) => node.as_ref(),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            EventValue::Node(node) => node,
            _ => None,
        }
    }

    pub fn as_config(&self) -> Option<&ProcessingOptions> {
        match self {
            EventValue::Config(config) => Some(config),
            _ => None,
        }
    }
}

impl From<()> for EventValue {
    fn from(_: ()) -> Self {
        EventValue::Unit
    }
}

impl From<String> for EventValue {
    fn from(value: String) -> Self {
        EventValue::Text(value)
    }
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        EventValue::Text(value.to_string())
    }
}

impl From<Document> for EventValue {
    fn from(value: Document) -> Self {
        EventValue::Document(value)
    }
}

impl From<Vec<u8>> for EventValue {
    fn from(value: Vec<u8>) -> Self {
        EventValue::Bytes(value)
    }
}

impl From<Node> for EventValue {
    fn from(value: Node) -> Self {
        EventValue::Node(Some(value))
    }
}

/// `None` detaches the node from its document.
impl From<Option<Node>> for EventValue {
    fn from(value: Option<Node>) -> Self {
        EventValue::Node(value)
    }
}

impl From<ProcessingOptions> for EventValue {
    fn from(value: ProcessingOptions) -> Self {
        EventValue::Config(value)
    }
}

impl From<Value> for EventValue {
    fn from(value: Value) -> Self {
        EventValue::Json(value)
    }
}

/// Types a fold can accumulate into, see [`Tasks::fold`].
pub trait Accumulate: Into<EventValue> + Sized {
    /// The [`EventValue::kind`] this type travels as.
    const KIND: &'static str;

    fn from_value(value: EventValue) -> Option<Self>;
}

impl Accumulate for String {
    const KIND: &'static str = "text";

    fn from_value(value: EventValue) -> Option<Self> {
        value.into_text()
    }
}

impl Accumulate for Vec<u8> {
    const KIND: &'static str = "bytes";

    fn from_value(value: EventValue) -> Option<Self> {
        match value {
            EventValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Accumulate for Document {
    const KIND: &'static str = "document";

    fn from_value(value: EventValue) -> Option<Self> {
        value.into_document()
    }
}

impl Accumulate for Option<Node> {
    const KIND: &'static str = "node";

    fn from_value(value: EventValue) -> Option<Self> {
        match value {
            EventValue::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl Accumulate for ProcessingOptions {
    const KIND: &'static str = "config";

    fn from_value(value: EventValue) -> Option<Self> {
        value.as_config().copied()
    }
}

/// Everything an event carries besides the task's own options.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    file: Option<Arc<FileInfo>>,
    filesystem: Option<Arc<Filesystem>>,
    assets: Arc<AssetsManifest>,
    fields: BTreeMap<&'static str, EventValue>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the dispatch file-scoped.
    pub fn with_file(mut self, file: Arc<FileInfo>) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_filesystem(mut self, filesystem: Arc<Filesystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn with_assets(mut self, assets: Arc<AssetsManifest>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with(mut self, field: &'static str, value: impl Into<EventValue>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn file(&self) -> Option<&Arc<FileInfo>> {
        self.file.as_ref()
    }

    pub fn filesystem(&self) -> Option<&Arc<Filesystem>> {
        self.filesystem.as_ref()
    }

    pub fn assets(&self) -> &AssetsManifest {
        &self.assets
    }

    pub fn get(&self, field: &str) -> Option<&EventValue> {
        self.fields.get(field)
    }

    pub(crate) fn insert(&mut self, field: &'static str, value: EventValue) {
        self.fields.insert(field, value);
    }

    pub(crate) fn take(&mut self, field: &str) -> Option<EventValue> {
        self.fields.remove(field)
    }
}

/// The single argument every handler receives.
#[derive(Debug, Clone)]
pub struct EventArgs {
    /// Resolved options of the task owning the handler.
    pub options: Arc<Value>,
    pub event: Event,
    pub payload: Payload,
}

impl EventArgs {
    pub fn file(&self) -> Option<&Arc<FileInfo>> {
        self.payload.file()
    }

    pub fn filesystem(&self) -> Option<&Arc<Filesystem>> {
        self.payload.filesystem()
    }

    pub fn assets(&self) -> &AssetsManifest {
        self.payload.assets()
    }

    pub fn get(&self, field: &str) -> Option<&EventValue> {
        self.payload.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(EventValue::as_text)
    }

    pub fn bytes(&self, field: &str) -> Option<&[u8]> {
        self.get(field).and_then(EventValue::as_bytes)
    }

    /// Moves a field out of the payload, handy for folds that transform the
    /// accumulated value.
    pub fn take(&mut self, field: &str) -> Option<EventValue> {
        self.payload.take(field)
    }

    /// Looks up a single task option.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

type HandlerFn = dyn Fn(EventArgs) -> BoxFuture<'static, anyhow::Result<EventValue>> + Send + Sync;

/// Type-erased event callback.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F, Fut, R>(func: F) -> Self
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<EventValue>,
    {
        Handler(Arc::new(move |args| -> BoxFuture<'static, anyhow::Result<EventValue>> {
            let fut = func(args);
            Box::pin(async move { fut.await.map(Into::into) })
        }))
    }

    /// Wraps a handler that never needs to wait on anything.
    pub fn sync<F, R>(func: F) -> Self
    where
        F: Fn(EventArgs) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<EventValue>,
    {
        Handler(Arc::new(move |args| -> BoxFuture<'static, anyhow::Result<EventValue>> {
            let result = func(args).map(Into::into);
            Box::pin(futures::future::ready(result))
        }))
    }

    pub(crate) fn call(&self, args: EventArgs) -> BoxFuture<'static, anyhow::Result<EventValue>> {
        (self.0)(args)
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler(*)")
    }
}

/// Handlers of a task, `group → event → handler`, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct EventGroups(IndexMap<GroupKey, IndexMap<EventName, Handler>>);

impl EventGroups {
    pub fn insert(&mut self, group: GroupKey, event: EventName, handler: Handler) {
        self.0.entry(group).or_default().insert(event, handler);
    }

    pub fn get(&self, group: &GroupKey, event: EventName) -> Option<&Handler> {
        self.0.get(group)?.get(&event)
    }

    pub fn defines(&self, group: &GroupKey, event: EventName) -> bool {
        self.get(group, event).is_some()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupKey> {
        self.0.keys()
    }

    /// Groups subscribing to files, everything but the lifecycle group.
    pub fn file_groups(&self) -> impl Iterator<Item = &GroupKey> {
        self.groups().filter(|group| !group.is_lifecycle())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(IndexMap::is_empty)
    }

    fn events(&self) -> impl Iterator<Item = (&GroupKey, EventName)> {
        self.0
            .iter()
            .flat_map(|(group, events)| events.keys().map(move |event| (group, *event)))
    }
}

type SchemaFn = dyn Fn() -> Schema + Send + Sync;

/// A pluggable unit subscribing to lifecycle and per-file events.
#[derive(Clone)]
pub struct Task {
    id: ArcStr,
    events: EventGroups,
    defaults: Value,
    schema: Option<Arc<SchemaFn>>,
}

impl Task {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: id.as_ref().into(),
            events: EventGroups::default(),
            defaults: json!({}),
            schema: None,
        }
    }

    pub fn on(mut self, group: impl Into<GroupKey>, event: EventName, handler: Handler) -> Self {
        self.events.insert(group.into(), event, handler);
        self
    }

    pub fn with_events(mut self, events: EventGroups) -> Self {
        self.events = events;
        self
    }

    /// Task-specific option defaults, merged under the user's options.
    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn schema<F>(mut self, schema: F) -> Self
    where
        F: Fn() -> Schema + Send + Sync + 'static,
    {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> &EventGroups {
        &self.events
    }

    /// `{enabled: true, ignore: []}` with the task's own defaults on top.
    pub(crate) fn option_defaults(&self) -> Value {
        let mut defaults = json!({ "enabled": true, "ignore": [] });
        merge(&mut defaults, &self.defaults);
        defaults
    }

    /// The task's declared schema extended with the generic fields.
    pub(crate) fn options_schema(&self) -> Schema {
        let mut schema = match &self.schema {
            Some(schema) => schema(),
            None => json_schema!({ "type": "object" }),
        };
        insert_property(
            &mut schema,
            "enabled",
            json!({
                "type": "boolean",
                "description": "Whether to run the task or not"
            }),
        );
        insert_property(
            &mut schema,
            "ignore",
            json!({
                "type": "array",
                "items": { "type": "string" },
                "description": "File paths to ignore for this task only"
            }),
        );
        schema
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(PostbuildError::EmptyEventGroups(self.id.to_string()));
        }

        if let Some((group, event)) = self.events.events().find(|(group, event)| !event.fits(group)) {
            return Err(PostbuildError::InvalidEvent {
                task: self.id.to_string(),
                group: group.to_string(),
                event: event.to_string(),
            });
        }

        Ok(())
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field(
                "events",
                &self
                    .events
                    .events()
                    .map(|(group, event)| format!("{group}.{event}"))
                    .collect::<Vec<_>>(),
            )
            .field("defaults", &self.defaults)
            .finish()
    }
}
