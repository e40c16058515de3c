//! Plugin-level options and the processing configuration derived from them.

use std::borrow::Cow;
use std::collections::BTreeMap;

use schemars::generate::SchemaSettings;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{PostbuildError, Result};
use crate::task::{EventGroups, GroupKey};

/// How the files of one extension go through read, process and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Every file runs its own read → process → write chain, up to
    /// `concurrency` files at a time.
    #[default]
    Parallel,
    /// All files are read, then all are processed, then all are written one
    /// by one in discovery order.
    #[serde(alias = "sequential")]
    Staged,
}

impl JsonSchema for Strategy {
    fn schema_name() -> Cow<'static, str> {
        "Strategy".into()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "enum": ["parallel", "staged", "sequential"],
            "description": "Determines how the files are processed."
        })
    }
}

/// Processing config for one extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProcessingOptions {
    pub strategy: Strategy,
    /// How many files to process at once, 0 for no limit.
    pub concurrency: usize,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Parallel,
            concurrency: 10,
        }
    }
}

impl ProcessingOptions {
    /// Applies the extension-specific override on top of these defaults.
    pub fn merged(&self, ext: Option<&ExtensionOptions>) -> Self {
        let Some(ext) = ext else { return *self };
        Self {
            strategy: ext.strategy.unwrap_or(self.strategy),
            concurrency: ext.concurrency.unwrap_or(self.concurrency),
        }
    }
}

/// Partial processing override for a single extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtensionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

/// Reporting flag either as a boolean to enable/disable all reports or an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Reporting {
    Toggle(bool),
    Detailed {
        /// Write a `postbuild.log.json` with all the changes made.
        #[serde(default)]
        log: bool,
        /// Print a summary report during build.
        #[serde(default)]
        console: bool,
    },
}

impl Default for Reporting {
    fn default() -> Self {
        Reporting::Toggle(true)
    }
}

impl Reporting {
    /// Write `postbuild.log.json` with every change made.
    pub fn log(&self) -> bool {
        match *self {
            Reporting::Toggle(flag) => flag,
            Reporting::Detailed { log, .. } => log,
        }
    }

    /// Print a summary report once the run is done.
    pub fn console(&self) -> bool {
        match *self {
            Reporting::Toggle(flag) => flag,
            Reporting::Detailed { console, .. } => console,
        }
    }
}

/// Options of the postbuild, each task reads its own under its id.
// Typed view over the plugin-level keys only, the task sub-objects living
// next to them are left to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Options {
    /// Whether to run the postbuild or not.
    pub enabled: bool,
    pub reporting: Reporting,
    /// File paths to exclude from processing.
    pub ignore: Vec<String>,
    /// Default file processing options for all extensions.
    pub processing: ProcessingOptions,
    /// Changes how files of a specific extension are processed.
    pub extensions: BTreeMap<String, ExtensionOptions>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enabled: true,
            reporting: Reporting::default(),
            ignore: Vec::new(),
            processing: ProcessingOptions::default(),
            extensions: BTreeMap::new(),
        }
    }
}

impl Options {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Options::deserialize(value)?)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// Processing config for files with the given extension.
    pub fn processing_for(&self, ext: &str) -> ProcessingOptions {
        self.processing.merged(self.extensions.get(ext))
    }
}

/// What the user hands over at bootstrap: plain options plus, optionally,
/// event handlers declared inline instead of through a named task.
#[derive(Default)]
pub struct UserOptions {
    pub options: Value,
    pub events: EventGroups,
}

impl UserOptions {
    pub fn new(options: Value) -> Self {
        Self {
            options,
            events: EventGroups::default(),
        }
    }

    /// Adds an inline handler, these end up in a synthetic `user` task.
    pub fn on(
        mut self,
        group: impl Into<GroupKey>,
        event: crate::task::EventName,
        handler: crate::task::Handler,
    ) -> Self {
        self.events.insert(group.into(), event, handler);
        self
    }
}

/// Deep merges `overlay` into `target`. Objects merge key by key, anything
/// else (arrays included) is replaced wholesale.
pub fn merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}

/// Returns the object behind `value`, or an options error naming `what`.
pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| PostbuildError::Options(format!("{what} must be an object, got {value}")))
}

/// Schema of the plugin-level options, with every subschema inlined.
pub fn schema() -> Schema {
    SchemaSettings::draft2020_12()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<Options>()
}

/// Sets `properties[name]` of an object schema, turning boolean schemas into
/// objects first.
pub(crate) fn insert_property(schema: &mut Schema, name: impl Into<String>, property: impl Into<Value>) {
    let properties = schema
        .ensure_object()
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if !properties.is_object() {
        *properties = Value::Object(Map::new());
    }
    if let Value::Object(properties) = properties {
        properties.insert(name.into(), property.into());
    }
}
