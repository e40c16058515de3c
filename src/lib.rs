#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
pub mod engine;
mod error;
pub mod files;
pub mod filesystem;
pub mod host;
#[cfg(feature = "logging")]
mod logging;
pub mod options;
mod postbuild;
pub mod progress;
pub mod report;
pub mod task;

pub use crate::core::{AssetsManifest, Environment, PUBLIC_DIR};
pub use crate::engine::Status;
pub use crate::error::*;
pub use crate::files::FileInfo;
pub use crate::files::document::{Document, Element, Node};
pub use crate::filesystem::Filesystem;
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::options::{Options, ProcessingOptions, Strategy, UserOptions};
pub use crate::postbuild::{Postbuild, REPORT_FILE, State, USER_TASK};
pub use schemars::{Schema, json_schema};
pub use crate::task::{
    Event, EventArgs, EventGroups, EventName, EventValue, GroupKey, Handler, Payload, Task, Tasks,
};
