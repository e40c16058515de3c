//! The orchestrator driving a post-processing run from bootstrap to shutdown.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use camino::Utf8Path;
use schemars::Schema;
use serde_json::{Value, json};
use tracing::{Instrument, debug, info, info_span};

use crate::core::{AssetsManifest, Environment};
use crate::engine::pipeline::{self, Status, Tally};
use crate::error::{PostbuildError, Result};
use crate::files::{FileContext, FileHandle};
use crate::filesystem::Filesystem;
use crate::options::{self, Options, UserOptions, merge};
use crate::report::format_size;
use crate::task::{EventName, GroupKey, Payload, Task, Tasks};

/// Id of the task built from the handlers passed in [`UserOptions`].
pub const USER_TASK: &str = "user";

/// Name of the write report saved to the output root.
pub const REPORT_FILE: &str = "postbuild.log.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Bootstrapped,
    Running,
    ShutDown,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::Bootstrapped => "bootstrapped",
            State::Running => "running",
            State::ShutDown => "shut down",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-processing of a generated website.
///
/// ```rust,ignore
/// let mut postbuild = Postbuild::new();
/// postbuild.init([minify_task(), headers_task()])?;
///
/// postbuild.bootstrap(&env, UserOptions::new(options)).await?;
/// postbuild.run(|status| eprintln!("{status}")).await?;
/// ```
#[derive(Debug)]
pub struct Postbuild {
    state: State,
    disabled: bool,
    tasks: Tasks,
    options: Options,
    resolved: Value,
    filesystem: Option<Arc<Filesystem>>,
    assets: Arc<AssetsManifest>,
}

impl Default for Postbuild {
    fn default() -> Self {
        Self::new()
    }
}

impl Postbuild {
    pub fn new() -> Self {
        Self {
            state: State::Uninitialized,
            disabled: false,
            tasks: Tasks::new(),
            options: Options::default(),
            resolved: json!({}),
            filesystem: None,
            assets: Arc::default(),
        }
    }

    /// Registers the built-in tasks.
    pub fn init(&mut self, tasks: impl IntoIterator<Item = Task>) -> Result<()> {
        self.expect_state(State::Uninitialized, "register tasks")?;
        for task in tasks {
            self.tasks.register(task)?;
        }
        Ok(())
    }

    /// Installs the asset manifest handed to every handler.
    pub fn set_assets(&mut self, assets: AssetsManifest) {
        self.assets = Arc::new(assets);
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether bootstrap found nothing to do.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Every resolved option, task options included under their id.
    pub fn resolved_options(&self) -> &Value {
        &self.resolved
    }

    pub fn filesystem(&self) -> Option<&Arc<Filesystem>> {
        self.filesystem.as_ref()
    }

    /// Schema of the plugin options with every task's schema under its id.
    pub fn options_schema(&self) -> Schema {
        let mut schema = options::schema();
        for (id, task) in self.tasks.options_schemas() {
            options::insert_property(&mut schema, id, task);
        }
        schema
    }

    pub async fn bootstrap(&mut self, env: &Environment, user: UserOptions) -> Result<()> {
        self.expect_state(State::Uninitialized, "bootstrap")?;

        let mut merged = Options::default().to_value();
        if !user.options.is_null() {
            options::as_object(&user.options, "plugin options")?;
            merge(&mut merged, &user.options);
        }
        let plugin = Options::from_value(&merged)?;

        // bad options leave the postbuild uninitialized, ready for another try
        let user_task = !user.events.is_empty();
        if user_task {
            self.tasks
                .register(Task::new(USER_TASK).with_events(user.events))?;
        }
        let resolved = match self.tasks.resolve_options(&merged) {
            Ok(resolved) => resolved,
            Err(err) => {
                if user_task {
                    self.tasks.unregister(USER_TASK);
                }
                return Err(err);
            }
        };

        self.resolved = resolved;
        self.options = plugin;
        self.filesystem = Some(Arc::new(
            Filesystem::new(env.public()).with_path_prefix(&env.path_prefix),
        ));

        if !self.options.enabled || self.tasks.active_tasks().next().is_none() {
            info!("No tasks enabled, skipping postbuild");
            self.disabled = true;
            self.state = State::Bootstrapped;
            return Ok(());
        }

        debug!(
            root = %env.public(),
            tasks = ?self.tasks.active_tasks().map(Task::id).collect::<Vec<_>>(),
            "bootstrapped"
        );

        // a failed bootstrap event ends the build
        if let Err(err) = self
            .tasks
            .run(&GroupKey::Lifecycle, EventName::Bootstrap, self.payload())
            .await
        {
            self.state = State::ShutDown;
            return Err(err);
        }
        self.state = State::Bootstrapped;
        Ok(())
    }

    /// Processes every discovered file, reporting progress to `status`.
    ///
    /// Does nothing when bootstrap disabled the run.
    pub async fn run(&mut self, mut status: impl FnMut(&Status)) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        self.expect_state(State::Bootstrapped, "run")?;

        self.state = State::Running;
        let result = self.run_tasks(&mut status).await;
        self.state = State::ShutDown;
        result
    }

    async fn run_tasks(&mut self, status: &mut dyn FnMut(&Status)) -> Result<()> {
        let filesystem = self.filesystem.clone().ok_or(PostbuildError::InvalidState {
            action: "run",
            state: self.state.as_str(),
        })?;
        let payload = self.payload();

        self.tasks
            .run(&GroupKey::Lifecycle, EventName::Postbuild, payload.clone())
            .await?;

        let filenames = self.tasks.get_filenames(&filesystem).await?;

        let tally = Tally::new(status);
        let cx = FileContext {
            tasks: &self.tasks,
            filesystem: &filesystem,
            assets: &self.assets,
        };

        for (ext, files) in filenames {
            let group = GroupKey::Extension(ext.clone());
            let config = self
                .tasks
                .fold(
                    &group,
                    EventName::Configure,
                    payload.clone(),
                    "config",
                    self.options.processing_for(&ext),
                )
                .await?;

            let handles: Vec<_> = files
                .into_iter()
                .map(|path| FileHandle::new(path, &filesystem))
                .collect();
            tally.add_total(handles.len());

            pipeline::process(handles, config, &cx, &tally)
                .instrument(info_span!("extension", ext = %ext))
                .await?;
        }

        self.tasks
            .run(&GroupKey::Lifecycle, EventName::Shutdown, payload)
            .await?;

        self.report(&filesystem).await?;

        let written = tally.status().written;
        let saved = filesystem.reporter().total_saved();
        info!(
            "Postbuild finished, processed {written} files and saved {}",
            format_saved(saved)
        );
        Ok(())
    }

    async fn report(&self, filesystem: &Filesystem) -> Result<()> {
        let reports = filesystem.reporter().reports();

        if self.options.reporting.console() {
            for report in &reports {
                info!("{}", report.console_line());
            }
        }

        if self.options.reporting.log() {
            let json = serde_json::to_string_pretty(&reports)?;
            filesystem
                .create(Utf8Path::new(REPORT_FILE), &json, BTreeMap::new())
                .await?;
        }

        Ok(())
    }

    fn payload(&self) -> Payload {
        let payload = Payload::new().with_assets(self.assets.clone());
        match &self.filesystem {
            Some(filesystem) => payload.with_filesystem(filesystem.clone()),
            None => payload,
        }
    }

    fn expect_state(&self, expected: State, action: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PostbuildError::InvalidState {
                action,
                state: self.state.as_str(),
            })
        }
    }
}

fn format_saved(saved: i64) -> String {
    if saved < 0 {
        format!("-{}", format_size(saved.unsigned_abs()))
    } else {
        format_size(saved as u64)
    }
}
