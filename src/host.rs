//! Thin adapters for the host build system's hooks.
//!
//! The host calls these synchronously, each one drives the orchestrator on
//! a single-threaded runtime and logs failures before handing them back.

use std::future::Future;
use std::time::Instant;

use serde_json::Value;
use tracing::error;

use crate::core::Environment;
use crate::error::{PostbuildError, Result};
use crate::options::UserOptions;
use crate::postbuild::Postbuild;
use crate::progress::{as_overhead, progress_bar, status_callback};

/// Schema export hook.
pub fn options_schema(postbuild: &Postbuild) -> Value {
    postbuild.options_schema().into()
}

/// Init hook, bootstraps the run.
pub fn on_init(postbuild: &mut Postbuild, env: Environment, user: UserOptions) -> Result<()> {
    block_on(postbuild.bootstrap(&env, user))
        .inspect_err(|err| error!("Postbuild failed to start: {err}"))
}

/// Build-complete hook, processes the output.
pub fn on_post_build(postbuild: &mut Postbuild) -> Result<()> {
    if postbuild.is_disabled() {
        return Ok(());
    }

    let s = Instant::now();
    let bar = progress_bar();
    let result = block_on(postbuild.run(status_callback(&bar)));

    match &result {
        Ok(()) => bar.finish_with_message(format!("Finished postbuild {}", as_overhead(s))),
        Err(err) => {
            bar.abandon();
            error!("Postbuild failed: {err}");
        }
    }
    result
}

fn block_on<F: Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PostbuildError::RuntimeBuild)?;

    runtime.block_on(fut)
}
