//! Console progress for a run.

use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::Status;

const ANSI_BLUE: Style = Style::new().blue();

static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
});

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Progress bar tracking written files.
pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0).with_style(PROGRESS_STYLE.clone());
    bar.set_message("Running postbuild...");
    bar
}

/// Status callback drawing every update on `bar`.
pub fn status_callback(bar: &ProgressBar) -> impl FnMut(&Status) + '_ {
    move |status| {
        bar.set_length(status.total as u64);
        bar.set_position(status.written as u64);
        bar.set_message(status.to_string());
    }
}
