use std::cell::{Cell, RefCell};
use std::fmt::Display;

use futures::future::try_join_all;
use tracing::debug;

use crate::engine::limiter::Limiter;
use crate::error::{PostbuildError, Result};
use crate::files::{FileContext, FileHandle};
use crate::options::{ProcessingOptions, Strategy};

/// Running tally of the files going through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub total: usize,
    pub read: usize,
    pub processed: usize,
    pub written: usize,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.total;
        write!(
            f,
            "Loaded {}/{total} Processed {}/{total} Wrote {}/{total}",
            self.read, self.processed, self.written
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Stage {
    Read,
    Process,
    Write,
}

/// Keeps the [`Status`] and reports every change of it to a callback.
pub(crate) struct Tally<'a> {
    status: Cell<Status>,
    callback: RefCell<&'a mut dyn FnMut(&Status)>,
}

impl<'a> Tally<'a> {
    pub fn new(callback: &'a mut dyn FnMut(&Status)) -> Self {
        Self {
            status: Cell::new(Status::default()),
            callback: RefCell::new(callback),
        }
    }

    pub fn add_total(&self, files: usize) {
        let mut status = self.status.get();
        status.total += files;
        self.update(status);
    }

    pub fn advance(&self, stage: Stage) {
        let mut status = self.status.get();
        match stage {
            Stage::Read => status.read += 1,
            Stage::Process => status.processed += 1,
            Stage::Write => status.written += 1,
        }
        self.update(status);
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    fn update(&self, status: Status) {
        self.status.set(status);
        if let Ok(mut callback) = self.callback.try_borrow_mut() {
            callback(&status);
        }
    }
}

/// Runs one extension's files through read, process and write.
///
/// Fails on the first error, files already written stay written.
pub(crate) async fn process(
    files: Vec<FileHandle>,
    config: ProcessingOptions,
    cx: &FileContext<'_>,
    tally: &Tally<'_>,
) -> Result<()> {
    let limiter = Limiter::new(config.concurrency);
    debug!(
        files = files.len(),
        strategy = ?config.strategy,
        concurrency = config.concurrency,
        "processing batch"
    );

    match config.strategy {
        Strategy::Parallel => {
            try_join_all(files.into_iter().map(|mut file| {
                limiter.run(async move {
                    file.read(cx).await?;
                    tally.advance(Stage::Read);
                    file.process(cx).await?;
                    tally.advance(Stage::Process);
                    file.write(cx).await?;
                    tally.advance(Stage::Write);
                    Ok::<_, PostbuildError>(())
                })
            }))
            .await?;
        }
        Strategy::Staged => {
            let mut files = files;

            try_join_all(files.iter_mut().map(|file| {
                limiter.run(async move {
                    file.read(cx).await?;
                    tally.advance(Stage::Read);
                    Ok::<_, PostbuildError>(())
                })
            }))
            .await?;

            try_join_all(files.iter_mut().map(|file| {
                limiter.run(async move {
                    file.process(cx).await?;
                    tally.advance(Stage::Process);
                    Ok::<_, PostbuildError>(())
                })
            }))
            .await?;

            // one at a time, in discovery order
            for mut file in files {
                limiter.run(file.write(cx)).await?;
                tally.advance(Stage::Write);
            }
        }
    }

    Ok(())
}
