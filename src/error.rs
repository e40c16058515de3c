use camino::Utf8PathBuf;
use thiserror::Error;

pub use anyhow::Error as HandlerError;

/// Every failure the post-processing run can end with.
///
/// Nothing here is recoverable from inside the run: registration errors are
/// raised before any build activity, the rest abort the run at the first
/// occurrence and travel up to the host adapter.
#[derive(Debug, Error)]
pub enum PostbuildError {
    #[error("Can't register task \"{0}\" with duplicate id")]
    DuplicateTaskId(String),

    #[error("Can't register task \"{0}\" with no events")]
    EmptyEventGroups(String),

    #[error("Task \"{task}\" can't listen to event \"{event}\" in group \"{group}\"")]
    InvalidEvent {
        task: String,
        group: String,
        event: String,
    },

    #[error("The task \"{task}\" encountered an error while running event \"{event}\": {source}")]
    TaskExecution {
        task: String,
        event: String,
        #[source]
        source: HandlerError,
    },

    #[error("Task \"{task}\" returned {found} from \"{event}\", expected {expected}")]
    AccumulatorTypeMismatch {
        task: String,
        event: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Event \"{event}\" has no \"{field}\" field to accumulate into")]
    MissingAccumulator { event: String, field: String },

    #[error("Unable to {action} file \"{path}\": {source}")]
    Filesystem {
        action: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Invalid options: {0}")]
    Options(String),

    #[error("Couldn't (de)serialize options.\n{0}")]
    Serde(#[from] serde_json::Error),

    #[error("Can't {action} while the postbuild is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("Failed to build runtime")]
    RuntimeBuild(#[source] std::io::Error),

    #[error("Background job failed.\n{0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PostbuildError {
    pub(crate) fn fs(action: &'static str, path: impl Into<Utf8PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| PostbuildError::Filesystem {
            action,
            path,
            source,
        }
    }

    /// Id of the task responsible for the error, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            PostbuildError::DuplicateTaskId(task)
            | PostbuildError::EmptyEventGroups(task)
            | PostbuildError::InvalidEvent { task, .. }
            | PostbuildError::TaskExecution { task, .. }
            | PostbuildError::AccumulatorTypeMismatch { task, .. } => Some(task),
            _ => None,
        }
    }
}

pub type Result<T, E = PostbuildError> = std::result::Result<T, E>;
