//! Moving batches of files through their read, process and write stages.
pub mod limiter;
pub mod pipeline;

pub use limiter::{Limit, Limiter};
pub use pipeline::Status;
