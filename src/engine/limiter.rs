use std::future::Future;
use std::num::NonZero;

use tokio::sync::Semaphore;

/// Upper bound on how many operations may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// There is no limit.
    None,

    /// There is an upper limit.
    Max(NonZero<usize>),
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZero::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

/// Counting semaphore gating async operations, a zero limit lets everything
/// through.
#[derive(Debug)]
pub struct Limiter {
    limit: Limit,
    semaphore: Option<Semaphore>,
}

impl Limiter {
    pub fn new(limit: impl Into<Limit>) -> Self {
        let limit = limit.into();
        let semaphore = match limit {
            Limit::None => None,
            Limit::Max(max) => Some(Semaphore::new(max.get().min(Semaphore::MAX_PERMITS))),
        };
        Self { limit, semaphore }
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Runs `fut` once a slot is free, holding the slot until it completes.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        // The semaphore is never closed, a failed acquire can't happen.
        let _permit = match &self.semaphore {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };
        fut.await
    }
}
