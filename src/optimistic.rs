//! Optimistic mutations
//!
//! A local delta is applied before the backend call and its inverse is
//! applied if the call fails. Nothing is retried.

use std::future::Future;
use tracing::warn;

use crate::error::Result;

/// A local change paired with its inverse
pub struct Optimistic<A, I> {
    apply: A,
    inverse: I,
}

impl<A, I> Optimistic<A, I> {
    pub fn new(apply: A, inverse: I) -> Self {
        Self { apply, inverse }
    }

    /// Apply, await `remote`, and revert on failure.
    pub async fn run<S, T, F>(self, state: &mut S, remote: F) -> Result<T>
    where
        A: FnOnce(&mut S),
        I: FnOnce(&mut S),
        F: Future<Output = Result<T>>,
    {
        (self.apply)(state);
        match remote.await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "optimistic update reverted");
                (self.inverse)(state);
                Err(err)
            }
        }
    }
}

/// Shorthand for `Optimistic::new(apply, inverse).run(state, remote)`
pub async fn run<S, T, A, I, F>(state: &mut S, apply: A, inverse: I, remote: F) -> Result<T>
where
    A: FnOnce(&mut S),
    I: FnOnce(&mut S),
    F: Future<Output = Result<T>>,
{
    Optimistic::new(apply, inverse).run(state, remote).await
}
