//! Cooperative cancellation signal shared between a job's worker and the
//! party that wants to stop it.
//!
//! A [`CancellationToken`] is a cheap, cloneable handle around one atomic
//! flag. Clones observe the same flag, so the caller keeps one clone and
//! hands another to the worker. Setting the flag never interrupts running
//! code: the pipeline and cancellation-aware backends poll it at defined
//! checkpoints and return early once they see it set. A backend call that
//! is already inside third-party code runs to completion; its result is then
//! discarded.
//!
//! Every job gets its own token, so a cancel request can never leak into the
//! next job.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative cancel flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the unset state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can guard a fresh job.
    ///
    /// Only call this while no job is running under the token.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// True when both handles share the same underlying flag.
    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
