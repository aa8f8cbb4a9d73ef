//! Cooperative cancellation for one session.
//!
//! # Invariants
//! - A cancelled token stays cancelled until `reset` is called.
//! - Cancelling interrupts the statement running on the session's
//!   connection, if any; later operations fail fast before touching SQLite.

use crate::repo::error::{RepoError, RepoResult};
use rusqlite::{Connection, InterruptHandle};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle that can be moved to another thread to cancel work.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    interrupt: InterruptHandle,
}

impl CancellationToken {
    pub(crate) fn for_connection(conn: &Connection) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                interrupt: conn.get_interrupt_handle(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.interrupt.interrupt();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arms the token so the session accepts work again.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn check(&self) -> RepoResult<()> {
        if self.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        Ok(())
    }
}

impl Debug for CancellationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
