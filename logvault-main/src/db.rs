//! Shared DuckDB connections driven from async code.
//!
//! Statements run on the blocking pool while the connection lock is held.
//! If the awaiting future is dropped, for example by an expired
//! [`with_deadline`](crate::error::with_deadline), the running statement is
//! interrupted so the lock is released promptly.

use duckdb::{Connection, InterruptHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LogError;

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

/// Interrupts the connection unless disarmed first.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.store(true, Ordering::SeqCst);
            self.handle.interrupt();
            debug!("Interrupted abandoned DuckDB call");
        }
    }
}

/// Runs `work` against the locked connection on the blocking pool.
///
/// `fail` builds the error for a call that panicked or was abandoned before
/// it started, so queue and store failures keep their own class.
pub(crate) async fn run_blocking<T, F>(
    conn: &SharedConnection,
    fail: fn(String) -> LogError,
    work: F,
) -> Result<T, LogError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, LogError> + Send + 'static,
{
    let mut guard = conn.clone().lock_owned().await;
    let abandoned = Arc::new(AtomicBool::new(false));
    let mut interrupt = InterruptOnDrop {
        handle: guard.interrupt_handle(),
        abandoned: abandoned.clone(),
        armed: true,
    };

    let task = tokio::task::spawn_blocking(move || {
        if abandoned.load(Ordering::SeqCst) {
            return Err(fail("call abandoned before it started".to_string()));
        }
        work(&mut guard)
    });

    let result = task.await;
    interrupt.armed = false;
    result.map_err(|e| fail(format!("DuckDB task failed: {}", e)))?
}
