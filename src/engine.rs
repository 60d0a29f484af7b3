//! The traffic cop: the connection engine's front door to query execution.
//!
//! A protocol handler hands complete statements to the [`TrafficCop`]; the
//! cop runs them through a [`QueryEngine`] on a worker task and raises the
//! connection's wake event when the outcome is ready. The cop never holds a
//! reference back to the connection: the wake callback captures the wake
//! handle as an opaque token, keeping ownership one-way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::protocol::sql_state;

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Statement finished without a result set.
    Complete { tag: String },
    /// Statement produced rows.
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
        tag: String,
    },
    /// Statement failed; reported to the client as an error response.
    Error {
        code: &'static str,
        message: String,
    },
}

/// The external query engine. Runs on the worker pool the cop spawns onto;
/// implementations may block.
pub trait QueryEngine: Send + Sync + 'static {
    fn execute(&self, query: &str) -> QueryOutcome;
}

/// A query engine with no query support: every statement is reported as
/// unsupported. Stands in until a real executor is wired up.
pub struct NullQueryEngine;

impl QueryEngine for NullQueryEngine {
    fn execute(&self, _query: &str) -> QueryOutcome {
        QueryOutcome::Error {
            code: sql_state::FEATURE_NOT_SUPPORTED,
            message: "queries are not yet supported by this server".to_string(),
        }
    }
}

type WakeCallback = Box<dyn Fn() + Send + Sync>;

/// Per-connection query dispatch state.
pub struct TrafficCop {
    engine: Arc<dyn QueryEngine>,
    callback: Mutex<Option<WakeCallback>>,
    queuing: AtomicBool,
    outcome: Mutex<Option<QueryOutcome>>,
}

impl TrafficCop {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            callback: Mutex::new(None),
            queuing: AtomicBool::new(false),
            outcome: Mutex::new(None),
        })
    }

    /// Registers the completion callback. The connection passes a closure
    /// capturing its wake handle; the cop never learns what it wakes.
    pub fn set_task_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Marks whether a request is queued with the engine.
    pub fn set_queuing(&self, on: bool) {
        self.queuing.store(on, Ordering::SeqCst);
    }

    pub fn is_queuing(&self) -> bool {
        self.queuing.load(Ordering::SeqCst)
    }

    /// Hands a statement to the engine on a worker task. The wake callback
    /// fires once the outcome is stored.
    pub fn submit(self: &Arc<Self>, query: String) {
        self.set_queuing(true);
        let cop = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let outcome = cop.engine.execute(&query);
            *cop.outcome.lock() = Some(outcome);
            if let Some(callback) = cop.callback.lock().as_ref() {
                callback();
            }
        });
    }

    /// Takes the completed outcome, if any.
    pub fn take_outcome(&self) -> Option<QueryOutcome> {
        self.outcome.lock().take()
    }

    /// Cancels in-flight bookkeeping. A worker that completes after reset
    /// stores an outcome nobody collects and raises a wake nobody awaits;
    /// both are harmless.
    pub fn reset(&self) {
        self.set_queuing(false);
        *self.outcome.lock() = None;
    }

    /// Direct access to the outcome slot, for tests that bypass the worker.
    #[cfg(test)]
    pub fn outcome_slot_for_tests(&self) -> parking_lot::MutexGuard<'_, Option<QueryOutcome>> {
        self.outcome.lock()
    }
}
