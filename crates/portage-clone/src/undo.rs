//! Compensating-action stack.
//!
//! Each committed side-effect pushes a value-captured compensation; on any
//! failure below the commit point `rollback` pops and runs them in LIFO
//! order. Secondary failures are logged and swallowed so the remaining
//! compensations still run. Scoped to a single orchestration call, never
//! persisted.

use std::future::Future;
use std::pin::Pin;

type UndoFuture = Pin<Box<dyn Future<Output = Result<(), crate::error::CloneError>> + Send>>;

struct UndoAction {
    label: String,
    run: Box<dyn FnOnce() -> UndoFuture + Send>,
}

#[derive(Default)]
pub struct UndoManager {
    actions: Vec<UndoAction>,
}

impl UndoManager {
    pub fn new() -> Self {
        UndoManager::default()
    }

    /// Register a compensation for a side-effect that just committed.
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), crate::error::CloneError>> + Send + 'static,
    {
        self.actions.push(UndoAction {
            label: label.into(),
            run: Box::new(move || Box::pin(action())),
        });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every registered compensation, newest first.
    pub async fn rollback(&mut self) {
        while let Some(action) = self.actions.pop() {
            tracing::info!(undo = %action.label, "running compensation");
            if let Err(e) = (action.run)().await {
                tracing::warn!(undo = %action.label, error = %e, "compensation failed, continuing");
            }
        }
    }

    /// Forget the registered compensations; the side-effects stand.
    pub fn commit(&mut self) {
        self.actions.clear();
    }
}
