use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    refs: usize,
}

type Table = Arc<Mutex<HashMap<String, Entry>>>;

/// Named-mutex registry keyed by plan id. All mutating operations on one
/// plan serialize through its entry; entries are reaped when the last
/// holder or waiter drops.
#[derive(Clone, Default)]
pub struct PlanLocks {
    table: Table,
}

impl PlanLocks {
    pub fn new() -> Self {
        PlanLocks::default()
    }

    pub async fn acquire(&self, plan_id: &str) -> PlanGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            let entry = table.entry(plan_id.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            entry.lock.clone()
        };
        let guard = lock.lock_owned().await;
        PlanGuard {
            plan_id: plan_id.to_string(),
            table: self.table.clone(),
            _guard: guard,
        }
    }

    /// Live entries in the table; zero once nothing holds or awaits a lock.
    pub fn entry_count(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct PlanGuard {
    plan_id: String,
    table: Table,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for PlanGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.get_mut(&self.plan_id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                table.remove(&self.plan_id);
            }
        }
    }
}
