use std::sync::{Arc, Mutex};
use std::time::Duration;

use portage_engine::PlanLocks;

#[tokio::test]
async fn same_plan_is_mutually_exclusive() {
    let locks = PlanLocks::new();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let locks = locks.clone();
        let trace = trace.clone();
        handles.push(tokio::spawn(async move {
            let _guard = locks.acquire("plan-1").await;
            trace.lock().unwrap().push("enter");
            tokio::time::sleep(Duration::from_millis(2)).await;
            trace.lock().unwrap().push("exit");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Strict enter/exit alternation: no two holders overlapped.
    let trace = trace.lock().unwrap();
    for pair in trace.chunks(2) {
        assert_eq!(pair, ["enter", "exit"]);
    }
}

#[tokio::test]
async fn different_plans_do_not_contend() {
    let locks = PlanLocks::new();
    let _a = locks.acquire("plan-a").await;
    // Must not deadlock.
    let _b = locks.acquire("plan-b").await;
    assert_eq!(locks.entry_count(), 2);
}

#[tokio::test]
async fn entries_are_reaped_when_released() {
    let locks = PlanLocks::new();
    {
        let _guard = locks.acquire("plan-1").await;
        assert_eq!(locks.entry_count(), 1);
    }
    assert_eq!(locks.entry_count(), 0);
}
