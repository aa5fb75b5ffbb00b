use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portage_clone::error::CloneError;
use portage_clone::{AbortFlag, Tick, UndoManager, WaitOutcome, Waiter};

#[tokio::test]
async fn rollback_runs_compensations_in_reverse_order() {
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut undo = UndoManager::new();
    for label in ["first", "second", "third"] {
        let trace = trace.clone();
        undo.push(label, move || async move {
            trace.lock().unwrap().push(label);
            Ok(())
        });
    }

    undo.rollback().await;

    assert_eq!(*trace.lock().unwrap(), vec!["third", "second", "first"]);
    assert!(undo.is_empty());
}

#[tokio::test]
async fn failing_compensations_do_not_stop_the_rest() {
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut undo = UndoManager::new();
    {
        let trace = trace.clone();
        undo.push("survivor", move || async move {
            trace.lock().unwrap().push("survivor");
            Ok(())
        });
    }
    undo.push("doomed", move || async move {
        Err(CloneError::V2v("compensation exploded".to_string()))
    });

    undo.rollback().await;

    // The failing newest entry was attempted, the older one still ran.
    assert_eq!(*trace.lock().unwrap(), vec!["survivor"]);
}

#[tokio::test]
async fn commit_forgets_compensations() {
    let mut undo = UndoManager::new();
    undo.push("noop", move || async move { Ok(()) });
    assert_eq!(undo.len(), 1);
    undo.commit();
    assert!(undo.is_empty());

    undo.rollback().await;
}

#[tokio::test]
async fn waiter_reports_done_when_the_predicate_fires() {
    let waiter = Waiter::new(Duration::from_millis(1));
    let polls = AtomicU32::new(0);
    let polls = &polls;
    let outcome = waiter
        .wait_for(&AbortFlag::new(), || async move {
            if polls.fetch_add(1, Ordering::SeqCst) >= 2 {
                Ok::<_, CloneError>(Tick::Done(42))
            } else {
                Ok(Tick::Continue)
            }
        })
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Done(42));
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn waiter_times_out_after_the_attempt_budget() {
    let waiter = Waiter::with_attempts(Duration::from_millis(1), 3);
    let outcome = waiter
        .wait_for(&AbortFlag::new(), || async {
            Ok::<Tick<()>, CloneError>(Tick::Continue)
        })
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
}

#[tokio::test]
async fn cancellation_is_distinguishable_from_timeout() {
    let waiter = Waiter::new(Duration::from_millis(1));
    let abort = AbortFlag::new();
    let outcome = waiter
        .wait_for(&abort, || {
            let abort = abort.clone();
            async move {
                // Whatever we are watching never finishes; someone force
                // errors the plan instead.
                abort.set();
                Ok::<Tick<()>, CloneError>(Tick::Continue)
            }
        })
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Aborted);
}

#[tokio::test]
async fn waiter_propagates_poll_errors() {
    let waiter = Waiter::new(Duration::from_millis(1));
    let result = waiter
        .wait_for(&AbortFlag::new(), || async {
            Err::<Tick<()>, _>(CloneError::V2v("driver gone".to_string()))
        })
        .await;
    assert!(result.is_err());
}
