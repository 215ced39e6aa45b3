use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::*;
use crate::Error;

#[tokio::test(start_paused = true)]
async fn task_runs_once_delay_elapsed() {
    let scheduler = TokioScheduler::try_current().unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();
    let flag = fired.clone();

    assert!(scheduler.schedule_once(
        Duration::from_secs(3),
        Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        }),
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!fired.load(Ordering::SeqCst));

    tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert!(fired.load(Ordering::SeqCst));
}

#[test]
fn task_does_not_run_on_calling_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .unwrap();
    let scheduler = TokioScheduler::new(runtime.handle().clone());
    let caller = std::thread::current().id();
    let (tx, rx) = std::sync::mpsc::channel();

    assert!(scheduler.schedule_once(
        Duration::ZERO,
        Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }),
    ));

    let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(ran_on, caller);
}

#[test]
fn try_current_requires_a_runtime() {
    assert!(matches!(TokioScheduler::try_current(), Err(Error::NoRuntime(_))));
}
