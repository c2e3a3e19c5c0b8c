use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use super::TaskGroup;
use crate::error::ExportError;

#[tokio::test]
async fn test_join_collects_every_result() {
    let mut group = TaskGroup::new(4, CancellationToken::new());
    for i in 0..20u64 {
        group
            .spawn(async move {
                tokio::time::sleep(Duration::from_millis(20 - i)).await;
                Ok(i)
            })
            .await
            .unwrap();
    }
    let mut results = group.join().await.unwrap();
    results.sort();
    assert_eq!(results, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_concurrency_is_capped() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut group = TaskGroup::new(3, CancellationToken::new());
    for _ in 0..12 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        group
            .spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
    }
    group.join().await.unwrap();
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_failure_surfaces_at_join() {
    let mut group = TaskGroup::new(8, CancellationToken::new());
    group
        .spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        })
        .await
        .unwrap();
    group
        .spawn(async { Err(ExportError::capture("png encode failed")) })
        .await
        .unwrap();

    let err = group.join().await.unwrap_err();
    assert!(matches!(err, ExportError::Capture(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_failure_surfaces_at_next_spawn() {
    let mut group = TaskGroup::new(1, CancellationToken::new());
    group
        .spawn(async { Err::<(), _>(ExportError::capture("boom")) })
        .await
        .unwrap();
    // the single permit is released once the failing task ends
    let mut outcome = Ok(());
    for _ in 0..10 {
        outcome = group.spawn(async { Ok(()) }).await;
        if outcome.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(outcome, Err(ExportError::Capture(_))));
    assert!(group.cancel_token().is_cancelled());
}

#[tokio::test]
async fn test_external_cancel_stops_tasks() {
    let cancel = CancellationToken::new();
    let mut group = TaskGroup::new(2, cancel.clone());
    group
        .spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await
        .unwrap();
    cancel.cancel();
    let err = group.join().await.unwrap_err();
    assert!(err.is_cancelled());
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_shutdown_drops_running_tasks() {
    let dropped = Arc::new(AtomicBool::new(false));
    let mut group = TaskGroup::new(2, CancellationToken::new());
    let guard = SetOnDrop(Arc::clone(&dropped));
    group
        .spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await
        .unwrap();
    let cancel = group.cancel_token().clone();

    group.shutdown().await;
    assert!(cancel.is_cancelled());
    assert!(dropped.load(Ordering::SeqCst));
}
