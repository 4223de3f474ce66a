use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_singleton_queue() {
    let queue = ExecutionQueue::new(JobMode::Singleton, 32);
    assert_eq!(queue.capacity(), 1);

    let permit = queue.acquire().await.unwrap();
    assert_eq!(queue.available_slots(), 0);
    assert_eq!(queue.in_flight(), 1);

    drop(permit);
    assert_eq!(queue.available_slots(), 1);
}

#[tokio::test]
async fn test_concurrent_queue() {
    let queue = ExecutionQueue::new(JobMode::Concurrent, 3);
    assert_eq!(queue.available_slots(), 3);

    let p1 = queue.acquire().await.unwrap();
    let p2 = queue.acquire().await.unwrap();
    assert_eq!(queue.available_slots(), 1);

    drop(p1);
    assert_eq!(queue.available_slots(), 2);
    drop(p2);
}

#[tokio::test]
async fn test_excess_runs_wait() {
    let queue = Arc::new(ExecutionQueue::new(JobMode::Singleton, 1));
    let first = queue.acquire().await.unwrap();

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.acquire().await.is_some() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(first);
    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn test_closed_queue() {
    let queue = ExecutionQueue::from_config(&SchedulerConfig::default());
    assert_eq!(queue.capacity(), 32);
    queue.close();
    assert!(queue.acquire().await.is_none());
}

#[test]
fn test_zero_concurrency_still_admits_one() {
    let queue = ExecutionQueue::new(JobMode::Concurrent, 0);
    assert_eq!(queue.capacity(), 1);
}
