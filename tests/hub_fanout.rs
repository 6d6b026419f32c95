// tests/hub_fanout.rs
//
// Observer fan-out through the public surface: AnalyticsService increments
// feed the hub, the hub feeds every registered observer queue, and a slow
// observer is dropped without slowing anyone else down.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tokio::sync::mpsc;

use concall_analyser::analytics::AnalyticsService;
use concall_analyser::hub::{self, ObserverConn, Publish};
use concall_analyser::store::{MemoryStore, Store};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn frame_visits(frame: &str) -> u64 {
    let v: Json = serde_json::from_str(frame).expect("frame is json");
    assert_eq!(v["type"], "analytics_update");
    v["total_visits"].as_u64().expect("total_visits")
}

#[tokio::test]
async fn every_observer_sees_every_increment_in_order() {
    let (hub_handle, _task) = hub::spawn();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let analytics = AnalyticsService::new(store, hub_handle.clone());

    let mut rxs: Vec<mpsc::Receiver<String>> = Vec::new();
    for _ in 0..3 {
        let (conn, rx) = ObserverConn::new();
        hub_handle.register(conn).await;
        rxs.push(rx);
    }
    settle().await;
    assert_eq!(hub_handle.observer_count(), 3);

    analytics.increment_total_visits().await.expect("first increment");
    analytics.increment_total_visits().await.expect("second increment");
    settle().await;

    for rx in &mut rxs {
        let first = rx.recv().await.expect("first frame");
        let second = rx.recv().await.expect("second frame");
        assert_eq!(frame_visits(&first), 1);
        assert_eq!(frame_visits(&second), 2);
    }
}

#[tokio::test]
async fn disconnected_observer_does_not_block_the_rest() {
    let (hub_handle, _task) = hub::spawn();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let analytics = AnalyticsService::new(store, hub_handle.clone());

    let (gone, gone_rx) = ObserverConn::new();
    let gone_id = gone.id;
    let (alive, mut alive_rx) = ObserverConn::new();
    hub_handle.register(gone).await;
    hub_handle.register(alive).await;
    settle().await;

    // Observer hangs up before anything is published.
    drop(gone_rx);
    hub_handle.unregister(gone_id).await;
    settle().await;
    assert_eq!(hub_handle.observer_count(), 1);

    analytics.increment_total_visits().await.expect("increment");
    settle().await;
    let frame = alive_rx.recv().await.expect("surviving observer gets the frame");
    assert_eq!(frame_visits(&frame), 1);
}

#[tokio::test]
async fn slow_observer_is_evicted_after_queue_overflow() {
    let (hub_handle, _task) = hub::spawn();

    // Queue of one: the second undrained frame overflows it.
    let (slow, mut slow_rx) = ObserverConn::with_capacity(1);
    let (fast, mut fast_rx) = ObserverConn::new();
    hub_handle.register(slow).await;
    hub_handle.register(fast).await;
    settle().await;

    assert!(matches!(hub_handle.publish_analytics(1), Publish::Queued));
    settle().await;
    assert!(matches!(hub_handle.publish_analytics(2), Publish::Queued));
    settle().await;

    // Fast observer saw both; slow got one and was then dropped.
    assert_eq!(frame_visits(&fast_rx.recv().await.expect("frame 1")), 1);
    assert_eq!(frame_visits(&fast_rx.recv().await.expect("frame 2")), 2);
    assert_eq!(hub_handle.observer_count(), 1);

    assert_eq!(frame_visits(&slow_rx.recv().await.expect("queued frame")), 1);
    assert!(slow_rx.recv().await.is_none(), "hub closed the slow queue");
}

#[tokio::test]
async fn publish_without_observers_is_a_noop() {
    let (hub_handle, _task) = hub::spawn();
    assert!(matches!(hub_handle.publish_analytics(7), Publish::NoObservers));
}
