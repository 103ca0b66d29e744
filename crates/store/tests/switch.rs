#![forbid(unsafe_code)]

//! Cluster switch sequencing: messaging, callback fan-out and failure
//! recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deck_client::{MockApi, MockState};
use deck_core::{ConnectionState, ContextInfo};
use deck_store::Workspace;

fn mock() -> Arc<MockApi> {
    let mut state = MockState::default();
    state.status = ConnectionState {
        connected: true,
        context: "prod".into(),
        namespace: "default".into(),
        ..ConnectionState::default()
    };
    state.contexts = vec![
        ContextInfo { name: "prod".into(), cluster: "prod".into(), current: true },
        ContextInfo { name: "staging".into(), cluster: "staging".into(), current: false },
    ];
    state.namespaces = vec!["default".into()];
    Arc::new(MockApi::new(state))
}

async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn successful_switch_runs_the_full_sequence() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    let before = ws.switcher.refresh_trigger();
    ws.switcher.switch_context("staging").await.unwrap();
    settle().await;

    assert_eq!(api.state.lock().unwrap().switched_to, vec!["staging"]);
    assert_eq!(ws.switcher.current_context(), "staging");
    assert_eq!(ws.switcher.message(), "Connected to staging");
    assert_eq!(ws.switcher.refresh_trigger(), before + 1);
    assert!(ws.caches.contexts.data().is_some());
    // Still in the transient switching state until the grace period lapses.
    assert!(ws.switcher.switching());
    tokio::time::advance(Duration::from_millis(1100)).await;
    settle().await;
    assert!(!ws.switcher.switching());
}

#[tokio::test(start_paused = true)]
async fn failed_switch_leaves_context_untouched() {
    let api = mock();
    api.state.lock().unwrap().switch_error = true;
    let ws = Workspace::init(api.clone()).await;

    let before_lists = api.calls.cluster_lists();
    assert!(ws.switcher.switch_context("staging").await.is_err());
    settle().await;

    assert!(api.state.lock().unwrap().switched_to.is_empty());
    assert_eq!(ws.switcher.current_context(), "");
    assert_eq!(ws.switcher.message(), "Failed to switch to staging");
    // No refresh happened on the failure path.
    assert_eq!(api.calls.cluster_lists(), before_lists);

    // The failure banner lingers longer than the success one.
    tokio::time::advance(Duration::from_millis(1100)).await;
    settle().await;
    assert!(ws.switcher.switching());
    tokio::time::advance(Duration::from_millis(1000)).await;
    settle().await;
    assert!(!ws.switcher.switching());
}

#[tokio::test(start_paused = true)]
async fn one_failing_callback_does_not_starve_the_rest() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let _bad = ws
        .switcher
        .on_cluster_switch(|| anyhow::bail!("page cache invalidation failed"));
    let _good = {
        let hits = Arc::clone(&hits);
        ws.switcher.on_cluster_switch(move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    ws.switcher.refresh_all().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_guard_unregisters_its_callback() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let guard = {
        let hits = Arc::clone(&hits);
        ws.switcher.on_cluster_switch(move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    ws.switcher.refresh_all().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    guard.unsubscribe();
    ws.switcher.refresh_all().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
