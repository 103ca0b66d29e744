#![forbid(unsafe_code)]

//! Connect/disconnect transitions, epoch arming, redundant-write
//! suppression and the optimistic label, driven against the mock backend
//! under paused tokio time.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use deck_client::{MockApi, MockState};
use deck_core::{ConnectionState, NamespaceMode, PodInfo};
use deck_store::Workspace;

fn pod(name: &str, namespace: &str) -> PodInfo {
    PodInfo { name: name.into(), namespace: namespace.into(), ..PodInfo::default() }
}

fn connected_status(context: &str) -> ConnectionState {
    ConnectionState {
        connected: true,
        context: context.into(),
        server: "https://kube.example:6443".into(),
        namespace: "default".into(),
        node_count: 3,
        pod_count: 12,
        ..ConnectionState::default()
    }
}

fn mock() -> Arc<MockApi> {
    let mut state = MockState::default();
    state.pods = vec![pod("api-0", "default"), pod("api-1", "default")];
    state.namespaces = vec!["default".into(), "payments".into()];
    Arc::new(MockApi::new(state))
}

/// Let spawned fetch tasks run without advancing the paused clock.
async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn no_cluster_fetches_while_disconnected() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;
    settle().await;
    assert_eq!(api.calls.cluster_lists(), 0);

    // Epoch-independent churn must not wake the cluster caches either.
    ws.store
        .set_selected_namespaces(&["payments".into()], Some(NamespaceMode::Custom))
        .await
        .unwrap();
    settle().await;
    assert_eq!(api.calls.cluster_lists(), 0);
    assert_eq!(ws.fetch_key(), "disconnected");
}

#[tokio::test(start_paused = true)]
async fn first_connect_arms_exactly_one_fetch_per_cache() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;
    settle().await;

    api.state.lock().unwrap().status = connected_status("prod");
    ws.caches.status.refetch().await;
    settle().await;

    assert_eq!(ws.fetch_key(), "connected-1");
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 1);
    assert_eq!(api.calls.deployments.load(Ordering::SeqCst), 1);
    assert_eq!(api.calls.services.load(Ordering::SeqCst), 1);
    assert_eq!(api.calls.nodes.load(Ordering::SeqCst), 1);
    assert_eq!(ws.caches.pods.data().map(|p| p.len()), Some(2));
    assert!(!ws.caches.pods.loading());
}

#[tokio::test(start_paused = true)]
async fn reconnect_retriggers_despite_same_nominal_version() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    api.state.lock().unwrap().status = connected_status("prod");
    ws.caches.status.refetch().await;
    settle().await;
    assert_eq!(ws.fetch_key(), "connected-1");
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 1);

    api.state.lock().unwrap().status.connected = false;
    ws.caches.status.refetch().await;
    settle().await;
    assert_eq!(ws.fetch_key(), "disconnected");
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 1);

    // Same nominal key as before the disconnect, but the `disconnected`
    // sentinel in between means the trigger string changed twice.
    api.state.lock().unwrap().status.connected = true;
    ws.caches.status.refetch().await;
    settle().await;
    assert_eq!(ws.fetch_key(), "connected-1");
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn redundant_namespace_write_is_suppressed() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    ws.store
        .set_selected_namespaces(&["x".into()], Some(NamespaceMode::Custom))
        .await
        .unwrap();
    assert_eq!(api.calls.update_context.load(Ordering::SeqCst), 1);

    ws.store
        .set_selected_namespaces(&["x".into()], Some(NamespaceMode::Custom))
        .await
        .unwrap();
    assert_eq!(api.calls.update_context.load(Ordering::SeqCst), 1);

    // Unnormalized but equivalent input is also a no-op.
    ws.store
        .set_selected_namespaces(&[" x ".into(), "x".into()], Some(NamespaceMode::Custom))
        .await
        .unwrap();
    assert_eq!(api.calls.update_context.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn context_version_bump_refetches_cluster_caches() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    api.state.lock().unwrap().status = connected_status("prod");
    ws.caches.status.refetch().await;
    settle().await;
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 1);

    ws.store
        .set_selected_namespaces(&["payments".into()], Some(NamespaceMode::Custom))
        .await
        .unwrap();
    settle().await;
    assert_eq!(ws.fetch_key(), "connected-2");
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn optimistic_label_confirms_on_success() {
    let api = mock();
    api.state.lock().unwrap().update_delay = Some(Duration::from_millis(200));
    let ws = Workspace::init(api.clone()).await;
    assert_eq!(ws.store.label(), "All Namespaces");

    let store = Arc::clone(&ws.store);
    let task = tokio::spawn(async move { store.set_namespace("payments").await });
    settle().await;
    // Persist still in flight: the optimistic label is already visible.
    assert_eq!(ws.store.label(), "payments");

    tokio::time::advance(Duration::from_millis(250)).await;
    task.await.unwrap().unwrap();
    assert_eq!(ws.store.label(), "payments");
    let ctx = ws.store.context();
    assert_eq!(ctx.selected_namespaces, vec!["payments"]);
    assert_eq!(ctx.filters.namespace_mode, NamespaceMode::Custom);
}

#[tokio::test(start_paused = true)]
async fn optimistic_label_reverts_on_persist_failure() {
    let api = mock();
    {
        let mut s = api.state.lock().unwrap();
        s.update_error = true;
        s.update_delay = Some(Duration::from_millis(200));
    }
    let ws = Workspace::init(api.clone()).await;

    let store = Arc::clone(&ws.store);
    let task = tokio::spawn(async move { store.set_namespace("payments").await });
    settle().await;
    assert_eq!(ws.store.label(), "payments");

    tokio::time::advance(Duration::from_millis(250)).await;
    assert!(task.await.unwrap().is_err());
    // Confirmed state drives the label again.
    assert_eq!(ws.store.label(), "All Namespaces");
    assert!(ws.store.selected_namespaces().is_empty());
}

#[tokio::test(start_paused = true)]
async fn in_flight_fetch_discarded_after_disconnect() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    // The fetch issued at connect is slow.
    {
        let mut s = api.state.lock().unwrap();
        s.list_delay = Some(Duration::from_millis(500));
        s.status = connected_status("prod");
    }
    ws.caches.status.refetch().await;
    settle().await;
    assert!(ws.caches.pods.loading());
    assert!(ws.caches.pods.data().is_none());

    // Connection drops before the response lands.
    api.state.lock().unwrap().status.connected = false;
    ws.caches.status.refetch().await;
    settle().await;
    assert_eq!(ws.fetch_key(), "disconnected");

    // The response from the dead connection arrives and must be dropped;
    // the post-connect defensive refetch also stays quiet now.
    tokio::time::advance(Duration::from_millis(600)).await;
    settle().await;
    assert!(ws.caches.pods.data().is_none());
    assert!(!ws.caches.pods.loading());
    assert_eq!(api.calls.pods.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_error_keeps_previous_value() {
    let api = mock();
    let ws = Workspace::init(api.clone()).await;

    api.state.lock().unwrap().status = connected_status("prod");
    ws.caches.status.refetch().await;
    settle().await;
    assert_eq!(ws.caches.pods.data().map(|p| p.len()), Some(2));
    assert!(ws.caches.pods.error().is_none());

    api.state.lock().unwrap().list_error = true;
    ws.caches.pods.refetch();
    settle().await;
    assert_eq!(ws.caches.pods.data().map(|p| p.len()), Some(2));
    assert!(ws.caches.pods.error().is_some());
}

#[tokio::test(start_paused = true)]
async fn end_to_end_connect_and_select_namespace() {
    let api = mock();
    {
        let mut s = api.state.lock().unwrap();
        s.pods = vec![pod("api-0", "default"), pod("billing-0", "payments")];
        s.scope_pods_by_namespace = true;
    }
    let ws = Workspace::init(api.clone()).await;
    settle().await;
    assert_eq!(api.calls.cluster_lists(), 0);

    api.state.lock().unwrap().status = connected_status("prod");
    ws.caches.status.refetch().await;
    settle().await;
    assert!(ws.caches.status.connected());
    assert_eq!(ws.caches.status.current().context, "prod");
    assert!(ws.caches.pods.data().is_some());
    assert!(ws.caches.deployments.data().is_some());
    assert!(ws.caches.services.data().is_some());
    assert!(ws.caches.nodes.data().is_some());

    ws.store.set_namespace("payments").await.unwrap();
    settle().await;
    assert_eq!(ws.store.label(), "payments");
    let ctx = ws.store.context();
    assert_eq!(ctx.filters.namespace_mode, NamespaceMode::Custom);
    assert_eq!(ctx.selected_namespaces, vec!["payments"]);
    // The refetch under the new epoch is scoped to the selection.
    assert_eq!(
        ws.caches.pods.data().map(|p| p.iter().map(|x| x.name.clone()).collect::<Vec<_>>()),
        Some(vec!["billing-0".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn load_failure_falls_back_to_default_context() {
    let api = mock();
    api.state.lock().unwrap().load_error = true;
    let ws = Workspace::init(api.clone()).await;
    assert_eq!(ws.store.context(), Default::default());
    assert_eq!(ws.store.label(), "All Namespaces");
}
