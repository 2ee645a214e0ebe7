use std::sync::Arc;
use std::time::Duration;
use webrtc_kit::KitConfig;
use webrtc_kit::call::{CallState, CallUiEvent, CallViewModel, CallViewState};
use webrtc_kit::peer::{EngineEvent, PeerConnectionManager, PeerConnectionState};
use webrtc_kit::reconnect::ReconnectionState;
use webrtc_kit::signaling::MemorySignalingStore;
use webrtc_kit::test_utils::{MockPeerConnectionEngine, MockTurnCredentialService};

fn view_model(
    store: &Arc<MemorySignalingStore>,
    user: &str,
    engine: MockPeerConnectionEngine,
) -> (Arc<MockPeerConnectionEngine>, CallViewModel) {
    let engine = Arc::new(engine);
    let config = KitConfig {
        user_id: user.to_string(),
        auto_reconnect: true,
        ..KitConfig::default()
    };
    let vm = CallViewModel::new(
        &config,
        PeerConnectionManager::new(engine.clone()),
        Arc::new(store.repository()),
        Arc::new(MockTurnCredentialService::new()),
    );
    (engine, vm)
}

async fn wait_until(
    vm: &CallViewModel,
    within: Duration,
    pred: impl Fn(&CallViewState) -> bool,
) -> CallViewState {
    let mut rx = vm.subscribe();
    let state = tokio::time::timeout(within, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for view state")
        .expect("view model dropped");
    state.clone()
}

#[tokio::test]
async fn test_disconnect_recovers_with_ice_restart() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemorySignalingStore::new();
    let (alice_engine, alice) =
        view_model(&store, "alice", MockPeerConnectionEngine::new().with_auto_connect());
    let (bob_engine, bob) =
        view_model(&store, "bob", MockPeerConnectionEngine::new().with_auto_connect());

    let mut incoming = bob.watch_incoming_calls().await.unwrap();
    alice.on_event(CallUiEvent::StartCall("bob".into())).await;
    bob.on_event(CallUiEvent::AnswerCall(incoming.recv().await.unwrap()))
        .await;
    let connected = wait_until(&alice, Duration::from_secs(5), |s| s.call.is_connected()).await;
    let sid = connected.session_id.unwrap();

    let mut reconnection = alice.reconnection().subscribe();
    alice_engine
        .emit(EngineEvent::ConnectionState(PeerConnectionState::Disconnected))
        .await;
    reconnection
        .wait_for(|s| matches!(s, ReconnectionState::Reconnecting { attempt: 1 }))
        .await
        .unwrap();
    // The call stays up while the connection is being recovered.
    assert_eq!(alice.state().call, CallState::Connected(sid.clone()));

    tokio::time::timeout(
        Duration::from_secs(5),
        reconnection.wait_for(|s| *s == ReconnectionState::Stable),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(alice_engine.call_count("create_offer(ice_restart)"), 1);
    assert_eq!(alice_engine.call_count("initialize"), 1);
    assert_eq!(alice.reconnection().retry_count(), 0);
    assert_eq!(alice.state().call, CallState::Connected(sid));

    // Bob answers the restart offer on the existing connection.
    tokio::time::timeout(Duration::from_secs(5), async {
        while bob_engine.call_count("create_answer") < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(bob_engine.call_count("initialize"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_call() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemorySignalingStore::new();
    let (engine, alice) = view_model(&store, "alice", MockPeerConnectionEngine::new());

    alice.on_event(CallUiEvent::StartCall("bob".into())).await;
    let sid = alice.state().session_id.unwrap();
    engine
        .emit(EngineEvent::ConnectionState(PeerConnectionState::Failed))
        .await;

    let state = wait_until(&alice, Duration::from_secs(120), |s| s.call.is_terminal()).await;
    assert_eq!(state.call, CallState::Error("Connection failed".into()));
    assert_eq!(alice.reconnection().state(), ReconnectionState::Failed);

    // Every attempt rebuilt the connection for the same session.
    assert_eq!(engine.call_count("initialize"), 4);
    assert_eq!(engine.call_count("create_offer"), 4);

    wait_until(&alice, Duration::from_secs(5), |s| s.session_id.is_none()).await;
    assert!(!store.contains_session(&sid));
}
