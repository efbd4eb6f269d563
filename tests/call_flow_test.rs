//! Outbound call lifecycle: happy path, signaling failure, reconnect, and
//! the setup/reconnect budgets.

mod common;

use std::time::Duration;

use common::*;
use webrtc_call_engine::{
    AppEvent, BundlePolicy, CallError, CallId, CallState, ConnectionEvent, EndReason,
    EngineConfig, IceCandidate, IceTransportPolicy, RtcpMuxPolicy, SignalingMessage,
};

#[tokio::test]
async fn outbound_happy_path() {
    let mut env = setup_default();
    let call_id = connect_outbound(&mut env, "bob").await;

    // The answer from device 1 was latched and applied.
    let handle = env.factory.connection(call_id);
    assert_eq!(
        *handle.connection.remote_description.lock().unwrap(),
        Some("v=0 remote-answer".to_string())
    );
    let info = env.manager.call_info(call_id).unwrap();
    assert_eq!(info.state, CallState::Connected);
    assert_eq!(info.selected_device, Some(1));
    assert!(info.connected_at.is_some());
    assert_eq!(env.manager.active_call_id(), Some(call_id));

    // Hangup goes to the selected device only.
    env.manager.hangup().await.unwrap();
    match next(&mut env.events).await {
        Recorded::Send {
            dest_device: Some(1),
            message: SignalingMessage::Hangup,
            ..
        } => {}
        other => panic!("expected hangup to device 1, got {:?}", other),
    }
    expect_event(&mut env.events, AppEvent::EndedLocalHangup).await;

    env.manager.message_sent(call_id).await.unwrap();
    expect_concluded(&mut env.events, "bob").await;
    assert_quiet(&mut env.events).await;

    assert!(handle.connection.closed.load(std::sync::atomic::Ordering::SeqCst));
    let info = env.manager.call_info(call_id).unwrap();
    assert_eq!(info.state, CallState::Terminated(EndReason::LocalHangup));
    assert_eq!(env.manager.active_call_id(), None);
}

#[tokio::test]
async fn connection_parameters_follow_call_policy() {
    let mut env = setup_default();
    let call_id = env.manager.place(remote("bob")).await.unwrap();
    next(&mut env.events).await;
    env.manager
        .proceed(
            call_id,
            vec!["turn:turn.example.org".to_string()],
            true,
            vec![4],
        )
        .await
        .unwrap();
    next(&mut env.events).await;

    let parameters = env.factory.connection(call_id).parameters;
    assert_eq!(parameters.ice_servers, vec!["turn:turn.example.org".to_string()]);
    assert_eq!(parameters.ice_transport_policy, IceTransportPolicy::Relay);
    assert_eq!(parameters.bundle_policy, BundlePolicy::MaxBundle);
    assert_eq!(parameters.rtcp_mux_policy, RtcpMuxPolicy::Require);
    assert!(parameters.dtls_srtp_key_agreement);
}

#[tokio::test]
async fn remote_candidates_are_applied_in_order() {
    let mut env = setup_default();
    let call_id = connect_outbound(&mut env, "bob").await;

    let c1 = IceCandidate::new("audio", 0, "candidate:1");
    let c2 = IceCandidate::new("audio", 0, "candidate:2");
    env.manager
        .receive_ice_candidates(call_id, 1, vec![c1.clone(), c2.clone()])
        .await
        .unwrap();

    let handle = env.factory.connection(call_id);
    assert_eq!(
        *handle.connection.remote_candidates.lock().unwrap(),
        vec![c1, c2]
    );
}

#[tokio::test]
async fn candidates_from_unselected_devices_are_dropped() {
    let mut env = setup_default();
    let call_id = connect_outbound(&mut env, "bob").await;

    env.manager
        .receive_ice_candidates(call_id, 2, vec![IceCandidate::new("audio", 0, "candidate:9")])
        .await
        .unwrap();

    let handle = env.factory.connection(call_id);
    assert!(handle.connection.remote_candidates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn local_candidates_batch_behind_the_in_flight_offer() {
    let mut env = setup_default();
    let call_id = env.manager.place(remote("bob")).await.unwrap();
    next(&mut env.events).await;
    env.manager
        .proceed(call_id, vec![], false, vec![1])
        .await
        .unwrap();
    match next(&mut env.events).await {
        Recorded::Send {
            message: SignalingMessage::Offer { .. },
            ..
        } => {}
        other => panic!("expected offer, got {:?}", other),
    }

    // Gathered while the offer is still in flight: buffered, not sent.
    env.factory
        .drive(
            call_id,
            ConnectionEvent::LocalIceCandidate(IceCandidate::new("audio", 0, "candidate:a")),
        )
        .await;
    env.factory
        .drive(
            call_id,
            ConnectionEvent::LocalIceCandidate(IceCandidate::new("audio", 0, "candidate:b")),
        )
        .await;
    assert_quiet(&mut env.events).await;

    // Clearing the offer releases one batched update, broadcast since no
    // device is selected yet.
    env.manager.message_sent(call_id).await.unwrap();
    match next(&mut env.events).await {
        Recorded::Send {
            dest_device: None,
            message: SignalingMessage::IceUpdate { candidates },
            ..
        } => {
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[0].sdp, "candidate:a");
            assert_eq!(candidates[1].sdp, "candidate:b");
        }
        other => panic!("expected batched ice update, got {:?}", other),
    }
    env.manager.message_sent(call_id).await.unwrap();

    // After the answer latches device 1, updates are addressed to it.
    env.manager
        .receive_answer(call_id, 1, "v=0 remote-answer".to_string())
        .await
        .unwrap();
    env.factory
        .drive(
            call_id,
            ConnectionEvent::LocalIceCandidate(IceCandidate::new("audio", 0, "candidate:c")),
        )
        .await;
    match next(&mut env.events).await {
        Recorded::Send {
            dest_device: Some(1),
            message: SignalingMessage::IceUpdate { candidates },
            ..
        } => assert_eq!(candidates[0].sdp, "candidate:c"),
        other => panic!("expected addressed ice update, got {:?}", other),
    }
}

#[tokio::test]
async fn offer_send_failure_terminates_the_call() {
    let mut env = setup_default();
    let call_id = env.manager.place(remote("bob")).await.unwrap();
    next(&mut env.events).await;
    env.manager
        .proceed(call_id, vec![], false, vec![1])
        .await
        .unwrap();
    match next(&mut env.events).await {
        Recorded::Send {
            message: SignalingMessage::Offer { .. },
            ..
        } => {}
        other => panic!("expected offer, got {:?}", other),
    }

    env.manager.message_send_failure(call_id).await.unwrap();
    expect_event(&mut env.events, AppEvent::EndedSignalingFailure).await;
    expect_concluded(&mut env.events, "bob").await;
    assert_quiet(&mut env.events).await;

    let info = env.manager.call_info(call_id).unwrap();
    assert_eq!(info.state, CallState::Terminated(EndReason::SignalingFailure));
}

#[tokio::test]
async fn reconnect_within_the_window_is_invisible_besides_the_two_events() {
    let mut env = setup_default();
    let call_id = connect_outbound(&mut env, "bob").await;

    env.factory
        .drive(call_id, ConnectionEvent::IceDisconnected)
        .await;
    expect_event(&mut env.events, AppEvent::Reconnecting).await;
    assert_eq!(
        env.manager.call_info(call_id).unwrap().state,
        CallState::Reconnecting
    );

    env.factory.drive(call_id, ConnectionEvent::IceConnected).await;
    expect_event(&mut env.events, AppEvent::Reconnected).await;
    assert_eq!(
        env.manager.call_info(call_id).unwrap().state,
        CallState::Connected
    );
    assert_quiet(&mut env.events).await;
}

#[tokio::test]
async fn exhausted_reconnect_window_is_a_connection_failure() {
    let config = EngineConfig::default()
        .with_reconnect_timeout(Duration::from_millis(60))
        .with_tick_interval(Duration::from_millis(10));
    let mut env = setup(config);
    let call_id = connect_outbound(&mut env, "bob").await;

    env.factory
        .drive(call_id, ConnectionEvent::IceDisconnected)
        .await;
    expect_event(&mut env.events, AppEvent::Reconnecting).await;

    expect_event(&mut env.events, AppEvent::EndedConnectionFailure).await;
    expect_concluded(&mut env.events, "bob").await;
    let info = env.manager.call_info(call_id).unwrap();
    assert_eq!(info.state, CallState::Terminated(EndReason::ConnectionFailure));
}

#[tokio::test]
async fn setup_budget_expiry_hangs_up_and_times_out() {
    let config = EngineConfig::default()
        .with_setup_timeout(Duration::from_millis(80))
        .with_tick_interval(Duration::from_millis(10));
    let mut env = setup(config);

    let call_id = env.manager.place(remote("bob")).await.unwrap();
    next(&mut env.events).await;
    env.manager
        .proceed(call_id, vec![], false, vec![1])
        .await
        .unwrap();
    match next(&mut env.events).await {
        Recorded::Send {
            message: SignalingMessage::Offer { .. },
            ..
        } => {}
        other => panic!("expected offer, got {:?}", other),
    }
    env.manager.message_sent(call_id).await.unwrap();

    // No answer arrives; the budget expires.
    match next(&mut env.events).await {
        Recorded::Send {
            dest_device: None,
            message: SignalingMessage::Hangup,
            ..
        } => {}
        other => panic!("expected broadcast hangup, got {:?}", other),
    }
    expect_event(&mut env.events, AppEvent::EndedTimeout).await;
    env.manager.message_sent(call_id).await.unwrap();
    expect_concluded(&mut env.events, "bob").await;
}

#[tokio::test]
async fn ice_failure_terminates_with_connection_failure() {
    let mut env = setup_default();
    let call_id = env.manager.place(remote("bob")).await.unwrap();
    next(&mut env.events).await;
    env.manager
        .proceed(call_id, vec![], false, vec![1])
        .await
        .unwrap();
    next(&mut env.events).await;
    env.manager.message_sent(call_id).await.unwrap();

    env.factory.drive(call_id, ConnectionEvent::IceFailed).await;
    match next(&mut env.events).await {
        Recorded::Send {
            message: SignalingMessage::Hangup,
            ..
        } => {}
        other => panic!("expected hangup, got {:?}", other),
    }
    expect_event(&mut env.events, AppEvent::EndedConnectionFailure).await;
}

#[tokio::test]
async fn media_toggles_reach_the_context() {
    use std::sync::atomic::Ordering;

    let mut env = setup_default();
    let call_id = connect_outbound(&mut env, "bob").await;

    let audio = env.factory.audio_track.lock().unwrap().clone().unwrap();
    let video = env.factory.video_track.lock().unwrap().clone().unwrap();
    let capturer = env.factory.capturer.lock().unwrap().clone().unwrap();

    // Tracks start muted until the application enables them.
    assert!(!audio.enabled.load(Ordering::SeqCst));
    assert!(!video.enabled.load(Ordering::SeqCst));

    env.manager.set_local_audio_enabled(true).await.unwrap();
    assert!(audio.enabled.load(Ordering::SeqCst));

    env.manager
        .set_local_video_enabled(call_id, true)
        .await
        .unwrap();
    assert!(video.enabled.load(Ordering::SeqCst));
    match next(&mut env.events).await {
        Recorded::LocalVideoSession { enabled: true, .. } => {}
        other => panic!("expected local video session, got {:?}", other),
    }

    env.manager
        .set_local_video_enabled(call_id, false)
        .await
        .unwrap();
    match next(&mut env.events).await {
        Recorded::LocalVideoSession { enabled: false, .. } => {}
        other => panic!("expected local video session end, got {:?}", other),
    }

    env.manager.set_camera_source(true).await.unwrap();
    assert!(capturer.front_facing.load(Ordering::SeqCst));
}

#[tokio::test]
async fn api_misuse_is_reported_synchronously() {
    let mut env = setup_default();

    // No active call to hang up.
    assert!(matches!(
        env.manager.hangup().await,
        Err(CallError::NoActiveCall)
    ));

    // Unknown call.
    assert!(matches!(
        env.manager.accept(CallId(42)).await,
        Err(CallError::CallNotFound { .. })
    ));

    let call_id = env.manager.place(remote("bob")).await.unwrap();
    next(&mut env.events).await;

    // A second concurrent place is refused while a call is active.
    assert!(matches!(
        env.manager.place(remote("carol")).await,
        Err(CallError::InvalidState { .. })
    ));

    env.manager
        .proceed(call_id, vec![], false, vec![1])
        .await
        .unwrap();
    next(&mut env.events).await;

    // Proceed is one-shot.
    assert!(matches!(
        env.manager.proceed(call_id, vec![], false, vec![1]).await,
        Err(CallError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn reset_tears_everything_down_silently() {
    let mut env = setup_default();
    let call_id = connect_outbound(&mut env, "bob").await;
    let handle = env.factory.connection(call_id);

    env.manager.reset().await.unwrap();
    expect_concluded(&mut env.events, "bob").await;
    assert_quiet(&mut env.events).await;

    assert!(handle.connection.closed.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(env.manager.stats().total, 0);
    assert_eq!(env.manager.active_call_id(), None);

    // The engine is immediately usable again.
    env.manager.place(remote("carol")).await.unwrap();
    match next(&mut env.events).await {
        Recorded::StartCall { outbound: true, .. } => {}
        other => panic!("expected start-call, got {:?}", other),
    }
}
