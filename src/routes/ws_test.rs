use super::*;
use crate::message::ScheduledAction;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

fn new_session() -> (WsSession, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(32);
    (WsSession { client_id: Uuid::new_v4(), room: None, tx }, rx)
}

fn encode(msg: &ClientMessage) -> String {
    serde_json::to_string(msg).expect("serialize")
}

async fn dispatch(
    state: &AppState,
    session: &mut WsSession,
    msg: &ClientMessage,
) -> Vec<ServerMessage> {
    process_inbound_text(state, session, clock::now_ms(), &encode(msg)).await
}

async fn recv_push(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("push receive timed out")
        .expect("push channel closed unexpectedly")
}

async fn join(state: &AppState, session: &mut WsSession, room_id: &str) -> Vec<ServerMessage> {
    dispatch(
        state,
        session,
        &ClientMessage::JoinRoom {
            room_id: room_id.into(),
            user_id: "user-1".into(),
            username: "ada".into(),
        },
    )
    .await
}

#[tokio::test]
async fn invalid_json_is_rejected_without_teardown() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session();

    let replies = process_inbound_text(&state, &mut session, clock::now_ms(), "{not json").await;
    assert_eq!(replies.len(), 1);
    assert!(matches!(replies[0], ServerMessage::Error { .. }));

    // The session is still usable afterwards.
    let replies = join(&state, &mut session, "room-1").await;
    assert_eq!(replies.len(), 2);
}

#[tokio::test]
async fn ntp_request_echoes_t0_with_ordered_server_timestamps() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session();

    let received_at = clock::now_ms();
    let text = encode(&ClientMessage::NtpRequest { t0: 123_456.0, rtt: None });
    let replies = process_inbound_text(&state, &mut session, received_at, &text).await;

    assert_eq!(replies.len(), 1);
    match &replies[0] {
        ServerMessage::NtpResponse { t0, t1, t2 } => {
            assert!((t0 - 123_456.0).abs() < f64::EPSILON);
            assert!((t1 - received_at).abs() < f64::EPSILON);
            assert!(t2 >= t1);
        }
        other => panic!("expected NTP_RESPONSE, got {other:?}"),
    }
}

#[tokio::test]
async fn ntp_request_records_reported_rtt() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session();
    join(&state, &mut session, "room-1").await;

    dispatch(&state, &mut session, &ClientMessage::NtpRequest { t0: 1.0, rtt: Some(17.0) }).await;

    let rooms = state.rooms.read().await;
    let member = rooms.get("room-1").unwrap().member(session.client_id).unwrap();
    assert_eq!(member.last_known_rtt, Some(17.0));
}

#[tokio::test]
async fn join_replies_client_id_then_room_state() {
    let state = test_helpers::test_app_state();
    let (mut session, mut rx) = new_session();

    let replies = join(&state, &mut session, "room-1").await;

    assert_eq!(replies.len(), 2);
    match &replies[0] {
        ServerMessage::SetClientId { client_id } => assert_eq!(*client_id, session.client_id),
        other => panic!("expected SET_CLIENT_ID, got {other:?}"),
    }
    match &replies[1] {
        ServerMessage::RoomState { members, .. } => assert_eq!(members.len(), 1),
        other => panic!("expected ROOM_STATE, got {other:?}"),
    }
    assert_eq!(session.room.as_deref(), Some("room-1"));

    // The joiner also receives the room-wide membership and gain pushes.
    assert!(matches!(
        recv_push(&mut rx).await,
        ServerMessage::RoomEvent { event: RoomEvent::ClientChange { .. } }
    ));
    assert!(matches!(
        recv_push(&mut rx).await,
        ServerMessage::ScheduledAction {
            scheduled_action: ScheduledAction::SpatialConfig { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn room_scoped_intent_before_join_is_an_error() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session();

    let replies = dispatch(&state, &mut session, &ClientMessage::Pause).await;
    assert!(matches!(&replies[0], ServerMessage::Error { .. }));
}

#[tokio::test]
async fn play_broadcasts_scheduled_action_to_room() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_track(&state, "room-1", "room-1/song.mp3").await;
    let (mut session, mut rx) = new_session();
    join(&state, &mut session, "room-1").await;
    // Drain the join pushes.
    recv_push(&mut rx).await;
    recv_push(&mut rx).await;

    let replies = dispatch(
        &state,
        &mut session,
        &ClientMessage::Play { track_time_seconds: 30.0, audio_id: "room-1/song.mp3".into() },
    )
    .await;
    assert!(replies.is_empty());

    match recv_push(&mut rx).await {
        ServerMessage::ScheduledAction { server_time_to_execute, scheduled_action } => {
            assert!(server_time_to_execute > clock::now_ms());
            assert_eq!(
                scheduled_action,
                ScheduledAction::Play {
                    track_time_seconds: 30.0,
                    audio_id: "room-1/song.mp3".into()
                }
            );
        }
        other => panic!("expected SCHEDULED_ACTION, got {other:?}"),
    }
}

#[tokio::test]
async fn play_of_unknown_audio_returns_error_to_sender_only() {
    let state = test_helpers::test_app_state();
    let (mut session, mut rx) = new_session();
    join(&state, &mut session, "room-1").await;
    recv_push(&mut rx).await;
    recv_push(&mut rx).await;

    let replies = dispatch(
        &state,
        &mut session,
        &ClientMessage::Play { track_time_seconds: 0.0, audio_id: "nope".into() },
    )
    .await;

    assert!(matches!(&replies[0], ServerMessage::Error { .. }));
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "error must not be broadcast"
    );
}

#[tokio::test]
async fn reupload_reannounces_to_requester() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_track(&state, "room-1", "room-1/song.mp3").await;
    let (mut session, _rx) = new_session();
    join(&state, &mut session, "room-1").await;

    let replies = dispatch(
        &state,
        &mut session,
        &ClientMessage::ReuploadAudio {
            audio_id: "room-1/song.mp3".into(),
            audio_name: "song".into(),
        },
    )
    .await;

    match &replies[0] {
        ServerMessage::RoomEvent { event: RoomEvent::NewAudioSource { source } } => {
            assert_eq!(source.id, "room-1/song.mp3");
        }
        other => panic!("expected NEW_AUDIO_SOURCE, got {other:?}"),
    }

    let replies = dispatch(
        &state,
        &mut session,
        &ClientMessage::ReuploadAudio { audio_id: "missing".into(), audio_name: "x".into() },
    )
    .await;
    assert!(matches!(&replies[0], ServerMessage::Error { .. }));
}

#[tokio::test]
async fn joining_a_second_room_leaves_the_first() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session();

    join(&state, &mut session, "room-1").await;
    join(&state, &mut session, "room-2").await;

    let rooms = state.rooms.read().await;
    assert!(rooms.get("room-1").is_none(), "first room should be torn down");
    assert_eq!(rooms.get("room-2").unwrap().members.len(), 1);
    assert_eq!(session.room.as_deref(), Some("room-2"));
}

#[tokio::test]
async fn spatial_intents_dispatch_to_engine() {
    let state = test_helpers::test_app_state();
    let (mut session, mut rx) = new_session();
    join(&state, &mut session, "room-1").await;
    recv_push(&mut rx).await;
    recv_push(&mut rx).await;

    dispatch(&state, &mut session, &ClientMessage::StartSpatialAudio).await;
    assert!(state.rooms.read().await.get("room-1").unwrap().spatial_active());
    recv_push(&mut rx).await; // initial spatial config

    dispatch(&state, &mut session, &ClientMessage::StopSpatialAudio).await;
    assert!(!state.rooms.read().await.get("room-1").unwrap().spatial_active());
}
