//! Socket-level integration test: a real coordinator bound to a local
//! port, driven from the outside with tokio-tungstenite. Covers the join
//! handshake, a full clock exchange, and a scheduled play reaching every
//! room member.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use syncroom::clock;
use syncroom::config::Config;
use syncroom::message::{
    AudioSource, ClientMessage, RoomEvent, ScheduledAction, ServerMessage,
};
use syncroom::routes;
use syncroom::services;
use syncroom::state::AppState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// HARNESS
// =============================================================================

/// Serve the app on an ephemeral port and return the state plus ws URL.
async fn start_coordinator() -> (AppState, String) {
    let state = AppState::in_memory(Config::default());
    let app = routes::app(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    (state, format!("ws://{addr}/ws"))
}

async fn connect(url: &str) -> WsStream {
    let (stream, _) = connect_async(url).await.expect("ws connect failed");
    stream
}

async fn send(stream: &mut WsStream, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).expect("serialize");
    stream.send(Message::Text(json.into())).await.expect("ws send failed");
}

async fn recv(stream: &mut WsStream) -> ServerMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("receive timed out")
            .expect("stream ended unexpectedly")
            .expect("ws receive failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("decode server message");
        }
    }
}

/// Join a room and drain the handshake, returning what the coordinator sent.
async fn join(stream: &mut WsStream, room_id: &str, username: &str) -> Vec<ServerMessage> {
    send(
        stream,
        &ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            user_id: format!("user-{username}"),
            username: username.to_string(),
        },
    )
    .await;
    // SET_CLIENT_ID, ROOM_STATE, then the room-wide CLIENT_CHANGE and
    // SPATIAL_CONFIG pushes also reach the joiner.
    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(recv(stream).await);
    }
    received
}

fn source(id: &str) -> AudioSource {
    AudioSource {
        id: id.to_string(),
        title: id.to_string(),
        duration: 180.0,
        added_at: clock::now_ms(),
        added_by: "ada".to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn join_handshake_delivers_identity_state_and_membership() {
    let (_state, url) = start_coordinator().await;
    let mut client = connect(&url).await;

    let received = join(&mut client, "room-1", "ada").await;

    let ServerMessage::SetClientId { client_id } = &received[0] else {
        panic!("expected SET_CLIENT_ID first, got {:?}", received[0]);
    };
    let ServerMessage::RoomState { members, tracks, .. } = &received[1] else {
        panic!("expected ROOM_STATE second, got {:?}", received[1]);
    };
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].client_id, *client_id);
    assert_eq!(members[0].username, "ada");
    assert!(tracks.is_empty());

    assert!(matches!(
        &received[2],
        ServerMessage::RoomEvent { event: RoomEvent::ClientChange { clients } } if clients.len() == 1
    ));
    assert!(matches!(
        &received[3],
        ServerMessage::ScheduledAction {
            scheduled_action: ScheduledAction::SpatialConfig { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn clock_exchange_round_trips_over_the_socket() {
    let (_state, url) = start_coordinator().await;
    let mut client = connect(&url).await;

    let t0 = clock::now_ms();
    send(&mut client, &ClientMessage::NtpRequest { t0, rtt: None }).await;

    let ServerMessage::NtpResponse { t0: echoed, t1, t2 } = recv(&mut client).await else {
        panic!("expected NTP_RESPONSE");
    };
    let t3 = clock::now_ms();

    assert!((echoed - t0).abs() < f64::EPSILON, "t0 must be echoed untouched");
    assert!(t2 >= t1, "server timestamps must be ordered");
    let sample = clock::ClockSample { t0, t1, t2, t3 };
    assert!(sample.round_trip_delay() >= 0.0);
}

#[tokio::test]
async fn play_intent_reaches_every_member_with_a_future_deadline() {
    let (state, url) = start_coordinator().await;
    let mut ada = connect(&url).await;
    let mut ben = connect(&url).await;

    join(&mut ada, "room-1", "ada").await;
    join(&mut ben, "room-1", "ben").await;
    // ada also sees ben's join pushes.
    recv(&mut ada).await;
    recv(&mut ada).await;

    // The upload pipeline is external; register the track directly.
    services::library::announce(&state, "room-1", source("room-1/song.mp3")).await;
    for stream in [&mut ada, &mut ben] {
        assert!(matches!(
            recv(stream).await,
            ServerMessage::RoomEvent { event: RoomEvent::NewAudioSource { .. } }
        ));
    }

    let sent_at = clock::now_ms();
    send(
        &mut ada,
        &ClientMessage::Play { track_time_seconds: 30.0, audio_id: "room-1/song.mp3".into() },
    )
    .await;

    for stream in [&mut ada, &mut ben] {
        let ServerMessage::ScheduledAction { server_time_to_execute, scheduled_action } =
            recv(stream).await
        else {
            panic!("expected SCHEDULED_ACTION");
        };
        assert_eq!(
            scheduled_action,
            ScheduledAction::Play { track_time_seconds: 30.0, audio_id: "room-1/song.mp3".into() }
        );
        assert!(
            server_time_to_execute >= sent_at + state.config.schedule_lead_ms,
            "deadline must carry the scheduling lead"
        );
    }
}

#[tokio::test]
async fn disconnect_runs_the_leave_path() {
    let (state, url) = start_coordinator().await;
    let mut ada = connect(&url).await;
    let mut ben = connect(&url).await;

    join(&mut ada, "room-1", "ada").await;
    join(&mut ben, "room-1", "ben").await;

    drop(ada);

    // ben sees the re-layout broadcast once the coordinator notices.
    let survivors = loop {
        match recv(&mut ben).await {
            ServerMessage::RoomEvent { event: RoomEvent::ClientChange { clients } } => {
                if clients.len() == 1 {
                    break clients;
                }
            }
            _ => {}
        }
    };
    assert_eq!(survivors[0].username, "ben");

    let rooms = state.rooms.read().await;
    assert_eq!(rooms.get("room-1").expect("room still active").members.len(), 1);
}
