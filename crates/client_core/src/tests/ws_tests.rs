use super::*;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;

#[derive(Clone, Copy)]
struct BrokerMode {
    reject: bool,
}

async fn upgrade(State(mode): State<BrokerMode>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| echo_broker(socket, mode))
}

/// Answers CONNECT, then echoes every SEND to `/topic/messages`.
async fn echo_broker(mut socket: WebSocket, mode: BrokerMode) {
    let mut subscription = None;
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(Some(frame)) = StompFrame::decode(&text) else {
            continue;
        };
        let reply = match frame.command.as_str() {
            "CONNECT" if mode.reject => StompFrame::new("ERROR")
                .header("message", "bad credentials")
                .encode(),
            "CONNECT" => StompFrame::new("CONNECTED").header("version", "1.2").encode(),
            "SUBSCRIBE" => {
                if frame.get("destination") == Some("/topic/messages") {
                    subscription = frame.get("id").map(str::to_string);
                }
                // Heart-beat between real frames.
                "\n".to_string()
            }
            "SEND" => {
                let Some(id) = &subscription else { continue };
                StompFrame::new("MESSAGE")
                    .header("subscription", id.as_str())
                    .header("destination", "/topic/messages")
                    .header("message-id", "m-1")
                    .with_body(frame.body.clone())
                    .encode()
            }
            _ => continue,
        };
        if socket.send(WsMessage::Text(reply)).await.is_err() {
            return;
        }
    }
}

async fn spawn_broker(reject: bool) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/chat/websocket", get(upgrade))
        .with_state(BrokerMode { reject });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("ws://{addr}/chat/websocket"))
}

#[test]
fn derives_stomp_host_from_url() {
    let connector = WsStompConnector::new("ws://broker.local:61614/chat/websocket").expect("url");
    assert_eq!(connector.host, "broker.local:61614");
    assert!(WsStompConnector::new("not a url").is_err());
}

#[tokio::test]
async fn publishes_and_receives_through_subscription() {
    let url = spawn_broker(false).await.expect("spawn broker");
    let connector = WsStompConnector::new(url).expect("connector");

    let BrokerLink { handle, mut events } = connector.connect().await.expect("connect");
    handle
        .subscribe("sub-1-0", "/topic/messages")
        .await
        .expect("subscribe");
    handle
        .publish("/app/send", r#"{"senderId":1,"receiverId":2,"content":"hi"}"#)
        .await
        .expect("publish");

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
        .await
        .expect("frame in time")
        .expect("link open");
    match event {
        LinkEvent::Frame(frame) => {
            assert_eq!(frame.destination, "/topic/messages");
            assert_eq!(frame.body, r#"{"senderId":1,"receiverId":2,"content":"hi"}"#);
        }
        LinkEvent::Closed(reason) => panic!("link closed early: {reason:?}"),
    }

    handle.close().await;
}

#[tokio::test]
async fn broker_error_fails_the_handshake() {
    let url = spawn_broker(true).await.expect("spawn broker");
    let connector = WsStompConnector::new(url).expect("connector");

    let err = match connector.connect().await {
        Ok(_) => panic!("handshake must fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("bad credentials"), "unexpected: {err}");
}
