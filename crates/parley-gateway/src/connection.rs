use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_types::api::Claims;
use parley_types::events::{GatewayCommand, PushEvent};

use crate::hub::ConnectionHub;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Server sends a Ping this often; two missed Pongs drop the connection.
    pub heartbeat_interval: Duration,
    /// How long an unauthenticated socket may take to send Identify.
    pub identify_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            identify_timeout: Duration::from_secs(10),
        }
    }
}

/// Decode and validate a token issued by /auth/login or /register.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Handle a connection whose token was already checked at upgrade time.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    hub: ConnectionHub,
    claims: Claims,
    config: GatewayConfig,
) {
    let (sender, receiver) = socket.split();
    run_connection_loop(sender, receiver, hub, claims, config).await;
}

/// Handle a connection that must authenticate with an Identify command first.
pub async fn handle_connection(
    socket: WebSocket,
    hub: ConnectionHub,
    jwt_secret: String,
    config: GatewayConfig,
) {
    let (sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &jwt_secret, config.identify_timeout).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    run_connection_loop(sender, receiver, hub, claims, config).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    hub: ConnectionHub,
    claims: Claims,
    config: GatewayConfig,
) {
    let user_id = claims.sub;
    let username = claims.username;

    // Register before Ready so nothing broadcast in between is lost; the
    // writer task below sends queued events after Ready.
    let (conn_id, events) = hub.connect(user_id).await;
    info!("{} ({}) connected to gateway [{}]", username, user_id, conn_id);

    let ready = PushEvent::Ready {
        user_id,
        connection_id: conn_id,
    };
    if !send_event(&mut sender, &ready, config.heartbeat_interval).await {
        hub.deregister(conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(write_loop(
        sender,
        events,
        pong_received,
        config.heartbeat_interval,
    ));

    // Read frames from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(GatewayCommand::Identify { .. }) => {
                        debug!("{} ({}) sent Identify on an authenticated connection", username_recv, user_id);
                    }
                    Err(e) => {
                        let preview: String = text.as_str().chars().take(200).collect();
                        warn!("{} ({}) bad command: {} -- raw: {}", username_recv, user_id, e, preview);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.deregister(conn_id).await;
    info!("{} ({}) disconnected from gateway [{}]", username, user_id, conn_id);
}

/// Drain hub events into the socket and keep the heartbeat going. Returns
/// when the hub drops the queue, the peer stops answering Pings or a send
/// stalls for a whole heartbeat interval.
async fn write_loop<S>(
    mut sink: S,
    mut events: mpsc::Receiver<PushEvent>,
    pong_received: Arc<AtomicBool>,
    heartbeat_interval: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = events.recv() => {
                // None: the hub evicted us
                let Some(event) = event else { break };
                if !send_event(&mut sink, &event, heartbeat_interval).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if !send_within(&mut sink, Message::Ping(Bytes::new()), heartbeat_interval).await {
                    break;
                }
            }
        }
    }
}

/// False when the peer is gone or did not take the frame in time.
async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            warn!("Send stalled for {:?}, dropping connection", limit);
            false
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &PushEvent, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            // Skip the frame, keep the connection
            warn!("Failed to encode {} event: {}", event.kind(), e);
            return true;
        }
    };
    send_within(sink, Message::Text(text.into()), limit).await
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
    timeout: Duration,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(text.as_str())
                {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(timeout, identify).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use axum::extract::WebSocketUpgrade;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tokio_tungstenite::tungstenite::Message as ClientMessage;

    fn token(secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: 7,
            username: "alice".into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let claims = verify_token(&token("s3cret", 3600), "s3cret").unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        assert!(verify_token(&token("s3cret", 3600), "other").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Past the default 60s leeway
        assert!(verify_token(&token("s3cret", -3600), "s3cret").is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify_token("not-a-jwt", "s3cret").is_none());
    }

    /// A peer whose receive window is full: never ready for another frame.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    const BEAT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn stalled_send_ends_writer() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(PushEvent::NewUser {
            user: parley_types::models::User {
                id: 1,
                username: "alice".into(),
                email: "alice@example.com".into(),
            },
        })
        .await
        .unwrap();

        let writer = write_loop(StalledSink, rx, Arc::new(AtomicBool::new(true)), BEAT);
        assert!(tokio::time::timeout(Duration::from_secs(2), writer).await.is_ok());
        drop(tx);
    }

    #[tokio::test]
    async fn two_missed_pongs_end_writer() {
        let (_tx, rx) = mpsc::channel(4);
        let writer = write_loop(
            futures_util::sink::drain(),
            rx,
            Arc::new(AtomicBool::new(true)),
            BEAT,
        );
        assert!(tokio::time::timeout(Duration::from_secs(2), writer).await.is_ok());
    }

    #[tokio::test]
    async fn answered_pings_keep_writer_alive() {
        let (_tx, rx) = mpsc::channel(4);
        let pong = Arc::new(AtomicBool::new(true));
        let answering = pong.clone();
        let responder = tokio::spawn(async move {
            loop {
                answering.store(true, Ordering::Release);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let writer = write_loop(futures_util::sink::drain(), rx, pong, BEAT);
        assert!(tokio::time::timeout(Duration::from_millis(400), writer).await.is_err());
        responder.abort();
    }

    /// Serve the gateway on an ephemeral port. With `claims` the socket is
    /// treated as already authenticated, otherwise it must identify.
    async fn serve(hub: ConnectionHub, config: GatewayConfig, claims: Option<Claims>) -> SocketAddr {
        let handler = move |ws: WebSocketUpgrade| {
            let hub = hub.clone();
            let config = config.clone();
            let claims = claims.clone();
            async move {
                ws.on_upgrade(move |socket| async move {
                    match claims {
                        Some(claims) => handle_connection_authenticated(socket, hub, claims, config).await,
                        None => handle_connection(socket, hub, "s3cret".into(), config).await,
                    }
                })
            }
        };
        let app = axum::Router::new().route("/ws", axum::routing::get(handler));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn wait_for_connections(hub: &ConnectionHub, expected: usize) {
        let settled = async {
            while hub.connection_count().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), settled)
            .await
            .expect("connection count did not settle");
    }

    #[tokio::test]
    async fn silent_client_is_dropped_by_heartbeat() {
        let hub = ConnectionHub::default();
        let config = GatewayConfig {
            heartbeat_interval: BEAT,
            ..GatewayConfig::default()
        };
        let claims = Claims {
            sub: 7,
            username: "alice".into(),
            exp: usize::MAX,
        };
        let addr = serve(hub.clone(), config, Some(claims)).await;

        // Never polled, so no Pong is ever sent back
        let (_socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        wait_for_connections(&hub, 1).await;
        wait_for_connections(&hub, 0).await;
        assert_eq!(hub.user_connection_count(7).await, 0);
    }

    #[tokio::test]
    async fn missing_identify_closes_socket() {
        let hub = ConnectionHub::default();
        let config = GatewayConfig {
            identify_timeout: Duration::from_millis(100),
            ..GatewayConfig::default()
        };
        let addr = serve(hub.clone(), config, None).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("socket stayed open without identify");
        assert!(!matches!(next, Some(Ok(ClientMessage::Text(_)))));
        assert_eq!(hub.connection_count().await, 0);
    }
}
