//! Streaming chat client for the gateway's `/ws/chat` endpoint.
//!
//! One connection per sidecar incarnation, no auto-reconnect: the runtime
//! coordinator rebuilds the client on every `Ready` event instead. Parsed
//! frames fan out over a broadcast channel; dropping a receiver is the
//! unsubscribe.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use mira_wire::{BridgeError, Result, WsInbound, WsOutbound};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct GatewayWsClient {
    url: RwLock<String>,
    writer: Mutex<Option<WsSink>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<WsOutbound>,
}

impl GatewayWsClient {
    pub fn new(gateway_port: u16) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            url: RwLock::new(format!("ws://127.0.0.1:{gateway_port}/ws/chat")),
            writer: Mutex::new(None),
            reader_task: Mutex::new(None),
            events,
        }
    }

    /// Receive parsed chat frames. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<WsOutbound> {
        self.events.subscribe()
    }

    /// Open the chat socket, replacing any previous connection.
    pub async fn connect(&self) -> Result<()> {
        self.disconnect().await;

        let url = self.url.read().await.clone();
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| BridgeError::WebSocket(e.to_string()))?;
        tracing::info!("Chat socket connected: {url}");

        let (sink, mut source) = stream.split();
        *self.writer.lock().await = Some(sink);

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WsOutbound>(&text) {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(e) => tracing::warn!("Dropping malformed chat frame: {e}"),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Chat socket closed by the gateway");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Chat socket read error: {e}");
                        break;
                    }
                }
            }
        });
        *self.reader_task.lock().await = Some(task);
        Ok(())
    }

    /// Send a frame. Errors when the socket is not open.
    pub async fn send(&self, frame: &WsInbound) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(BridgeError::WebSocket("chat socket is not connected".into()));
        };
        let text = serde_json::to_string(frame)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| BridgeError::WebSocket(e.to_string()))
    }

    /// Close the socket and stop the read loop. Subscribers stay subscribed
    /// and simply receive nothing until the next `connect`.
    pub async fn disconnect(&self) {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;
    use mira_wire::TurnDone;
    use std::time::Duration;

    async fn chat_stub(mut socket: WebSocket) {
        while let Some(Ok(message)) = socket.recv().await {
            let AxumMessage::Text(text) = message else { continue };
            let Ok(WsInbound::UserMessage { content, .. }) =
                serde_json::from_str::<WsInbound>(text.as_str())
            else {
                continue;
            };
            if content == "garble" {
                let _ = socket
                    .send(AxumMessage::Text("this is not json".to_string().into()))
                    .await;
            } else {
                let token = serde_json::to_string(&WsOutbound::Token("Hi".into())).unwrap();
                let _ = socket.send(AxumMessage::Text(token.into())).await;
            }
            let done = serde_json::to_string(&WsOutbound::Done(TurnDone {
                content: format!("replied to {content}"),
                tools_used: vec![],
            }))
            .unwrap();
            let _ = socket.send(AxumMessage::Text(done.into())).await;
        }
    }

    async fn serve_chat_stub() -> u16 {
        let app = Router::new().route(
            "/ws/chat",
            get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(chat_stub) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn next_event(events: &mut broadcast::Receiver<WsOutbound>) -> WsOutbound {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn send_before_connect_errors() {
        let client = GatewayWsClient::new(9);
        let err = client
            .send(&WsInbound::UserMessage {
                content: "hi".into(),
                session_id: "mira:chat".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::WebSocket(_)));
    }

    #[tokio::test]
    async fn streams_token_then_done() {
        let port = serve_chat_stub().await;
        let client = GatewayWsClient::new(port);
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        client
            .send(&WsInbound::UserMessage {
                content: "hello".into(),
                session_id: "mira:chat".into(),
            })
            .await
            .unwrap();

        match next_event(&mut events).await {
            WsOutbound::Token(text) => assert_eq!(text, "Hi"),
            other => panic!("unexpected frame: {other:?}"),
        }
        match next_event(&mut events).await {
            WsOutbound::Done(done) => assert_eq!(done.content, "replied to hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let port = serve_chat_stub().await;
        let client = GatewayWsClient::new(port);
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        client
            .send(&WsInbound::UserMessage {
                content: "garble".into(),
                session_id: "mira:chat".into(),
            })
            .await
            .unwrap();

        // The unparseable frame is skipped; the next delivery is the done.
        match next_event(&mut events).await {
            WsOutbound::Done(done) => assert_eq!(done.content, "replied to garble"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_receiver_is_unsubscribed_without_affecting_others() {
        let port = serve_chat_stub().await;
        let client = GatewayWsClient::new(port);
        client.connect().await.unwrap();

        let first = client.subscribe();
        let mut second = client.subscribe();
        assert_eq!(client.events.receiver_count(), 2);

        drop(first);
        assert_eq!(client.events.receiver_count(), 1);

        client
            .send(&WsInbound::UserMessage {
                content: "hello".into(),
                session_id: "mira:chat".into(),
            })
            .await
            .unwrap();

        // The remaining subscriber still gets the full turn.
        match next_event(&mut second).await {
            WsOutbound::Token(text) => assert_eq!(text, "Hi"),
            other => panic!("unexpected frame: {other:?}"),
        }
        match next_event(&mut second).await {
            WsOutbound::Done(done) => assert_eq!(done.content, "replied to hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_clears_the_connection() {
        let port = serve_chat_stub().await;
        let client = GatewayWsClient::new(port);
        client.connect().await.unwrap();
        client.disconnect().await;

        let err = client
            .send(&WsInbound::UserMessage {
                content: "hi".into(),
                session_id: "mira:chat".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::WebSocket(_)));
    }
}
