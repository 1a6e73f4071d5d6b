use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

use crate::endpoint::{Rx, Signal, Tx};
use crate::handshake::SubdomainHint;
use crate::message::Outbound;
use crate::router::SignalingRouter;

/// default framing limits (§4.1 detail floor): one UTF-8 JSON object per
/// frame, bounded to 1 MiB.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

pub fn default_ws_config() -> WebSocketConfig {
    ws_config(MAX_MESSAGE_SIZE)
}

pub fn ws_config(max_message_size: usize) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(max_message_size),
        max_frame_size: Some(max_message_size),
        accept_unmasked_frames: false,
        ..Default::default()
    }
}

/// one live, bidirectional, message-framed connection.
///
/// owns the socket outright; the registry only ever holds this endpoint's
/// `Tx` handle, never the socket (see the cyclic-ownership design note).
pub struct Connection {
    id: String,
    router: Arc<SignalingRouter>,
    socket: WebSocketStream<TcpStream>,
    tx: Tx,
    rx: Rx,
}

impl Connection {
    pub async fn accept(stream: TcpStream, router: Arc<SignalingRouter>, config: WebSocketConfig) -> anyhow::Result<Self> {
        let (guard, hint_cell) = SubdomainHint::new();
        let socket = accept_hdr_async_with_config(stream, guard, Some(config)).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = Tx::new_pair();

        let mut conn = Self {
            id,
            router,
            socket,
            tx,
            rx,
        };

        conn.send_welcome(hint_cell).await?;
        Ok(conn)
    }

    async fn send_welcome(&mut self, hint: Arc<Mutex<Option<String>>>) -> anyhow::Result<()> {
        let subdomain_session = hint.lock().unwrap().clone();
        let welcome = Outbound::Welcome {
            client_id: self.id.clone(),
            subdomain_session,
        };

        self.socket.send(Message::Text(welcome.to_text())).await?;
        Ok(())
    }

    /// run until the connection closes, then release any session
    /// attachment it held.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                signal = self.rx.recv() => {
                    match signal {
                        Some(Signal::Body(body)) => {
                            if self.socket.send(Message::Text(body)).await.is_err() {
                                break;
                            }
                        }
                        Some(Signal::Close) | None => break,
                    }
                }
                frame = self.socket.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.router.on_text(&self.id, &self.tx, &text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => break,
                    }
                }
            }
        }

        self.router.depart(&self.id).await;
    }
}

/// accept loop: one task per connection, each with its own reader and a
/// single serialized writer path (the `Connection::run` select loop above).
pub async fn serve(listener: tokio::net::TcpListener, router: Arc<SignalingRouter>, config: WebSocketConfig) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };

        let router = router.clone();
        let config = config.clone();
        tokio::spawn(async move {
            match Connection::accept(stream, router, config).await {
                Ok(conn) => {
                    log::info!("endpoint connected: addr={addr}");
                    conn.run().await;
                    log::info!("endpoint disconnected: addr={addr}");
                }
                Err(e) => log::warn!("handshake failed: addr={addr}, err={e}"),
            }
        });
    }
}
