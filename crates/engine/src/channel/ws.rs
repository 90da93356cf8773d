// tokio-tungstenite transport for the sync channel.
//
// JSON text frames; pings are answered inline so the relay's heartbeat
// keeps the connection alive without the caller's involvement.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use easel_common::protocol::{decode_message, encode_message, WsMessage};

use super::SyncTransport;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over a tungstenite socket.
#[derive(Default)]
pub struct WsTransport {
    socket: Option<Socket>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncTransport for WsTransport {
    async fn connect(&mut self, ws_url: &str) -> Result<()> {
        let (socket, _response) = connect_async(ws_url)
            .await
            .with_context(|| format!("failed to open websocket to {ws_url}"))?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, message: &WsMessage) -> Result<()> {
        let socket =
            self.socket.as_mut().ok_or_else(|| anyhow!("websocket is not connected"))?;
        let raw = encode_message(message).context("failed to encode ws message")?;
        socket.send(WsFrame::Text(raw.into())).await.context("failed to send ws frame")
    }

    async fn recv(&mut self) -> Result<Option<WsMessage>> {
        loop {
            let frame = {
                let socket =
                    self.socket.as_mut().ok_or_else(|| anyhow!("websocket is not connected"))?;
                socket.next().await
            };

            match frame {
                Some(Ok(WsFrame::Text(raw))) => {
                    return decode_message(raw.as_str())
                        .map(Some)
                        .context("failed to decode ws frame");
                }
                Some(Ok(WsFrame::Binary(raw))) => {
                    let raw = String::from_utf8(raw.to_vec())
                        .context("binary ws frame is not valid utf8")?;
                    return decode_message(&raw).map(Some).context("failed to decode ws frame");
                }
                Some(Ok(WsFrame::Ping(payload))) => {
                    if let Some(socket) = self.socket.as_mut() {
                        socket
                            .send(WsFrame::Pong(payload))
                            .await
                            .context("failed to answer websocket ping")?;
                    }
                }
                Some(Ok(WsFrame::Pong(_))) | Some(Ok(WsFrame::Frame(_))) => {}
                Some(Ok(WsFrame::Close(_))) | None => {
                    self.socket = None;
                    return Ok(None);
                }
                Some(Err(error)) => {
                    self.socket = None;
                    return Err(anyhow!(error).context("websocket receive failed"));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}
