//! Full-duplex text transport.
//!
//! The controller talks to the network only through [`Connector`] and
//! [`Transport`], so tests drive it with an in-memory pair
//! (see [`crate::testing`]) and production uses [`WsConnector`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::errors::TransportError;

/// WebSocket close codes the controller cares about.
pub mod close_code {
    /// Normal closure; never triggers a reconnect.
    pub const NORMAL: u16 = 1000;
    /// Close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Local close after the pong deadline passed.
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;
}

/// Whether `code` ends the session instead of scheduling a reconnect.
pub fn is_normal_closure(code: u16) -> bool {
    code == close_code::NORMAL
}

/// Something the transport observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete inbound text frame.
    Frame(String),
    /// The transport is gone.
    Closed {
        /// Close code; [`close_code::ABNORMAL`] when none was received.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// One open connection.
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Wait for the next inbound frame or the close.
    ///
    /// Must be cancel-safe: it is polled inside `select!` and dropping the
    /// future must not lose a frame.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close with `code`. Best effort; errors are logged and swallowed.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = connect_async(url.as_str()).await.map_err(|e| {
            TransportError::Connect {
                url: redact(url),
                reason: e.to_string(),
            }
        })?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// A `tokio-tungstenite` stream adapted to [`Transport`].
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Frame(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => return TransportEvent::Frame(text.to_owned()),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => TransportEvent::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => TransportEvent::Closed {
                            code: close_code::NO_STATUS,
                            reason: String::new(),
                        },
                    };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    return TransportEvent::Closed {
                        code: close_code::ABNORMAL,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return TransportEvent::Closed {
                        code: close_code::ABNORMAL,
                        reason: "stream ended".into(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, code, "close handshake failed");
        }
    }
}

/// Endpoint without the identifying query string, for logs and errors.
pub(crate) fn redact(url: &Url) -> String {
    let mut bare = url.clone();
    bare.set_query(None);
    bare.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_1000_is_normal() {
        assert!(is_normal_closure(1000));
        for code in [1001, 1005, 1006, 1011, 4000] {
            assert!(!is_normal_closure(code), "{code}");
        }
    }

    #[test]
    fn redact_strips_query() {
        let url = Url::parse("ws://h:1/ws?principalId=u1&clientId=c1").unwrap();
        assert_eq!(redact(&url), "ws://h:1/ws");
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/ws?clientId=c1")).unwrap();
        let err = WsConnector.connect(&url).await.err().unwrap();
        match err {
            TransportError::Connect { url, .. } => assert!(!url.contains("clientId")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
