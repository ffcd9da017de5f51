//! WebSocket I/O for the stream source.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, Result};

use super::Command;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a connection, giving up after `timeout`.
pub async fn connect(url: String, timeout: Duration) -> Result<WsStream> {
    info!("WS: connecting to {url}");
    let (ws, response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ClientError::ConnectTimeout(timeout))??;
    debug!("WS: handshake status {}", response.status());
    info!("WS: connected to {url}");
    Ok(ws)
}

pub fn encode(cmd: &Command) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(cmd)?))
}

/// Inbound message, reduced to what the client acts on.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    Text(String),
    Ping(Vec<u8>),
    Closed,
    Ignored,
}

pub fn classify(msg: Message) -> Incoming {
    match msg {
        Message::Text(t)   => Incoming::Text(t),
        Message::Binary(b) => match String::from_utf8(b) {
            Ok(t)  => Incoming::Text(t),
            Err(e) => { warn!("WS: dropping non-UTF-8 binary frame: {e}"); Incoming::Ignored }
        },
        Message::Ping(p)   => Incoming::Ping(p),
        Message::Close(f)  => { debug!("WS: close frame {f:?}"); Incoming::Closed }
        _                  => Incoming::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_text_frames() {
        let msg = encode(&Command::set_topics(["a"])).unwrap();
        assert_eq!(msg, Message::Text(r#"{"action":"set_topics","topics":["a"]}"#.into()));
    }

    #[test]
    fn binary_utf8_is_text() {
        assert_eq!(classify(Message::Binary(b"{}".to_vec())), Incoming::Text("{}".into()));
        assert_eq!(classify(Message::Binary(vec![0xff, 0xfe])), Incoming::Ignored);
        assert_eq!(classify(Message::Close(None)), Incoming::Closed);
        assert_eq!(classify(Message::Pong(vec![])), Incoming::Ignored);
    }
}
