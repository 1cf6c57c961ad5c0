//! Native/Desktop socket implementation using tokio-tungstenite.

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{SinkExt, StreamExt};
use societas_shared::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

use super::{Connector, EventSink, SocketCommand, SocketEvent};

/// Close code reported when the server closed without a status code.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens sockets with `tokio_tungstenite::connect_async` on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn open(&self, url: &str, events: EventSink, commands: UnboundedReceiver<SocketCommand>) {
        let url = url.to_string();
        tokio::spawn(run_socket(url, events, commands));
    }
}

/// Own one socket from connect to close, reporting through `events`.
async fn run_socket(
    url: String,
    events: EventSink,
    mut commands: UnboundedReceiver<SocketCommand>,
) {
    let generation = events.generation();

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            crate::log_error!("WebSocket #{} to {} failed to open: {}", generation, url, e);
            events.emit(SocketEvent::Error(e.to_string()));
            events.emit(SocketEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: e.to_string(),
            });
            return;
        }
    };

    crate::log_debug!("WebSocket #{} connected to {}", generation, url);
    if !events.emit(SocketEvent::Open) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    let (code, reason) = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SocketEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    crate::log_debug!("WebSocket #{} received close frame: {:?}", generation, frame);
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                }
                Some(Ok(_)) => {
                    // Pings are answered by tungstenite; binary frames are not part of the protocol.
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket #{} read error: {}", generation, e);
                    events.emit(SocketEvent::Error(e.to_string()));
                    break (CLOSE_ABNORMAL, e.to_string());
                }
                None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
            },
            command = commands.next() => match command {
                Some(SocketCommand::Send(text)) => {
                    crate::log_debug!("WebSocket #{} sending {} bytes", generation, text.len());
                    if let Err(e) = write.send(Message::text(text)).await {
                        crate::log_error!("WebSocket #{} send failed: {}", generation, e);
                        events.emit(SocketEvent::Error(e.to_string()));
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Some(SocketCommand::Close { code, reason }) => {
                    send_close(&mut write, code, &reason).await;
                    break (code, reason);
                }
                None => {
                    send_close(&mut write, CLOSE_NORMAL, "handle dropped").await;
                    break (CLOSE_NORMAL, "handle dropped".to_string());
                }
            },
        }
    };

    crate::log_debug!("WebSocket #{} closed ({}): {}", generation, code, reason);
    events.emit(SocketEvent::Closed { code, reason });
}

async fn send_close<S>(write: &mut S, code: u16, reason: &str)
where
    S: futures_util::Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    let _ = write.send(Message::Close(Some(frame))).await;
}
