//! Web (WASM) socket implementation on top of `web_sys::WebSocket`.

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use societas_shared::CLOSE_ABNORMAL;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{js_sys, CloseEvent, Event, MessageEvent, WebSocket};

use super::{Connector, EventSink, SocketCommand, SocketEvent};

const SOCKET_ERROR_MESSAGE: &str = "WebSocket error";

/// `WebSocket.readyState` value for an open socket.
const READY_STATE_OPEN: u16 = 1;

/// Opens sockets with the browser `WebSocket` API.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSysConnector;

impl Connector for WebSysConnector {
    fn open(&self, url: &str, events: EventSink, commands: UnboundedReceiver<SocketCommand>) {
        let ws = match WebSocket::new(url) {
            Ok(ws) => ws,
            Err(e) => {
                let reason = format!("Failed to create WebSocket: {:?}", e);
                crate::log_error!("{}", reason);
                events.emit(SocketEvent::Error(reason.clone()));
                events.emit(SocketEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason,
                });
                return;
            }
        };

        let sink = events.clone();
        let onopen = Closure::wrap(Box::new(move |_: Event| {
            sink.emit(SocketEvent::Open);
        }) as Box<dyn FnMut(Event)>);
        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
        onopen.forget();

        let sink = events.clone();
        let onmessage = Closure::wrap(Box::new(move |e: MessageEvent| {
            if let Ok(text) = e.data().dyn_into::<js_sys::JsString>() {
                sink.emit(SocketEvent::Message(text.into()));
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        onmessage.forget();

        let sink = events.clone();
        // Browsers hand WebSocket errors over as a bare `Event` with no detail.
        let onerror = Closure::wrap(Box::new(move |_: Event| {
            sink.emit(SocketEvent::Error(SOCKET_ERROR_MESSAGE.to_string()));
        }) as Box<dyn FnMut(Event)>);
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onerror.forget();

        let sink = events.clone();
        let onclose = Closure::wrap(Box::new(move |e: CloseEvent| {
            sink.emit(SocketEvent::Closed {
                code: e.code(),
                reason: e.reason(),
            });
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
        onclose.forget();

        spawn_local(pump_commands(ws, events.generation(), commands));
    }
}

/// Forward manager commands to the socket until it is closed.
async fn pump_commands(ws: WebSocket, generation: u64, mut commands: UnboundedReceiver<SocketCommand>) {
    while let Some(command) = commands.next().await {
        match command {
            SocketCommand::Send(text) => {
                if ws.ready_state() != READY_STATE_OPEN {
                    crate::log_warn!("WebSocket #{} not open, dropping frame", generation);
                    continue;
                }
                crate::log_debug!("WebSocket #{} sending {} bytes", generation, text.len());
                if let Err(e) = ws.send_with_str(&text) {
                    crate::log_error!("WebSocket #{} send failed: {:?}", generation, e);
                }
            }
            SocketCommand::Close { code, reason } => {
                let _ = ws.close_with_code_and_reason(code, &reason);
                return;
            }
        }
    }
    let _ = ws.close();
}
