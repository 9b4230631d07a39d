//! WebSocket transports.
//!
//! A [`Transport`] moves raw text frames and reports lifecycle events. It knows
//! nothing about rooms or reconnection; the
//! [`ConnectionManager`](crate::connection::ConnectionManager) owns it and drives
//! it by polling.

use crate::error::{SyncError, SyncResult};

/// Events reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket is open and ready to send.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The socket closed (by the peer or after an error).
    Closed,
    /// Connecting or reading failed.
    Error(String),
}

/// A bidirectional text-frame connection.
pub trait Transport {
    /// Start opening a connection. Completion is reported as [`TransportEvent::Opened`].
    fn open(&mut self, url: &str) -> SyncResult<()>;

    /// Tear down the connection. No further events are reported for it.
    fn close(&mut self);

    /// Send a text frame.
    fn send(&mut self, text: &str) -> SyncResult<()>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}

/// Check that `url` is a WebSocket URL.
pub fn validate_endpoint(url: &str) -> SyncResult<()> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| SyncError::InvalidEndpoint(format!("not a ws:// or wss:// URL: {}", url)))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(SyncError::InvalidEndpoint(format!("missing host: {}", url)));
    }
    Ok(())
}

// ============================================================================
// WASM WebSocket
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_transport {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

    /// Browser WebSocket transport.
    ///
    /// Callbacks push into a shared buffer that is drained by `poll_events()`.
    pub struct WasmWebSocket {
        ws: Option<WebSocket>,
        events: Rc<RefCell<Vec<TransportEvent>>>,
        // Keep closures alive while the socket may call them
        _on_open: Option<Closure<dyn Fn()>>,
        _on_message: Option<Closure<dyn Fn(MessageEvent)>>,
        _on_close: Option<Closure<dyn Fn(CloseEvent)>>,
        _on_error: Option<Closure<dyn Fn(ErrorEvent)>>,
    }

    impl WasmWebSocket {
        pub fn new() -> Self {
            Self {
                ws: None,
                events: Rc::new(RefCell::new(Vec::new())),
                _on_open: None,
                _on_message: None,
                _on_close: None,
                _on_error: None,
            }
        }
    }

    impl Default for WasmWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for WasmWebSocket {
        fn open(&mut self, url: &str) -> SyncResult<()> {
            validate_endpoint(url)?;
            self.close();

            let ws = WebSocket::new(url)
                .map_err(|e| SyncError::Transport(format!("Failed to create WebSocket: {:?}", e)))?;
            ws.set_binary_type(web_sys::BinaryType::Arraybuffer);

            // Fresh buffer so late callbacks of a previous socket can't leak in
            let events = Rc::new(RefCell::new(Vec::new()));
            self.events = events.clone();

            let events_open = events.clone();
            let on_open = Closure::wrap(Box::new(move || {
                events_open.borrow_mut().push(TransportEvent::Opened);
            }) as Box<dyn Fn()>);
            ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

            let events_msg = events.clone();
            let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
                if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                    events_msg.borrow_mut().push(TransportEvent::Message(txt.into()));
                }
            }) as Box<dyn Fn(MessageEvent)>);
            ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

            let events_close = events.clone();
            let on_close = Closure::wrap(Box::new(move |_e: CloseEvent| {
                events_close.borrow_mut().push(TransportEvent::Closed);
            }) as Box<dyn Fn(CloseEvent)>);
            ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

            let events_err = events;
            let on_error = Closure::wrap(Box::new(move |_e: ErrorEvent| {
                events_err
                    .borrow_mut()
                    .push(TransportEvent::Error("WebSocket error".to_string()));
            }) as Box<dyn Fn(ErrorEvent)>);
            ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            self.ws = Some(ws);
            self._on_open = Some(on_open);
            self._on_message = Some(on_message);
            self._on_close = Some(on_close);
            self._on_error = Some(on_error);
            Ok(())
        }

        fn close(&mut self) {
            if let Some(ws) = self.ws.take() {
                ws.set_onopen(None);
                ws.set_onmessage(None);
                ws.set_onclose(None);
                ws.set_onerror(None);
                let _ = ws.close();
            }
            self._on_open = None;
            self._on_message = None;
            self._on_close = None;
            self._on_error = None;
            self.events.borrow_mut().clear();
        }

        fn send(&mut self, text: &str) -> SyncResult<()> {
            match self.ws {
                Some(ref ws) => ws
                    .send_with_str(text)
                    .map_err(|e| SyncError::Transport(format!("Send failed: {:?}", e))),
                None => Err(SyncError::Transport("Not connected".to_string())),
            }
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            std::mem::take(&mut *self.events.borrow_mut())
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_transport::WasmWebSocket;

// ============================================================================
// Native WebSocket
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_transport {
    use super::*;
    use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{connect, Message};
    use url::Url;

    /// Commands sent to the socket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// Native WebSocket transport.
    ///
    /// The blocking socket lives on a background thread; frames and events
    /// cross over channels so the caller never blocks.
    pub struct NativeWebSocket {
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for NativeWebSocket {
        fn open(&mut self, url: &str) -> SyncResult<()> {
            validate_endpoint(url)?;
            Url::parse(url).map_err(|e| SyncError::InvalidEndpoint(format!("{}: {}", url, e)))?;
            self.close();

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<TransportEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || {
                log::info!("WebSocket thread: connecting to {}", url);

                let (mut socket, response) = match connect(&url) {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::error!("WebSocket connection failed: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(format!("Connection failed: {}", e)));
                        return;
                    }
                };
                log::info!("WebSocket connected, status: {}", response.status());
                let _ = event_tx.send(TransportEvent::Opened);

                // Short read timeout keeps the command channel responsive
                match socket.get_mut() {
                    tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                        let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                        let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                    }
                    #[allow(unreachable_patterns)]
                    _ => {
                        log::debug!("TLS or other stream - using default timeout handling");
                    }
                }

                loop {
                    match cmd_rx.try_recv() {
                        Ok(WsCommand::Send(msg)) => {
                            log::trace!("WebSocket sending {} bytes", msg.len());
                            if let Err(e) = socket.send(Message::Text(msg)) {
                                log::error!("WebSocket send error: {}", e);
                                let _ = event_tx.send(TransportEvent::Error(format!("Send failed: {}", e)));
                                break;
                            }
                        }
                        Ok(WsCommand::Close) => {
                            log::info!("WebSocket close requested");
                            let _ = socket.close(None);
                            return;
                        }
                        Err(TryRecvError::Disconnected) => {
                            log::debug!("WebSocket command channel dropped");
                            let _ = socket.close(None);
                            return;
                        }
                        Err(TryRecvError::Empty) => {}
                    }

                    match socket.read() {
                        Ok(Message::Text(txt)) => {
                            log::trace!("WebSocket received {} bytes", txt.len());
                            if event_tx.send(TransportEvent::Message(txt)).is_err() {
                                return;
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = socket.send(Message::Pong(data));
                        }
                        Ok(Message::Close(_)) => {
                            log::info!("WebSocket received close frame");
                            break;
                        }
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(ref e))
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            log::error!("WebSocket read error: {}", e);
                            break;
                        }
                    }
                }

                log::info!("WebSocket thread exiting");
                let _ = event_tx.send(TransportEvent::Closed);
            });

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn close(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
        }

        fn send(&mut self, text: &str) -> SyncResult<()> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(text.to_string()))
                    .map_err(|e| SyncError::Transport(format!("Send failed: {}", e))),
                None => Err(SyncError::Transport("Not connected".to_string())),
            }
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            match self.event_rx {
                Some(ref rx) => rx.try_iter().collect(),
                None => Vec::new(),
            }
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_transport::NativeWebSocket;

/// Platform-specific WebSocket transport.
#[cfg(target_arch = "wasm32")]
pub type PlatformWebSocket = WasmWebSocket;

#[cfg(not(target_arch = "wasm32"))]
pub type PlatformWebSocket = NativeWebSocket;
