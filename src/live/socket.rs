use anyhow::Result;
use log::{debug, warn};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::{HeaderValue, header::COOKIE};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::live::{CLOSE_ABNORMAL, CLOSE_FORBIDDEN, CLOSE_NORMAL, CLOSE_UNAUTHORIZED};

/// How often the reader wakes up to check for a close request.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What the reader thread reports to the event loop. Every event carries the
/// generation of the socket that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { generation: u64 },
    Message { generation: u64, text: String },
    Closed { generation: u64, code: u16 },
}

/// One websocket connection. The blocking reads happen on a helper thread
/// that only forwards frames; all state stays with the receiving loop.
pub struct LiveSocket {
    closing: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LiveSocket {
    /// Connects in the background; the outcome arrives on `events` as
    /// `Opened` or `Closed`.
    pub fn spawn(
        url: &Url,
        cookie_header: Option<&str>,
        generation: u64,
        events: Sender<ChannelEvent>,
    ) -> Result<Self> {
        let mut request = url.as_str().into_client_request()?;
        if let Some(cookie) = cookie_header {
            request
                .headers_mut()
                .insert(COOKIE, HeaderValue::from_str(cookie)?);
        }

        let closing = Arc::new(AtomicBool::new(false));
        let flag = closing.clone();
        let handle = thread::Builder::new()
            .name(format!("live-channel-{generation}"))
            .spawn(move || run(request, generation, flag, events))?;

        Ok(Self {
            closing,
            handle: Some(handle),
        })
    }

    /// Asks the reader to send a normal close frame and exit. Does not wait;
    /// a reader still stuck in the handshake finishes on its own and its
    /// events are stale by then.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// Closes and waits for the reader to exit, for process shutdown.
    pub fn close_and_wait(mut self) {
        self.close();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("live channel reader panicked");
        }
    }
}

impl Drop for LiveSocket {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(request: Request, generation: u64, closing: Arc<AtomicBool>, events: Sender<ChannelEvent>) {
    let (mut socket, _response) = match tungstenite::connect(request) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("live channel connect failed: {e}");
            let _ = events.send(ChannelEvent::Closed {
                generation,
                code: handshake_close_code(&e),
            });
            return;
        }
    };

    if let Err(e) = set_read_timeout(&socket, POLL_INTERVAL) {
        warn!("could not set live channel read timeout: {e}");
    }
    if events.send(ChannelEvent::Opened { generation }).is_err() {
        return;
    }

    let code = loop {
        if closing.load(Ordering::SeqCst) {
            let _ = socket.close(None);
            let _ = socket.flush();
            break CLOSE_NORMAL;
        }
        match socket.read() {
            Ok(Message::Text(text)) => {
                if events
                    .send(ChannelEvent::Message { generation, text })
                    .is_err()
                {
                    // receiver gone: the loop shut down
                    let _ = socket.close(None);
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                let _ = socket.flush();
                break frame.map_or(CLOSE_ABNORMAL, |f| u16::from(f.code));
            }
            Ok(other) => debug!("ignoring non-text frame ({} bytes)", other.len()),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!("live channel read failed: {e}");
                break CLOSE_ABNORMAL;
            }
        }
    };

    let _ = events.send(ChannelEvent::Closed { generation, code });
}

/// A rejected handshake is reported like the matching close code so the
/// reconnect policy treats 401/403 as terminal.
fn handshake_close_code(e: &tungstenite::Error) -> u16 {
    match e {
        tungstenite::Error::Http(res) => match res.status().as_u16() {
            401 => CLOSE_UNAUTHORIZED,
            403 => CLOSE_FORBIDDEN,
            _ => CLOSE_ABNORMAL,
        },
        _ => CLOSE_ABNORMAL,
    }
}

fn set_read_timeout(
    socket: &WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
) -> std::io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(s) => s.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}
