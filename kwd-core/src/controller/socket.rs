//! `SocketController`: keyword events pushed over a TCP stream.
//!
//! The peer sends the bare keyword text each time it detects the wake word.
//! The wire carries no position information, so every detection is reported
//! with unspecified offsets and the detector anchors it at the reader's
//! current position.

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{HardwareController, KeywordDetection};
use crate::error::{KwdError, Result};

/// Largest keyword message accepted in a single receive.
pub const MAX_MESSAGE_LEN: usize = 512;

/// `set_read_timeout` rejects a zero duration.
const MIN_WAIT: Duration = Duration::from_millis(1);

struct Connection {
    stream: TcpStream,
    peer_closed: bool,
}

pub struct SocketController {
    peer: String,
    conn: Mutex<Connection>,
}

impl SocketController {
    /// Resolve `host`, then connect to the first address that accepts.
    ///
    /// Nothing is retained on failure: a socket that fails to connect is
    /// dropped (and closed) before the next address is tried.
    ///
    /// # Errors
    /// `KwdError::ControllerInit` if resolution fails or no address accepts.
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| KwdError::ControllerInit(format!("resolve {host}:{port}: {e}")))?
            .collect();

        if addrs.is_empty() {
            return Err(KwdError::ControllerInit(format!(
                "{host}:{port} resolved to no addresses"
            )));
        }

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, connect_timeout.max(MIN_WAIT)) {
                Ok(stream) => {
                    info!(%addr, "connected to keyword socket");
                    return Ok(Self {
                        peer: format!("{host}:{port}"),
                        conn: Mutex::new(Connection {
                            stream,
                            peer_closed: false,
                        }),
                    });
                }
                Err(e) => {
                    debug!(%addr, "keyword socket connect failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(KwdError::ControllerInit(format!(
            "connect {host}:{port}: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl HardwareController for SocketController {
    fn read(&self, timeout: Duration) -> Result<Option<KeywordDetection>> {
        let mut conn = self.conn.lock();

        if conn.peer_closed {
            // Report the dead link at most once per poll window.
            drop(conn);
            thread::sleep(timeout);
            return Err(KwdError::Transport(format!("{} closed the connection", self.peer)));
        }

        conn.stream
            .set_read_timeout(Some(timeout.max(MIN_WAIT)))
            .map_err(|e| KwdError::Transport(format!("set read timeout: {e}")))?;

        let mut buf = [0u8; MAX_MESSAGE_LEN];
        match conn.stream.read(&mut buf) {
            Ok(0) => {
                conn.peer_closed = true;
                warn!(peer = %self.peer, "keyword socket closed by peer");
                Err(KwdError::Transport(format!("{} closed the connection", self.peer)))
            }
            Ok(n) => decode_keyword(&buf[..n]).map(|keyword| {
                debug!(%keyword, "socket detection");
                Some(KeywordDetection::unspecified(keyword))
            }),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(KwdError::Transport(format!("recv from {}: {e}", self.peer))),
        }
    }

    fn name(&self) -> &str {
        "socket"
    }
}

/// Interpret a received payload as a NUL-terminated UTF-8 keyword.
fn decode_keyword(payload: &[u8]) -> Result<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let text = std::str::from_utf8(&payload[..end])
        .map_err(|e| KwdError::Decode(format!("keyword is not UTF-8: {e}")))?;
    let keyword = text.trim();
    if keyword.is_empty() {
        return Err(KwdError::Decode("empty keyword payload".into()));
    }
    Ok(keyword.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn pair() -> (SocketController, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        let ctrl = SocketController::connect("127.0.0.1", port, Duration::from_secs(2))
            .expect("connect controller");
        let (server, _) = listener.accept().expect("accept");
        (ctrl, server)
    }

    #[test]
    fn decode_strips_nul_and_whitespace() {
        assert_eq!(decode_keyword(b"alexa\0garbage").expect("decode"), "alexa");
        assert_eq!(decode_keyword(b"  hey computer\n").expect("decode"), "hey computer");
    }

    #[test]
    fn decode_rejects_empty_and_invalid_payloads() {
        assert!(decode_keyword(b"\0\0").expect_err("empty").is_decode());
        assert!(decode_keyword(b"   ").expect_err("blank").is_decode());
        assert!(decode_keyword(&[0xff, 0xfe]).expect_err("not utf8").is_decode());
    }

    #[test]
    fn read_times_out_when_peer_is_silent() {
        let (ctrl, _server) = pair();
        let read = ctrl.read(Duration::from_millis(50)).expect("read");
        assert!(read.is_none());
    }

    #[test]
    fn keyword_message_becomes_unspecified_detection() {
        let (ctrl, mut server) = pair();
        server.write_all(b"alexa").expect("send keyword");

        let detection = ctrl
            .read(Duration::from_secs(2))
            .expect("read")
            .expect("detection");
        assert_eq!(detection, KeywordDetection::unspecified("alexa"));
        assert_eq!(ctrl.peer(), format!("127.0.0.1:{}", server.local_addr().unwrap().port()));
    }

    #[test]
    fn peer_close_is_a_transport_error_that_persists() {
        let (ctrl, server) = pair();
        drop(server);

        let err = ctrl.read(Duration::from_secs(2)).expect_err("closed peer");
        assert!(matches!(err, KwdError::Transport(_)));

        let start = std::time::Instant::now();
        let err = ctrl.read(Duration::from_millis(30)).expect_err("still closed");
        assert!(matches!(err, KwdError::Transport(_)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn refused_connection_fails_initialization() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let err = SocketController::connect("127.0.0.1", port, Duration::from_millis(500))
            .err()
            .expect("nothing listening");
        assert!(matches!(err, KwdError::ControllerInit(_)));
    }
}
