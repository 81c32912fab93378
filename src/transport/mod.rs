//! Transport socket: one TCP (optionally TLS) connection to a chat server.
//!
//! [`Transport::connect`] opens the stream and spawns two tasks tied to the
//! socket's lifetime:
//!
//! - **read loop**: reads raw bytes, splits them into frames with
//!   [`FrameDecoder`] and forwards each frame, in order, on an unbounded
//!   channel. EOF or a read error closes the transport and drops the channel
//!   sender, so the consumer sees the end of the stream.
//! - **keepalive loop**: sends the bare terminator every
//!   [`KEEPALIVE_INTERVAL`] while connected.
//!
//! [`Transport`] is a cheap handle; clones share the same socket.

pub mod framing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::constants::{KEEPALIVE_INTERVAL, READ_BUFFER_SIZE, RECV_IDLE_YIELD};
use crate::error::SessionError;

pub use framing::{encode_command, keepalive_frame, FrameDecoder};

/// Byte stream the transport can run over (plain TCP or TLS).
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// Handle to a live connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    peer: String,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    first_sent: AtomicBool,
    connected: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.inner.peer)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Open a connection to `host:port` and start the read and keepalive
    /// loops.
    ///
    /// Returns the handle and the receiver of inbound frames (terminators
    /// stripped, keepalive echoes dropped).
    pub async fn connect(
        host: &str,
        port: u16,
        tls: bool,
    ) -> Result<(Self, UnboundedReceiver<Vec<u8>>), SessionError> {
        let peer = format!("{host}:{port}");
        log::info!("[Transport] Connecting to {peer} (tls={tls})");

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| SessionError::Connection(format!("{peer}: {e}")))?;
        // Frames are small and latency matters more than batching
        if let Err(e) = tcp.set_nodelay(true) {
            log::debug!("[Transport] Could not set TCP_NODELAY on {peer}: {e}");
        }

        let stream: BoxedStream = if tls {
            let connector = TlsConnector::from(Arc::new(tls_config()?));
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| SessionError::Connection(format!("{host}: {e}")))?;
            let tls_stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| SessionError::Connection(format!("{peer}: TLS handshake failed: {e}")))?;
            Box::new(tls_stream)
        } else {
            Box::new(tcp)
        };

        Ok(Self::from_stream(peer, stream))
    }

    fn from_stream(peer: String, stream: BoxedStream) -> (Self, UnboundedReceiver<Vec<u8>>) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            peer,
            writer: tokio::sync::Mutex::new(Some(write_half)),
            first_sent: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            reader: Mutex::new(None),
            keepalive: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&inner), read_half, frame_tx));
        let keepalive = tokio::spawn(keepalive_loop(Arc::clone(&inner)));
        *lock(&inner.reader) = Some(reader);
        *lock(&inner.keepalive) = Some(keepalive);

        log::info!("[Transport] Connected to {}", inner.peer);
        (Self { inner }, frame_rx)
    }

    /// Send one command. The first command on a connection is terminated
    /// with a bare null byte, every later one with `\r\n\0`.
    pub async fn send<S: AsRef<str>>(&self, fields: &[S]) -> Result<(), SessionError> {
        let mut guard = self.inner.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(SessionError::Connection(format!(
                "{}: transport is closed",
                self.inner.peer
            )));
        };

        let first = !self.inner.first_sent.swap(true, Ordering::SeqCst);
        let bytes = encode_command(fields, first);
        log::debug!("[Transport] {} OUT {}", self.inner.peer, describe(fields));

        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the connection: stop both loops and shut the stream down.
    /// Safe to call more than once.
    pub async fn disconnect(&self) {
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }
        self.inner.close().await;
    }

    /// True until the connection is closed by either side.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// True if both handles refer to the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// `host:port` of the remote end.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }
}

impl Inner {
    async fn close(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Some(keepalive) = lock(&self.keepalive).take() {
            keepalive.abort();
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                log::debug!("[Transport] Shutdown of {} failed: {e}", self.peer);
            }
        }
        self.first_sent.store(false, Ordering::SeqCst);

        if was_connected {
            log::info!("[Transport] Disconnected from {}", self.peer);
        }
    }

    async fn write_keepalive(&self) -> std::io::Result<bool> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(false);
        };
        writer.write_all(keepalive_frame()).await?;
        writer.flush().await?;
        Ok(true)
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: ReadHalf<BoxedStream>, frame_tx: UnboundedSender<Vec<u8>>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    'read: loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                log::info!("[Transport] {} closed the connection", inner.peer);
                break;
            }
            Ok(n) => {
                let frames = match decoder.feed(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        log::warn!("[Transport] Closing {}: {e}", inner.peer);
                        break;
                    }
                };
                for frame in frames {
                    if frame_tx.send(frame).is_err() {
                        // Consumer is gone, nobody to deliver to
                        break 'read;
                    }
                }
            }
            Err(e) => {
                log::warn!("[Transport] Read error from {}: {}", inner.peer, e);
                break;
            }
        }
        tokio::time::sleep(RECV_IDLE_YIELD).await;
    }

    if decoder.has_partial() {
        log::debug!("[Transport] {} dropped a partial frame at close", inner.peer);
    }
    inner.close().await;
}

async fn keepalive_loop(inner: Arc<Inner>) {
    let start = tokio::time::Instant::now() + KEEPALIVE_INTERVAL;
    let mut ticker = tokio::time::interval_at(start, KEEPALIVE_INTERVAL);

    loop {
        ticker.tick().await;
        match inner.write_keepalive().await {
            Ok(true) => log::trace!("[Transport] {} keepalive", inner.peer),
            Ok(false) => break,
            Err(e) => {
                log::warn!("[Transport] Keepalive to {} failed: {}", inner.peer, e);
                break;
            }
        }
    }
}

fn tls_config() -> Result<rustls::ClientConfig, SessionError> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| SessionError::Connection(format!("TLS setup failed: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(config)
}

/// Loggable form of an outbound command. Login credentials are masked.
fn describe<S: AsRef<str>>(fields: &[S]) -> String {
    match fields.first().map(AsRef::as_ref) {
        Some("tlogin") => "tlogin:<redacted>".to_string(),
        _ => fields
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(":"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
