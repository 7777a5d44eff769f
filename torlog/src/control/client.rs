//! TCP control-port connection
//!
//! Commands are serialized behind an async mutex: write one line, wait for
//! the next non-async reply. A reader task owns the read half and hands
//! `650` replies to the installed [`EventHandler`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reply::{Reply, read_reply};
use super::{ControlChannel, ControlError, ControlEvent, Credentials, EventHandler, ProtocolInfo};

/// Default timeout for connecting and for each command round trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Replies buffered between the reader task and the waiting command
const REPLY_CHANNEL_CAPACITY: usize = 16;

type SharedHandler = Arc<RwLock<Option<EventHandler>>>;

struct CommandPipe {
    writer: OwnedWriteHalf,
    replies: mpsc::Receiver<Reply>,
}

/// Control-port connection over TCP
pub struct TcpControlChannel {
    addr: String,
    pipe: tokio::sync::Mutex<CommandPipe>,
    handler: SharedHandler,
    registered: Mutex<Vec<String>>,
    closed: CancellationToken,
    released: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl TcpControlChannel {
    /// Connect to `host:port` with the default timeout
    pub async fn connect(host: &str, port: u16) -> Result<Self, ControlError> {
        Self::connect_with_timeout(host, port, DEFAULT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, ControlError> {
        let addr = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        debug!(%addr, ?timeout, "TcpControlChannel::connect: connecting");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ControlError::Timeout(format!("connection to {}", addr)))?
            .map_err(|source| ControlError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let handler: SharedHandler = Arc::new(RwLock::new(None));
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            reply_tx,
            handler.clone(),
            closed.clone(),
        ));

        info!(%addr, "Connected to control port");
        Ok(Self {
            addr,
            pipe: tokio::sync::Mutex::new(CommandPipe {
                writer: write_half,
                replies: reply_rx,
            }),
            handler,
            registered: Mutex::new(Vec::new()),
            closed,
            released: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
            timeout,
        })
    }

    /// Send one command line and wait for its reply
    async fn command(&self, line: &str) -> Result<Reply, ControlError> {
        // Only the verb is logged; AUTHENTICATE carries secrets.
        let verb = line.split(' ').next().unwrap_or_default().to_string();
        debug!(%verb, "TcpControlChannel::command: sending");

        let mut guard = self.pipe.lock().await;
        let pipe = &mut *guard;
        if self.closed.is_cancelled() {
            return Err(ControlError::Closed);
        }

        let round_trip = async {
            pipe.writer.write_all(line.as_bytes()).await?;
            pipe.writer.write_all(b"\r\n").await?;
            pipe.writer.flush().await?;
            pipe.replies.recv().await.ok_or(ControlError::Closed)
        };
        let reply = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| ControlError::Timeout(format!("reply to {}", verb)))??;

        debug!(%verb, code = reply.code(), "TcpControlChannel::command: reply");
        Ok(reply)
    }
}

async fn read_loop<R>(mut reader: R, replies: mpsc::Sender<Reply>, handler: SharedHandler, closed: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    debug!("read_loop: started");
    loop {
        match read_reply(&mut reader).await {
            Ok(Some(reply)) if reply.is_async() => {
                let current = handler.read().unwrap_or_else(|e| e.into_inner()).clone();
                match current {
                    Some(h) => h(ControlEvent::from(&reply)),
                    None => debug!("read_loop: no handler installed, dropping event"),
                }
            }
            Ok(Some(reply)) => {
                if replies.send(reply).await.is_err() {
                    debug!("read_loop: command side gone");
                    break;
                }
            }
            Ok(None) => {
                info!("Control port closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read_loop: failed to read reply");
                break;
            }
        }
    }
    closed.cancel();
    debug!("read_loop: finished");
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    async fn authenticate(&self, credentials: &Credentials) -> Result<ProtocolInfo, ControlError> {
        debug!(?credentials, "TcpControlChannel::authenticate: called");
        let reply = self.command("PROTOCOLINFO 1").await?;
        let info = ProtocolInfo::from_reply(&reply)?;

        let auth = info.authenticate_command(credentials, |path| std::fs::read(path))?;
        let reply = self.command(&auth).await?;
        if !reply.is_ok() {
            return Err(ControlError::Authentication(format!(
                "{} {}",
                reply.code(),
                reply.message()
            )));
        }

        info!(version = ?info.tor_version, "Authenticated to control port");
        Ok(info)
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    async fn add_event_listener(&self, event: &str) -> Result<(), ControlError> {
        let mut wanted = self.registered_events();
        if !wanted.iter().any(|e| e == event) {
            wanted.push(event.to_string());
        }

        let reply = self.command(&format!("SETEVENTS {}", wanted.join(" "))).await?;
        if !reply.is_ok() {
            debug!(%event, code = reply.code(), "add_event_listener: rejected");
            return Err(ControlError::Rejected {
                code: reply.code(),
                message: reply.message().to_string(),
            });
        }

        *self.registered.lock().unwrap_or_else(|e| e.into_inner()) = wanted;
        Ok(())
    }

    fn registered_events(&self) -> Vec<String> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) -> Result<(), ControlError> {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!("TcpControlChannel::close: already released");
            return Ok(());
        }
        debug!(addr = %self.addr, "TcpControlChannel::close: releasing");

        if !self.closed.is_cancelled() {
            match self.command("QUIT").await {
                Ok(reply) => debug!(code = reply.code(), "TcpControlChannel::close: QUIT acknowledged"),
                Err(e) => debug!(error = %e, "TcpControlChannel::close: QUIT failed"),
            }
        }

        {
            let mut pipe = self.pipe.lock().await;
            if let Err(e) = pipe.writer.shutdown().await {
                debug!(error = %e, "TcpControlChannel::close: shutdown failed");
            }
        }

        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        self.closed.cancel();
        info!(addr = %self.addr, "Control connection released");
        Ok(())
    }
}

impl Drop for TcpControlChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        self.closed.cancel();
    }
}
