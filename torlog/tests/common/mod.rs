//! Shared helpers for integration tests: a scripted control-port daemon and
//! an in-memory operator stream.

#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Control-port daemon on a background thread
///
/// Accepts a single connection. SETEVENTS succeeds only when every keyword is
/// in the supported set, matching how a real daemon answers 552.
pub struct FakeDaemon {
    port: u16,
    state: Arc<DaemonState>,
}

struct DaemonState {
    supported: Vec<String>,
    password: Option<String>,
    commands: Mutex<Vec<String>>,
    writer: Mutex<Option<TcpStream>>,
}

impl FakeDaemon {
    /// Daemon with NULL auth supporting `supported`
    pub fn start(supported: &[&str]) -> Self {
        Self::spawn(supported, None)
    }

    /// Daemon that demands `password`
    pub fn with_password(supported: &[&str], password: &str) -> Self {
        Self::spawn(supported, Some(password.to_string()))
    }

    fn spawn(supported: &[&str], password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake daemon");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(DaemonState {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            password,
            commands: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
        });

        let serving = state.clone();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let _ = serving.serve(stream);
            }
        });

        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every command line received so far
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Push an asynchronous notification (without line terminator)
    pub fn emit(&self, line: &str) {
        self.emit_bytes(line.as_bytes());
    }

    /// Push a notification whose bytes need not be UTF-8
    pub fn emit_bytes(&self, line: &[u8]) {
        let mut guard = self.state.writer.lock().unwrap();
        let stream = guard.as_mut().expect("no client connected");
        stream.write_all(line).unwrap();
        stream.write_all(b"\r\n").unwrap();
        stream.flush().unwrap();
    }

    /// Drop the client connection from the daemon side
    pub fn hang_up(&self) {
        if let Some(stream) = self.state.writer.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl DaemonState {
    fn serve(&self, stream: TcpStream) -> io::Result<()> {
        *self.writer.lock().unwrap() = Some(stream.try_clone()?);
        let reader = BufReader::new(stream);

        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches('\r').to_string();
            self.commands.lock().unwrap().push(line.clone());

            let reply = self.reply_to(&line);
            let quit = line == "QUIT";
            match self.writer.lock().unwrap().as_mut() {
                Some(w) => {
                    w.write_all(reply.as_bytes())?;
                    w.flush()?;
                }
                None => break,
            }
            if quit {
                if let Some(w) = self.writer.lock().unwrap().take() {
                    let _ = w.shutdown(Shutdown::Both);
                }
                break;
            }
        }
        Ok(())
    }

    fn reply_to(&self, line: &str) -> String {
        if line.starts_with("PROTOCOLINFO") {
            let methods = if self.password.is_some() { "HASHEDPASSWORD" } else { "NULL" };
            format!(
                "250-PROTOCOLINFO 1\r\n250-AUTH METHODS={}\r\n250-VERSION Tor=\"0.4.8.12\"\r\n250 OK\r\n",
                methods
            )
        } else if line.starts_with("AUTHENTICATE") {
            let expected = match &self.password {
                Some(p) => format!("AUTHENTICATE \"{}\"", p.replace('\\', "\\\\").replace('"', "\\\"")),
                None => "AUTHENTICATE".to_string(),
            };
            if line == expected {
                "250 OK\r\n".to_string()
            } else {
                "515 Authentication failed: Password did not match HashedControlPassword\r\n".to_string()
            }
        } else if let Some(events) = line.strip_prefix("SETEVENTS") {
            match events.split_whitespace().find(|e| !self.supported.iter().any(|s| s == e)) {
                Some(bad) => format!("552 Unrecognized event \"{}\"\r\n", bad),
                None => "250 OK\r\n".to_string(),
            }
        } else if line == "QUIT" {
            "250 closing connection\r\n".to_string()
        } else {
            "510 Unrecognized command\r\n".to_string()
        }
    }
}

/// Writer that collects everything written to it
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read a file, treating "not there yet" as empty
pub fn read_log(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Async flavour of [`wait_until`]
pub async fn wait_until_async(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Message part of a log line, after the date, time and epoch fields
pub fn message(line: &str) -> &str {
    line.splitn(4, ' ').nth(3).unwrap_or_default()
}
