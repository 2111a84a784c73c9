//! Display-control service adapter speaking a line protocol over a Unix
//! socket.
//!
//! The display-control daemon (`dispctl`) listens on a socket under the user
//! runtime directory. Every request is a single line; the service answers
//! with a single acknowledgment line (`ok` / `err`, or `id <n>` for idle
//! subscriptions). Idle events are pushed asynchronously over the same
//! connection that issued the subscription and are drained by the event
//! loop via [`DisplayService::poll_events`].

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::constants::{SOCKET_BUFFER_SIZE, SOCKET_TIMEOUT_MS};
use crate::logger::Log;

use super::{DisplayService, IdleClient, ServiceSignal};

pub struct SocketDisplay {
    socket_path: PathBuf,
    /// Connection carrying the idle subscription, kept open so the service
    /// can push events; `None` until a subscription exists.
    event_stream: Option<UnixStream>,
    event_buf: String,
}

impl SocketDisplay {
    /// Create a new client with the conventional socket path:
    /// `{XDG_RUNTIME_DIR or /run/user/{uid}}/dispctl/.dispctl.sock`.
    pub fn new() -> Result<Self> {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .unwrap_or_else(|_| format!("/run/user/{}", nix::unistd::getuid()));
        let socket_path = PathBuf::from(format!("{}/dispctl/.dispctl.sock", runtime_dir));

        if !socket_path.exists() {
            Log::log_warning(&format!("Socket file doesn't exist at {:?}", socket_path));
        }

        Ok(Self {
            socket_path,
            event_stream: None,
            event_buf: String::new(),
        })
    }

    /// One request, one reply line. Connections are per-request; only the
    /// idle subscription keeps a stream open.
    fn request(&mut self, line: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .with_context(|| format!("cannot connect to {:?}", self.socket_path))?;
        stream
            .set_read_timeout(Some(Duration::from_millis(SOCKET_TIMEOUT_MS)))
            .context("cannot set socket read timeout")?;
        stream
            .set_write_timeout(Some(Duration::from_millis(SOCKET_TIMEOUT_MS)))
            .context("cannot set socket write timeout")?;

        stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.write_all(b"\n"))
            .context("write to display service failed")?;

        let mut reader = BufReader::with_capacity(SOCKET_BUFFER_SIZE, &mut stream);
        let mut reply = String::new();
        reader
            .read_line(&mut reply)
            .context("read from display service failed")?;
        Ok(reply.trim().to_string())
    }

    /// A boolean acknowledgment: `ok` maps to true, `err` to false, anything
    /// else is a protocol error.
    fn request_ack(&mut self, line: &str) -> Result<bool> {
        match self.request(line)?.as_str() {
            "ok" => Ok(true),
            "err" => Ok(false),
            other => bail!("unexpected display service reply: {:?}", other),
        }
    }
}

impl DisplayService for SocketDisplay {
    fn set_temperature(
        &mut self,
        display: &str,
        token: &str,
        temp: u32,
        smooth: bool,
        step: u32,
        timeout_ms: u64,
    ) -> Result<bool> {
        self.request_ack(&format!(
            "temperature {} {} {} {} {} {}",
            display, token, temp, smooth as u8, step, timeout_ms
        ))
    }

    fn set_backlight(
        &mut self,
        target_pct: f64,
        smooth: bool,
        step: f64,
        timeout_ms: u64,
    ) -> Result<bool> {
        self.request_ack(&format!(
            "backlight {:.3} {} {:.3} {}",
            target_pct, smooth as u8, step, timeout_ms
        ))
    }

    fn idle_subscribe(&mut self, timeout_secs: u64) -> Result<IdleClient> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .with_context(|| format!("cannot connect to {:?}", self.socket_path))?;
        stream
            .write_all(format!("idle subscribe {}\n", timeout_secs).as_bytes())
            .context("write to display service failed")?;
        stream
            .set_read_timeout(Some(Duration::from_millis(SOCKET_TIMEOUT_MS)))
            .context("cannot set socket read timeout")?;

        let mut reader = BufReader::with_capacity(SOCKET_BUFFER_SIZE, &mut stream);
        let mut reply = String::new();
        reader
            .read_line(&mut reply)
            .context("read from display service failed")?;

        let id = reply
            .trim()
            .strip_prefix("id ")
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| anyhow!("unexpected idle subscription reply: {:?}", reply.trim()))?;

        // Later events arrive on this stream; switch it to non-blocking so
        // poll_events never stalls the loop.
        stream
            .set_nonblocking(true)
            .context("cannot set socket non-blocking")?;
        self.event_stream = Some(stream);
        Ok(IdleClient(id))
    }

    fn idle_set_timeout(&mut self, client: IdleClient, timeout_secs: u64) -> Result<()> {
        self.request_ack(&format!("idle timeout {} {}", client.0, timeout_secs))
            .map(|_| ())
    }

    fn idle_start(&mut self, client: IdleClient) -> Result<()> {
        self.request_ack(&format!("idle start {}", client.0)).map(|_| ())
    }

    fn idle_stop(&mut self, client: IdleClient) -> Result<()> {
        self.request_ack(&format!("idle stop {}", client.0)).map(|_| ())
    }

    fn idle_release(&mut self, client: IdleClient) {
        if self.event_stream.is_some() {
            let _ = self.request(&format!("idle release {}", client.0));
            self.event_stream = None;
            self.event_buf.clear();
        }
    }

    fn poll_events(&mut self) -> Vec<ServiceSignal> {
        let Some(stream) = self.event_stream.as_mut() else {
            return Vec::new();
        };

        let mut chunk = [0u8; SOCKET_BUFFER_SIZE];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    // Service closed the event stream; the subscription is
                    // gone until someone re-subscribes.
                    Log::log_warning("Display service closed the idle event stream.");
                    self.event_stream = None;
                    break;
                }
                Ok(n) => self
                    .event_buf
                    .push_str(&String::from_utf8_lossy(&chunk[..n])),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    Log::log_warning(&format!("Idle event stream error: {}", e));
                    self.event_stream = None;
                    break;
                }
            }
        }

        let mut events = Vec::new();
        while let Some(pos) = self.event_buf.find('\n') {
            let line: String = self.event_buf.drain(..=pos).collect();
            match line.trim() {
                "idle 1" => events.push(ServiceSignal::Idle(true)),
                "idle 0" => events.push(ServiceSignal::Idle(false)),
                "" => {}
                other => Log::log_debug(&format!("Ignoring display service event: {:?}", other)),
            }
        }
        events
    }
}
