//! Blocking line server: accept loops, worker threads, timeouts.
//!
//! The transport knows nothing about the protocol; it drives a
//! [`SessionHandler`] with one decoded line at a time and writes back
//! whatever the handler returns. An IPv6 listener is opened first; when
//! the host lacks a dual stack, a second accept loop serves IPv4 from
//! its own thread.

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Result;

/// Per-session protocol state.
#[derive(Debug, Default)]
pub struct Session {
    pub handshake: bool,
    pub is_http: bool,
    pub terminate: bool,
}

/// The per-session handler contract: an optional greeting on connect
/// and one reply per request line.
pub trait SessionHandler: Send + Sync + 'static {
    fn on_connect(&self, session: &mut Session) -> Option<String>;
    fn on_line(&self, line: &str, session: &mut Session) -> Result<String>;
}

/// Accepts connections and hands each to a detached worker thread that
/// owns the socket for the session.
#[derive(Debug)]
pub struct LineServer<H> {
    handler: Arc<H>,
    port: u16,
    timeout: Duration,
    quit: Arc<AtomicBool>,
}

impl<H: SessionHandler> LineServer<H> {
    pub fn new(handler: H, port: u16, timeout: Duration) -> Self {
        Self {
            handler: Arc::new(handler),
            port,
            timeout,
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between accepts; in-flight sessions drain on their
    /// next timeout.
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    /// Bind and serve until the quit flag is set. Listener construction
    /// failure on both stacks is fatal; a missing dual stack degrades to
    /// a second IPv4 accept thread.
    pub fn run(&self) -> Result<()> {
        match bind_v6(self.port) {
            Ok((listener, dual_stack)) => {
                let v4_thread = if dual_stack {
                    None
                } else {
                    match bind_v4(self.port) {
                        Ok(v4) => {
                            let handler = Arc::clone(&self.handler);
                            let quit = Arc::clone(&self.quit);
                            let timeout = self.timeout;
                            Some(thread::spawn(move || {
                                accept_loop(&handler, &v4, timeout, &quit);
                            }))
                        }
                        Err(e) => {
                            log::warn!("IPv4 listener unavailable: {e}");
                            None
                        }
                    }
                };
                log::info!("listening on port {}", self.port);
                self.serve(listener);
                if let Some(v4_thread) = v4_thread {
                    let _ = v4_thread.join();
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("IPv6 listener unavailable ({e}); trying IPv4");
                let listener = bind_v4(self.port)?;
                log::info!("listening on port {} (IPv4 only)", self.port);
                self.serve(listener);
                Ok(())
            }
        }
    }

    /// Serve connections from an already-bound listener. Exposed so
    /// tests can bind an ephemeral port themselves.
    pub fn serve(&self, listener: TcpListener) {
        accept_loop(&self.handler, &listener, self.timeout, &self.quit);
    }
}

fn bind_v6(port: u16) -> std::io::Result<(TcpListener, bool)> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    // ask for a dual-stack socket; not every host grants it
    let _ = socket.set_only_v6(false);
    let dual_stack = !socket.only_v6().unwrap_or(true);
    let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok((socket.into(), dual_stack))
}

fn bind_v4(port: u16) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

fn accept_loop<H: SessionHandler>(
    handler: &Arc<H>,
    listener: &TcpListener,
    timeout: Duration,
    quit: &Arc<AtomicBool>,
) {
    for stream in listener.incoming() {
        if quit.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let handler = Arc::clone(handler);
                thread::spawn(move || {
                    if let Err(e) = run_session(&*handler, stream, timeout) {
                        // unexpected failures only; timeouts and peer
                        // resets close silently
                        eprintln!("exception: {e}");
                    }
                });
            }
            Err(e) => log::warn!("accept failed: {e}"),
        }
    }
}

fn run_session<H: SessionHandler>(
    handler: &H,
    stream: TcpStream,
    timeout: Duration,
) -> Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut session = Session::default();
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    if let Some(greeting) = handler.on_connect(&mut session) {
        if writer.write_all(greeting.as_bytes()).is_err() {
            return Ok(());
        }
    }

    let mut line = String::new();
    while !session.terminate {
        line.clear();
        // the timeout slides: it applies anew to every read
        let n = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(_) => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        while line.ends_with('\n') {
            line.pop();
        }
        if line == "\r" {
            continue;
        }
        let reply = handler.on_line(&line, &mut session)?;
        if !reply.is_empty() && writer.write_all(reply.as_bytes()).is_err() {
            return Ok(());
        }
    }
    Ok(())
}
