//! Local port forwarding through a gateway host.
//!
//! [`Tunnel::open`] authenticates against the gateway, binds an ephemeral port
//! on `127.0.0.1` and spawns a pump thread. The first connection accepted on
//! that port is relayed to the remote host through a `direct-tcpip` channel.
//! Every tunnel gets its own port. Dropping the guard stops and joins the
//! pump, so the tunnel is released on every exit path.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ssh2::{Channel, Session};

use super::resolve::{ConnectionPlan, GatewayPlan};
use super::ssh::{self, Endpoint};
use super::transport::TransportError;

const POLL_INTERVAL: Duration = Duration::from_millis(2);
const PUMP_BUFFER_SIZE: usize = 16 * 1024;

/// A running port forward. Closed on drop.
pub struct Tunnel {
    gateway: String,
    local_port: u16,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), TransportError>>>,
}

impl Tunnel {
    /// Connect to the gateway and start forwarding to `plan`'s host.
    pub fn open(
        gateway: &GatewayPlan,
        plan: &ConnectionPlan,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let session = ssh::connect(&Endpoint::gateway(gateway), timeout)?;
        let listener = TcpListener::bind(("127.0.0.1", 0))?;

        let target_host = plan.location.clone();
        let target_port = plan.port;
        let gateway_location = gateway.location.clone();
        let tunnel = Self::spawn(&gateway.host_name, listener, move |listener, stop| {
            Forward {
                session,
                listener,
                target_host,
                target_port,
                gateway: gateway_location,
                accept_timeout: timeout,
                stop,
            }
            .run()
        })?;

        tracing::debug!(
            gateway = %gateway.host_name,
            target = %plan.location,
            local_port = tunnel.local_port,
            "tunnel open"
        );
        Ok(tunnel)
    }

    /// Run `forward` on its own thread, serving connections on `listener`.
    ///
    /// The listener is switched to non-blocking mode. `forward` owns it and
    /// must return once the stop flag is set.
    pub fn spawn<F>(gateway: &str, listener: TcpListener, forward: F) -> Result<Self, TransportError>
    where
        F: FnOnce(TcpListener, Arc<AtomicBool>) -> Result<(), TransportError> + Send + 'static,
    {
        listener.set_nonblocking(true)?;
        let local_port = listener.local_addr()?.port();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("tunnel-{gateway}"))
            .spawn(move || forward(listener, thread_stop))?;

        Ok(Self {
            gateway: gateway.to_string(),
            local_port,
            stop,
            handle: Some(handle),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop forwarding and report any error from the pump thread.
    pub fn close(mut self) -> Result<(), TransportError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let result = handle.join().unwrap_or_else(|_| {
            Err(TransportError::ConnectionFailed {
                host: self.gateway.clone(),
                reason: "tunnel thread panicked".into(),
            })
        });
        tracing::debug!(gateway = %self.gateway, local_port = self.local_port, "tunnel closed");
        result
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::debug!(gateway = %self.gateway, error = %e, "tunnel closed with error");
        }
    }
}

/// Wait for one connection on a non-blocking listener.
///
/// `None` when `stop` is set first; `TimedOut` when nothing arrives in time.
pub fn accept_one(
    listener: &TcpListener,
    stop: &AtomicBool,
    timeout: Duration,
) -> io::Result<Option<TcpStream>> {
    let started = Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match listener.accept() {
            Ok((stream, _)) => return Ok(Some(stream)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if started.elapsed() > timeout {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no connection arrived on the tunnel",
                    ));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
}

/// State moved into the pump thread.
struct Forward {
    session: Session,
    listener: TcpListener,
    target_host: String,
    target_port: u16,
    gateway: String,
    accept_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl Forward {
    fn failed(&self, reason: impl ToString) -> TransportError {
        TransportError::ConnectionFailed {
            host: self.gateway.clone(),
            reason: reason.to_string(),
        }
    }

    fn run(self) -> Result<(), TransportError> {
        let accepted = accept_one(&self.listener, &self.stop, self.accept_timeout)
            .map_err(|e| self.failed(e))?;
        let Some(mut client) = accepted else {
            return Ok(());
        };

        let mut channel = self
            .session
            .channel_direct_tcpip(&self.target_host, self.target_port, None)
            .map_err(|e| {
                self.failed(format!(
                    "cannot forward to {}:{}: {e}",
                    self.target_host, self.target_port
                ))
            })?;

        self.session.set_blocking(false);
        client.set_nonblocking(true)?;
        let pumped = pump(&mut client, &mut channel, &self.stop);

        self.session.set_blocking(true);
        let _ = channel.send_eof();
        let _ = channel.close();
        pumped.map_err(|e| self.failed(e))
    }
}

/// Relay bytes both ways until either side closes or `stop` is set.
fn pump(client: &mut TcpStream, channel: &mut Channel, stop: &AtomicBool) -> io::Result<()> {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut idle = true;

        match client.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                write_fully(channel, &buf[..n], stop)?;
                idle = false;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        match channel.read(&mut buf) {
            Ok(0) => {
                if channel.eof() {
                    return Ok(());
                }
            }
            Ok(n) => {
                write_fully(client, &buf[..n], stop)?;
                idle = false;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        if idle {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// `write_all` for non-blocking writers. Gives up quietly once `stop` is set.
fn write_fully<W: Write>(writer: &mut W, mut data: &[u8], stop: &AtomicBool) -> io::Result<()> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if stop.load(Ordering::SeqCst) {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per call and blocks every other call.
    struct Choppy {
        chunk: usize,
        calls: usize,
        written: Vec<u8>,
    }

    impl Write for Choppy {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = data.len().min(self.chunk);
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_fully_retries_would_block() {
        let stop = AtomicBool::new(false);
        let mut writer = Choppy {
            chunk: 3,
            calls: 0,
            written: Vec::new(),
        };
        write_fully(&mut writer, b"forwarded bytes", &stop).unwrap();
        assert_eq!(writer.written, b"forwarded bytes");
    }

    #[test]
    fn test_write_fully_stops_when_asked() {
        let stop = AtomicBool::new(true);
        let mut writer = Choppy {
            chunk: 3,
            calls: 0,
            written: Vec::new(),
        };
        write_fully(&mut writer, b"dropped", &stop).unwrap();
        assert!(writer.written.is_empty());
    }

    #[test]
    fn test_open_fails_when_gateway_unreachable() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let gateway = GatewayPlan {
            host_name: "gw".into(),
            location: "127.0.0.1".into(),
            port,
            username: "u".into(),
            password: "p".into(),
        };
        let plan = ConnectionPlan {
            host_name: "hostA".into(),
            location: "a.internal".into(),
            port: 22,
            username: "u".into(),
            password: "p".into(),
            gateway: Some(gateway.clone()),
        };

        let err = Tunnel::open(&gateway, &plan, Duration::from_secs(2)).err().unwrap();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }));
    }

    fn loopback() -> TcpListener {
        TcpListener::bind(("127.0.0.1", 0)).unwrap()
    }

    /// Serves nothing; flags `finished` after releasing the listener.
    fn idle_forward(
        finished: Arc<AtomicBool>,
    ) -> impl FnOnce(TcpListener, Arc<AtomicBool>) -> Result<(), TransportError> + Send + 'static
    {
        move |listener, stop| {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(POLL_INTERVAL);
            }
            drop(listener);
            finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_each_tunnel_gets_its_own_port() {
        let first_done = Arc::new(AtomicBool::new(false));
        let second_done = Arc::new(AtomicBool::new(false));
        let first = Tunnel::spawn("gw", loopback(), idle_forward(Arc::clone(&first_done))).unwrap();
        let second =
            Tunnel::spawn("gw", loopback(), idle_forward(Arc::clone(&second_done))).unwrap();

        assert_ne!(first.local_port(), second.local_port());
        assert!(TcpListener::bind(("127.0.0.1", first.local_port())).is_err());

        first.close().unwrap();
        second.close().unwrap();
        assert!(first_done.load(Ordering::SeqCst));
        assert!(second_done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_releases_port_and_joins_thread() {
        let finished = Arc::new(AtomicBool::new(false));
        let tunnel = Tunnel::spawn("gw", loopback(), idle_forward(Arc::clone(&finished))).unwrap();
        let port = tunnel.local_port();

        tunnel.close().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    fn fetch_then_fail(finished: Arc<AtomicBool>, port: &mut u16) -> Result<(), TransportError> {
        let tunnel = Tunnel::spawn("gw", loopback(), idle_forward(finished))?;
        *port = tunnel.local_port();
        Err(TransportError::SourceNotFound("/missing".into()))
    }

    #[test]
    fn test_drop_on_error_path_releases_tunnel() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut port = 0;

        let err = fetch_then_fail(Arc::clone(&finished), &mut port).unwrap_err();
        assert!(matches!(err, TransportError::SourceNotFound(_)));
        assert!(finished.load(Ordering::SeqCst));
        assert_ne!(port, 0);
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn test_forward_error_reported_on_close() {
        let tunnel = Tunnel::spawn("gw", loopback(), |_listener, _stop| {
            Err(TransportError::ConnectionFailed {
                host: "gw".into(),
                reason: "forwarding refused".into(),
            })
        })
        .unwrap();

        let err = tunnel.close().unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed { ref reason, .. } if reason == "forwarding refused"));
    }

    #[test]
    fn test_accepted_connection_is_served() {
        let tunnel = Tunnel::spawn("gw", loopback(), |listener, stop| {
            let Some(mut client) = accept_one(&listener, &stop, Duration::from_secs(5))? else {
                return Ok(());
            };
            client.set_nonblocking(false)?;
            let mut buf = [0u8; 5];
            client.read_exact(&mut buf)?;
            client.write_all(&buf)?;
            Ok(())
        })
        .unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", tunnel.local_port())).unwrap();
        conn.write_all(b"hello").unwrap();
        let mut echoed = [0u8; 5];
        conn.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"hello");

        tunnel.close().unwrap();
    }

    #[test]
    fn test_accept_one_times_out_or_stops() {
        let listener = loopback();
        listener.set_nonblocking(true).unwrap();

        let running = AtomicBool::new(false);
        let err = accept_one(&listener, &running, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let stopped = AtomicBool::new(true);
        assert!(accept_one(&listener, &stopped, Duration::from_secs(5)).unwrap().is_none());
    }
}
