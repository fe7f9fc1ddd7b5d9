//! Relay connection lifecycle
//!
//! A [`Connection`] binds one inbound transport, one outbound transport and
//! one dialled remote TCP socket, then runs two independent half-duplex
//! pumps between them until either side goes silent or fails:
//!
//! ```text
//! inbound  --read_frame-->  pump A  --write-------->  remote
//! remote   --read------->   pump B  --write_frame-->  outbound
//! ```
//!
//! With keep-alive enabled, a timer cycle writes random printable noise on
//! the inbound transport at randomized intervals while a drain cycle
//! discards whatever the outbound transport delivers.
//!
//! There is no recovery at this layer: every I/O failure disposes the
//! connection. Disposal is a one-way latch; cycles and pumps observe it (and
//! the paired cancellation token) and become no-ops, so completions that
//! race with disposal fall through harmlessly.

use rand::{thread_rng, Rng};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::socket::{new_remote_socket, resolve_endpoint};
use super::{
    TunnelError, KEEPALIVE_BLOCK, KEEPALIVE_DELAY_MAX_MS, KEEPALIVE_DELAY_MIN_MS,
    KEEPALIVE_PAYLOAD_MIN,
};
use crate::config::Config;
use crate::handshake::fill_random_ascii;
use crate::transport::Transport;

/// Hook invoked once when a connection is disposed, with the connection id
pub type DisposedHook = Box<dyn FnOnce(u64) + Send + 'static>;

/// Lifecycle states of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed, not yet listening
    New = 0,
    /// Adopted a pre-accepted remote socket
    Listening = 1,
    /// Resolving and/or dialling the remote endpoint
    Connecting = 2,
    /// Both pumps armed
    Established = 3,
    /// Terminal
    Disposed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Listening,
            2 => Self::Connecting,
            3 => Self::Established,
            _ => Self::Disposed,
        }
    }
}

/// A relay bound to one `{inbound, outbound, remote}` triplet
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    id: u64,
    config: Arc<Config>,
    mss: usize,
    state: AtomicU8,
    disposed: AtomicBool,
    available: AtomicBool,
    has_remote: AtomicBool,
    has_buffers: AtomicBool,
    shutdown: CancellationToken,
    inbound: Mutex<Option<Arc<dyn Transport>>>,
    outbound: Mutex<Option<Arc<dyn Transport>>>,
    buffers: Mutex<Option<Vec<u8>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    on_disposed: Mutex<Option<DisposedHook>>,
}

impl Connection {
    /// Bind a new relay to its transports. `id` is opaque and preserved
    /// verbatim for the disposal hook.
    pub fn new(
        config: Arc<Config>,
        id: u64,
        inbound: Arc<dyn Transport>,
        outbound: Arc<dyn Transport>,
    ) -> Self {
        let mss = config.mss();
        Self {
            shared: Arc::new(Shared {
                id,
                config,
                mss,
                state: AtomicU8::new(ConnectionState::New as u8),
                disposed: AtomicBool::new(false),
                available: AtomicBool::new(false),
                has_remote: AtomicBool::new(false),
                has_buffers: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                inbound: Mutex::new(Some(inbound)),
                outbound: Mutex::new(Some(outbound)),
                buffers: Mutex::new(None),
                keepalive: Mutex::new(None),
                on_disposed: Mutex::new(None),
            }),
        }
    }

    /// Caller-assigned identifier
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Disposed, or missing either transport
    pub fn is_none(&self) -> bool {
        self.shared.is_none()
    }

    /// [`is_none`](Self::is_none), or remote/buffers not yet in place
    pub fn is_disposed(&self) -> bool {
        self.shared.is_none()
            || !self.shared.has_remote.load(Ordering::Acquire)
            || !self.shared.has_buffers.load(Ordering::Acquire)
    }

    /// True once every pump (and keep-alive cycle, when enabled) is armed
    pub fn available(&self) -> bool {
        self.shared.available.load(Ordering::Acquire) && !self.is_disposed()
    }

    /// Install the single-shot disposal hook. A hook installed after
    /// disposal never fires.
    pub fn set_on_disposed<F>(&self, hook: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        *self.shared.on_disposed.lock().unwrap() = Some(Box::new(hook));
    }

    /// Start relaying.
    ///
    /// With `network` the pre-accepted socket is adopted as the remote and
    /// the pumps are armed synchronously. Without it the remote endpoint is
    /// taken from the configuration - resolved first when `domain` is set -
    /// and dialled in the background; failures along that path dispose the
    /// connection.
    pub fn listen(&self, network: Option<TcpStream>) -> Result<(), TunnelError> {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Err(TunnelError::Disposed);
        }
        if shared.has_buffers.swap(true, Ordering::AcqRel) {
            return Err(TunnelError::AlreadyListening);
        }
        *shared.buffers.lock().unwrap() = Some(vec![0u8; shared.mss]);

        let handle = Handle::try_current().map_err(|_| TunnelError::NoRuntime)?;

        match network {
            Some(stream) => {
                shared.set_state(ConnectionState::Listening);
                shared.has_remote.store(true, Ordering::Release);
                shared.clone().establish(stream)
            }
            None => {
                if shared.is_none() {
                    return Err(TunnelError::Disposed);
                }
                if shared.has_remote.load(Ordering::Acquire) {
                    return Err(TunnelError::RemoteAlreadySet);
                }

                shared.set_state(ConnectionState::Connecting);
                let shared = Arc::clone(shared);
                handle.spawn(shared.dial());
                Ok(())
            }
        }
    }

    /// Dispose the connection. Idempotent; only the first call releases the
    /// sub-resources and fires the disposal hook.
    pub fn close(&self) {
        self.shared.dispose();
    }
}

impl Shared {
    fn is_none(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
            || self.inbound.lock().unwrap().is_none()
            || self.outbound.lock().unwrap().is_none()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Background dial: resolve when configured as a domain, then connect.
    async fn dial(self: Arc<Self>) {
        let addr = if self.config.domain {
            let resolved = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                r = resolve_endpoint(&self.config.ip, self.config.port) => r,
            };
            match resolved {
                Some(addr) => addr,
                None => {
                    warn!(id = self.id, host = %self.config.ip, "hostname resolution failed");
                    self.dispose();
                    return;
                }
            }
        } else {
            match self.config.ip.parse::<IpAddr>() {
                Ok(ip) => SocketAddr::new(ip, self.config.port),
                Err(_) => {
                    warn!(id = self.id, ip = %self.config.ip, "invalid remote address literal");
                    self.dispose();
                    return;
                }
            }
        };
        self.connect_remote(addr).await;
    }

    async fn connect_remote(self: Arc<Self>, addr: SocketAddr) {
        let socket = match new_remote_socket(&self.config, addr) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(id = self.id, %addr, error = %e, "remote endpoint rejected");
                self.dispose();
                return;
            }
        };
        self.has_remote.store(true, Ordering::Release);

        trace!(id = self.id, %addr, "dialling remote");
        let stream = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            r = socket.connect(addr) => match r {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(id = self.id, %addr, error = %e, "remote connect failed");
                    self.dispose();
                    return;
                }
            },
        };

        if self.clone().establish(stream).is_err() {
            self.dispose();
        }
    }

    /// Arm both pumps and, when configured, the keep-alive cycles.
    fn establish(self: Arc<Self>, stream: TcpStream) -> Result<(), TunnelError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TunnelError::Disposed);
        }
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .clone()
            .ok_or(TunnelError::Disposed)?;
        let outbound = self
            .outbound
            .lock()
            .unwrap()
            .clone()
            .ok_or(TunnelError::Disposed)?;
        let buffers = self
            .buffers
            .lock()
            .unwrap()
            .take()
            .ok_or(TunnelError::Disposed)?;

        let (remote_rx, remote_tx) = stream.into_split();

        tokio::spawn(pump_inbound_to_remote(
            self.clone(),
            inbound.clone(),
            remote_tx,
        ));
        tokio::spawn(pump_remote_to_outbound(
            self.clone(),
            remote_rx,
            outbound.clone(),
            buffers,
        ));

        if self.config.keep_alived {
            tokio::spawn(keepalive_drain_cycle(self.clone(), outbound));
            let timer = tokio::spawn(keepalive_send_cycle(self.clone(), inbound));
            *self.keepalive.lock().unwrap() = Some(timer);
        }

        self.available.store(true, Ordering::Release);
        self.set_state(ConnectionState::Established);
        debug!(id = self.id, "connection established");
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.available.store(false, Ordering::Release);

        if let Some(inbound) = self.inbound.lock().unwrap().take() {
            inbound.close();
        }
        if let Some(outbound) = self.outbound.lock().unwrap().take() {
            outbound.close();
        }
        // unwinds the remote halves, an in-flight dial and the cycles
        self.shutdown.cancel();

        *self.buffers.lock().unwrap() = None;
        self.has_remote.store(false, Ordering::Release);
        self.has_buffers.store(false, Ordering::Release);

        if let Some(timer) = self.keepalive.lock().unwrap().take() {
            timer.abort();
        }
        self.set_state(ConnectionState::Disposed);

        let hook = self.on_disposed.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(self.id);
        }
        debug!(id = self.id, "connection disposed");
    }
}

/// Pump A: one transport frame in, one remote write out, re-arm.
async fn pump_inbound_to_remote(
    shared: Arc<Shared>,
    inbound: Arc<dyn Transport>,
    mut remote: OwnedWriteHalf,
) {
    loop {
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let frame = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            r = inbound.read_frame() => match r {
                Ok(frame) if !frame.is_empty() => frame,
                _ => break,
            },
        };
        let written = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            r = remote.write_all(&frame) => r,
        };
        if written.is_err() {
            break;
        }
    }
    shared.dispose();
}

/// Pump B: one remote read into the reused buffer, one transport write out,
/// re-arm. The buffer never leaves this task; the transport only borrows it
/// for the duration of the write.
async fn pump_remote_to_outbound(
    shared: Arc<Shared>,
    mut remote: OwnedReadHalf,
    outbound: Arc<dyn Transport>,
    mut buffers: Vec<u8>,
) {
    loop {
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let n = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            r = remote.read(&mut buffers) => match r {
                Ok(n) if n > 0 => n,
                _ => break,
            },
        };
        let written = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            r = outbound.write_frame(&buffers[..n]) => r,
        };
        if written.is_err() {
            break;
        }
    }
    shared.dispose();
}

/// Keep-alive drain: discard whatever the outbound transport delivers so
/// unacknowledged keep-alives cannot buffer up on the peer side.
async fn keepalive_drain_cycle(shared: Arc<Shared>, outbound: Arc<dyn Transport>) {
    loop {
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let delivered = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            r = outbound.read_frame() => r,
        };
        match delivered {
            Ok(frame) if !frame.is_empty() => continue,
            _ => break,
        }
    }
    shared.dispose();
}

/// Keep-alive send: sleep a random delay, write a random-length block of
/// printable noise on the inbound transport, re-arm.
async fn keepalive_send_cycle(shared: Arc<Shared>, inbound: Arc<dyn Transport>) {
    let mut block = [0u8; KEEPALIVE_BLOCK];
    loop {
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let delay =
            Duration::from_millis(thread_rng().gen_range(KEEPALIVE_DELAY_MIN_MS..KEEPALIVE_DELAY_MAX_MS));
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let len = thread_rng().gen_range(KEEPALIVE_PAYLOAD_MIN..KEEPALIVE_BLOCK);
        fill_random_ascii(&mut block[..len]);

        let written = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            r = inbound.write_frame(&block[..len]) => r,
        };
        if written.is_err() {
            break;
        }
    }
    shared.dispose();
}
