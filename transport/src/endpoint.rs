//! One side of the TCP link.
//!
//! An [`Endpoint`] owns at most one connection at a time. Once connected it
//! runs three tasks against it:
//! - **Receive loop**: reads frames, answers PINGs, surfaces everything else
//! - **Writer**: drains the outgoing queue, so sends never interleave
//! - **Heartbeat**: pings once a second and watches for lag and silence
//!
//! Every failure ends up as exactly one event on the endpoint's channel;
//! nothing is thrown back at the caller.

use crate::config::EndpointConfig;
use crate::error::TransportError;
use crate::framing::{read_packet, write_packet};
use crate::monitor::{LinkMonitor, LinkSignal};
use log::{debug, error, info, warn};
use shared::{Packet, Payload, Role};
use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Everything the transport reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { peer: SocketAddr },
    PacketReceived(Packet),
    /// Terminal event for an established connection.
    Disconnected(TransportError),
    LagChanged(bool),
    /// Terminal event for a connection that never came up.
    Error(TransportError),
}

pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Listening,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug)]
enum Outgoing {
    Packet(Packet),
    Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct LinkTasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// State of one established connection.
struct Link {
    closed: AtomicBool,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    monitor: Mutex<LinkMonitor>,
    tasks: Mutex<LinkTasks>,
}

impl Link {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn queue(&self, packet: Packet) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outgoing.send(Outgoing::Packet(packet)).is_ok()
    }

    /// Stops every task. With `flush` the writer first drains what is
    /// already queued, and its handle is handed back so the caller can wait
    /// for the drain.
    fn shutdown(&self, flush: bool) -> Option<JoinHandle<()>> {
        let _ = self.outgoing.send(Outgoing::Shutdown);

        let mut tasks = lock(&self.tasks);
        if let Some(reader) = tasks.reader.take() {
            reader.abort();
        }
        if let Some(heartbeat) = tasks.heartbeat.take() {
            heartbeat.abort();
        }
        let writer = tasks.writer.take()?;
        if flush {
            Some(writer)
        } else {
            writer.abort();
            None
        }
    }
}

struct Shared {
    config: EndpointConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Arc<Link>>>,
    handshake: Mutex<Option<JoinHandle<()>>>,
    /// Writer of a locally closed link that is still flushing.
    draining: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped, discarding transport event");
        }
    }

    /// Handshake failed before any connection existed.
    fn fail(&self, reason: TransportError) {
        warn!("{} endpoint failed: {}", self.config.role, reason);
        *lock(&self.state) = ConnectionState::Idle;
        self.emit(TransportEvent::Error(reason));
    }

    /// Ends `link` because of something the peer or the network did. Only
    /// the first caller for a given link gets through.
    fn terminate(&self, link: &Arc<Link>, reason: TransportError) {
        if link.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("{} connection closed: {}", self.config.role, reason);
        self.detach(link);
        link.shutdown(false);
        self.emit(TransportEvent::Disconnected(reason));
    }

    fn detach(&self, link: &Arc<Link>) {
        let mut current = lock(&self.link);
        if current.as_ref().is_some_and(|l| Arc::ptr_eq(l, link)) {
            *current = None;
            *lock(&self.state) = ConnectionState::Closed;
        }
    }

    async fn accept(self: Arc<Self>, listener: TcpListener) {
        let limit = self.config.link.accept_timeout;
        match timeout(limit, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                drop(listener);
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                self.attach(stream, peer);
            }
            Ok(Err(e)) => self.fail(e.into()),
            Err(_) => {
                warn!("No peer connected within {:?}", limit);
                self.fail(TransportError::AcceptTimeout);
            }
        }
    }

    async fn connect(self: Arc<Self>) {
        let peer = self.config.addr;
        let limit = self.config.link.connect_timeout;
        match timeout(limit, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
                    warn!("Failed to enable keep-alive: {}", e);
                }
                self.attach(stream, peer);
            }
            Ok(Err(e)) => self.fail(e.into()),
            Err(_) => {
                warn!("Connecting to {} took longer than {:?}", peer, limit);
                self.fail(TransportError::ConnectTimeout);
            }
        }
    }

    /// Promotes a fresh stream to the endpoint's live link.
    fn attach(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            closed: AtomicBool::new(false),
            outgoing: out_tx,
            monitor: Mutex::new(LinkMonitor::new(&self.config.link, Instant::now())),
            tasks: Mutex::new(LinkTasks::default()),
        });

        {
            let mut slot = lock(&self.link);
            let mut state = lock(&self.state);
            if !matches!(
                *state,
                ConnectionState::Listening | ConnectionState::Connecting
            ) {
                debug!("Endpoint closed during handshake, dropping {}", peer);
                return;
            }
            *state = ConnectionState::Connected;
            *slot = Some(Arc::clone(&link));
        }

        info!("{} connected to {}", self.config.role, peer);
        self.emit(TransportEvent::Connected { peer });

        let tasks = LinkTasks {
            reader: Some(tokio::spawn(Arc::clone(self).run_reader(
                Arc::clone(&link),
                reader,
            ))),
            writer: Some(tokio::spawn(Arc::clone(self).run_writer(
                Arc::clone(&link),
                writer,
                out_rx,
            ))),
            heartbeat: Some(tokio::spawn(
                Arc::clone(self).run_heartbeat(Arc::clone(&link)),
            )),
        };
        *lock(&link.tasks) = tasks;

        // The link may have died before the handles were stored.
        if link.is_closed() {
            link.shutdown(false);
        }
    }

    async fn run_reader(self: Arc<Self>, link: Arc<Link>, mut reader: OwnedReadHalf) {
        loop {
            let packet = match read_packet(&mut reader).await {
                Ok(packet) => packet,
                Err(reason) => {
                    self.terminate(&link, reason);
                    return;
                }
            };

            {
                let mut monitor = lock(&link.monitor);
                if let Some(LinkSignal::LagChanged(lagging)) = monitor.mark_seen(Instant::now()) {
                    if !link.is_closed() {
                        self.emit(TransportEvent::LagChanged(lagging));
                    }
                }
                if matches!(packet.payload, Payload::Pong) {
                    if let Some(rtt) = monitor.record_pong(Instant::now()) {
                        debug!("Round trip {:?}", rtt);
                    }
                }
            }

            match packet.payload {
                Payload::Ping => {
                    link.queue(Packet::new(Payload::Pong));
                }
                Payload::Pong => {}
                Payload::Disconnect => {
                    self.terminate(&link, TransportError::PeerDisconnected);
                    return;
                }
                _ => {
                    if link.is_closed() {
                        return;
                    }
                    self.emit(TransportEvent::PacketReceived(packet));
                }
            }
        }
    }

    async fn run_writer(
        self: Arc<Self>,
        link: Arc<Link>,
        mut writer: OwnedWriteHalf,
        mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        while let Some(message) = outgoing.recv().await {
            match message {
                Outgoing::Packet(packet) => {
                    if let Err(reason) = write_packet(&mut writer, &packet).await {
                        error!("Failed to send {:?}: {}", packet.kind(), reason);
                        self.terminate(&link, reason);
                        return;
                    }
                }
                Outgoing::Shutdown => break,
            }
        }
        // Dropping the half shuts down the write side of the socket.
        drop(writer);
    }

    async fn run_heartbeat(self: Arc<Self>, link: Arc<Link>) {
        let mut ping = interval(self.config.link.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut check = interval(self.config.link.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if link.is_closed() {
                        return;
                    }
                    lock(&link.monitor).record_ping(Instant::now());
                    link.queue(Packet::new(Payload::Ping));
                }
                _ = check.tick() => {
                    if link.is_closed() {
                        return;
                    }
                    let signal = {
                        let mut monitor = lock(&link.monitor);
                        let signal = monitor.evaluate(Instant::now());
                        if let Some(LinkSignal::LagChanged(lagging)) = signal {
                            if lagging {
                                warn!("No traffic for {:?}", monitor.silence(Instant::now()));
                            }
                            if !link.is_closed() {
                                self.emit(TransportEvent::LagChanged(lagging));
                            }
                        }
                        signal
                    };
                    if signal == Some(LinkSignal::TimedOut) {
                        self.terminate(&link, TransportError::TimeoutDisconnected);
                        return;
                    }
                }
            }
        }
    }
}

/// Cloneable handle to one side of the link. All clones share the same
/// connection.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl Endpoint {
    /// Creates an idle endpoint and the receiver its events arrive on.
    pub fn new(config: EndpointConfig) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            events,
            state: Mutex::new(ConnectionState::Idle),
            link: Mutex::new(None),
            handshake: Mutex::new(None),
            draining: Mutex::new(None),
            local_addr: Mutex::new(None),
        });
        (Self { shared }, receiver)
    }

    /// Begins listening (server) or connecting (client). Returns as soon as
    /// the handshake is under way; the outcome arrives as `Connected` or
    /// `Error`. Only rejects the call itself when a handshake or connection
    /// is already active.
    pub async fn start(&self) -> Result<(), TransportError> {
        let role = self.shared.config.role;
        {
            let mut state = lock(&self.shared.state);
            if !matches!(*state, ConnectionState::Idle | ConnectionState::Closed) {
                return Err(TransportError::AlreadyActive);
            }
            *state = match role {
                Role::Server => ConnectionState::Listening,
                Role::Client => ConnectionState::Connecting,
            };
        }

        let handshake = match role {
            Role::Server => {
                let listener = match TcpListener::bind(self.shared.config.addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        self.shared.fail(e.into());
                        return Ok(());
                    }
                };
                let local = listener.local_addr().ok();
                *lock(&self.shared.local_addr) = local;
                info!("Waiting for a peer on {:?}", local);
                tokio::spawn(Arc::clone(&self.shared).accept(listener))
            }
            Role::Client => {
                info!("Connecting to {}", self.shared.config.addr);
                tokio::spawn(Arc::clone(&self.shared).connect())
            }
        };
        *lock(&self.shared.handshake) = Some(handshake);
        Ok(())
    }

    /// Queues `packet` for the writer. Returns `false` without complaint when
    /// there is no live connection.
    pub fn send(&self, packet: Packet) -> bool {
        let link = lock(&self.shared.link).clone();
        match link {
            Some(link) => link.queue(packet),
            None => {
                debug!("Dropping {:?}, no live connection", packet.kind());
                false
            }
        }
    }

    /// Tells the peer we are leaving, then closes.
    pub fn disconnect(&self) {
        self.send(Packet::new(Payload::Disconnect));
        self.close();
    }

    /// Tears everything down. Safe to call repeatedly and from any thread;
    /// a receive loop blocked on a read is aborted. Frames queued before the
    /// call keep draining in the background as long as the runtime lives;
    /// use [`Endpoint::shutdown`] to wait for them. A local close emits no
    /// event.
    pub fn close(&self) {
        if let Some(handshake) = lock(&self.shared.handshake).take() {
            handshake.abort();
        }

        let link = {
            let mut slot = lock(&self.shared.link);
            let mut state = lock(&self.shared.state);
            if *state != ConnectionState::Idle {
                *state = ConnectionState::Closed;
            }
            slot.take()
        };

        if let Some(link) = link {
            if !link.closed.swap(true, Ordering::SeqCst) {
                info!("{} closing connection", self.shared.config.role);
                if let Some(writer) = link.shutdown(true) {
                    *lock(&self.shared.draining) = Some(writer);
                }
            }
        }
    }

    /// Closes like [`Endpoint::close`], then waits up to the configured
    /// flush timeout for queued frames to reach the socket. Call this before
    /// the runtime goes away.
    pub async fn shutdown(&self) {
        self.close();

        let writer = lock(&self.shared.draining).take();
        let Some(mut writer) = writer else {
            return;
        };
        let limit = self.shared.config.link.flush_timeout;
        match timeout(limit, &mut writer).await {
            Ok(Ok(())) => debug!("{} outgoing queue flushed", self.shared.config.role),
            Ok(Err(e)) => warn!("Writer ended abnormally: {}", e),
            Err(_) => {
                warn!("Outgoing queue not flushed within {:?}", limit);
                writer.abort();
            }
        }
    }

    pub fn role(&self) -> Role {
        self.shared.config.role
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.shared.config
    }

    /// Current lifecycle state. `Closed` after any teardown, `Idle` again
    /// only when a handshake failed.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// True while a connection is up and not yet torn down.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address the server is bound to, once `start()` has bound it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    /// Most recent PING round trip on the live connection.
    pub fn latency(&self) -> Option<Duration> {
        let link = lock(&self.shared.link).clone();
        link.and_then(|link| lock(&link.monitor).latency())
    }

    /// True while the writer of a locally closed link is still draining.
    pub fn is_flushing(&self) -> bool {
        lock(&self.shared.draining)
            .as_ref()
            .is_some_and(|writer| !writer.is_finished())
    }

    /// Lag flag of the live connection; `false` when there is none.
    pub fn is_lagging(&self) -> bool {
        let link = lock(&self.shared.link).clone();
        link.is_some_and(|link| lock(&link.monitor).is_lagging())
    }
}
