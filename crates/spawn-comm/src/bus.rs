//! The background message bus (C4, §4.4): a single I/O thread that polls
//! every listener and port, fills send slots from the send queue, drains
//! completed frames into the receive queue, and can be paused so the
//! foreground can mutate the network state without racing it.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};
use spawn_bytes::BufferPool;
use spawn_error::{Error, Result};
use spawn_net::Network;
use spawn_wire::HEADER_SIZE;

use crate::queue::{RecvQueue, SendQueue};
use crate::slots::{RecvSlot, SendSlot};

const RUNNING_GO: u8 = 0;
const RUNNING_PAUSE: u8 = 1;
const RUNNING_HALT: u8 = 2;

/// Listener tokens occupy `[0, PORT_TOKEN_BASE)`; this bounds listening
/// endpoints per node well above anything §4.6 would ever allocate (one per
/// distinct interface reachable by a child).
const PORT_TOKEN_BASE: usize = 1 << 16;

/// The default poll timeout (§4.4): bounded so pause/halt requests and
/// newly-queued sends are noticed promptly.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

struct PortState {
    send: SendSlot,
    recv: RecvSlot,
    /// Last interest registered with `Poll`, to avoid redundant reregisters.
    interest: Interest,
}

/// Owns the poll-driven I/O thread for one node. Constructed once; `start`
/// spawns the thread, `stop_processing`/`resume_processing` implement the
/// pause protocol (§5), and `halt_processing` terminates it for good.
pub struct Comm {
    network: Arc<Network>,
    pool: BufferPool,
    sendq: Arc<SendQueue>,
    recvq: Arc<RecvQueue>,
    running: Arc<AtomicU8>,
    paused: Arc<AtomicBool>,
    poll_timeout: Duration,
    thread: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Comm {
    pub fn new(network: Arc<Network>, pool: BufferPool, sendq_capacity: usize, recvq_capacity: usize) -> Self {
        Comm {
            network,
            pool,
            sendq: Arc::new(SendQueue::new(sendq_capacity)),
            recvq: Arc::new(RecvQueue::new(recvq_capacity)),
            running: Arc::new(AtomicU8::new(RUNNING_GO)),
            paused: Arc::new(AtomicBool::new(false)),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            thread: parking_lot::Mutex::new(None),
        }
    }

    pub fn sendq(&self) -> &Arc<SendQueue> {
        &self.sendq
    }

    pub fn recvq(&self) -> &Arc<RecvQueue> {
        &self.recvq
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Starts the background I/O thread. Returns once the thread has been
    /// spawned; the thread itself performs its first poll asynchronously.
    pub fn start_processing(&self) -> Result<()> {
        let network = self.network.clone();
        let pool = self.pool.clone();
        let sendq = self.sendq.clone();
        let recvq = self.recvq.clone();
        let running = self.running.clone();
        let paused = self.paused.clone();
        let timeout = self.poll_timeout;

        let handle = std::thread::Builder::new()
            .name("spawn:comm".into())
            .spawn(move || run_bus_thread(network, pool, sendq, recvq, running, paused, timeout))
            .map_err(|e| Error::io("spawning communication thread", e))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Temporarily stops the bus from processing new requests so the
    /// foreground can mutate the network state without racing it (§4.4,
    /// §5). Spins until the bus acknowledges.
    pub fn stop_processing(&self) {
        self.running.store(RUNNING_PAUSE, Ordering::Release);
        while !self.paused.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
    }

    pub fn resume_processing(&self) {
        self.running.store(RUNNING_GO, Ordering::Release);
    }

    /// Terminates the bus thread for good and joins it.
    pub fn halt_processing(&self) {
        self.running.store(RUNNING_HALT, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_bus_thread(
    network: Arc<Network>,
    pool: BufferPool,
    sendq: Arc<SendQueue>,
    recvq: Arc<RecvQueue>,
    running: Arc<AtomicU8>,
    paused: Arc<AtomicBool>,
    timeout: Duration,
) {
    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            log::error!("comm thread: failed to create poller: {e}");
            return;
        }
    };
    let mut events = Events::with_capacity(256);
    let mut ports: Vec<PortState> = Vec::new();
    let mut last_nports = 0usize;
    let mut last_nlisteners = 0usize;

    loop {
        match running.load(Ordering::Acquire) {
            RUNNING_HALT => break,
            RUNNING_PAUSE => {
                paused.store(true, Ordering::Release);
                std::thread::yield_now();
                continue;
            }
            _ => paused.store(false, Ordering::Release),
        }

        if let Err(e) = tick(
            &network,
            &pool,
            &sendq,
            &recvq,
            &mut poll,
            &mut events,
            &mut ports,
            &mut last_nports,
            &mut last_nlisteners,
            timeout,
        ) {
            log::error!("comm thread: tick failed: {e}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn tick(
    network: &Arc<Network>,
    pool: &BufferPool,
    sendq: &Arc<SendQueue>,
    recvq: &Arc<RecvQueue>,
    poll: &mut Poll,
    events: &mut Events,
    ports: &mut Vec<PortState>,
    last_nports: &mut usize,
    last_nlisteners: &mut usize,
    timeout: Duration,
) -> Result<()> {
    // Step 1: reconcile port/listener bookkeeping under the network lock.
    {
        let mut state = network.lock();
        if state.nports() != *last_nports {
            reconcile_ports(poll, &mut state, ports)?;
            *last_nports = state.nports();
        }
        if state.listeners.len() != *last_nlisteners {
            reconcile_listeners(poll, &mut state, *last_nlisteners)?;
            *last_nlisteners = state.listeners.len();
        }
    }

    // Step 2: fill send slots from the send queue.
    fill_send_slots(network, sendq, ports)?;

    // Step 3: compute desired poll interest per port and reregister on change.
    for (idx, port) in ports.iter_mut().enumerate() {
        let desired = if port.send.is_empty() { Interest::READABLE } else { Interest::READABLE | Interest::WRITABLE };
        if desired != port.interest {
            let mut state = network.lock();
            poll.registry().reregister(&mut state.ports[idx], Token(PORT_TOKEN_BASE + idx), desired)
                .map_err(|e| Error::io("reregistering port", e))?;
            port.interest = desired;
        }
    }

    // Step 4: poll.
    poll.poll(events, Some(timeout)).map_err(|e| Error::io("poll", e))?;

    // Step 5: accept new connections.
    for event in events.iter() {
        let token = event.token().0;
        if token < PORT_TOKEN_BASE && event.is_readable() {
            accept_one(network, token)?;
        }
    }

    // Step 6: read from readable ports.
    for event in events.iter() {
        let token = event.token().0;
        if token >= PORT_TOKEN_BASE && event.is_readable() {
            let idx = token - PORT_TOKEN_BASE;
            read_port(network, pool, recvq, ports, idx)?;
        }
    }

    // Step 7: write to writable ports.
    for event in events.iter() {
        let token = event.token().0;
        if token >= PORT_TOKEN_BASE && event.is_writable() {
            let idx = token - PORT_TOKEN_BASE;
            write_port(network, ports, idx)?;
        }
    }

    Ok(())
}

fn reconcile_ports(poll: &mut Poll, state: &mut spawn_net::NetworkState, ports: &mut Vec<PortState>) -> Result<()> {
    while ports.len() < state.ports.len() {
        let idx = ports.len();
        poll.registry()
            .register(&mut state.ports[idx], Token(PORT_TOKEN_BASE + idx), Interest::READABLE)
            .map_err(|e| Error::io("registering new port", e))?;
        ports.push(PortState { send: SendSlot::Empty, recv: None, interest: Interest::READABLE });
    }
    Ok(())
}

fn reconcile_listeners(poll: &mut Poll, state: &mut spawn_net::NetworkState, from: usize) -> Result<()> {
    for idx in from..state.listeners.len() {
        poll.registry()
            .register(&mut state.listeners[idx], Token(idx), Interest::READABLE)
            .map_err(|e| Error::io("registering new listener", e))?;
    }
    Ok(())
}

fn fill_send_slots(network: &Arc<Network>, sendq: &Arc<SendQueue>, ports: &mut [PortState]) -> Result<()> {
    loop {
        let header = match sendq.with_front(|b| spawn_wire::peek_header(b)) {
            None => break,
            Some(Err(e)) => {
                log::warn!("dropping malformed queued frame: {e}");
                sendq.pop_front();
                continue;
            }
            Some(Ok(h)) => h,
        };

        if header.is_broadcast() {
            if !ports.iter().all(|p| p.send.is_empty()) {
                break;
            }
            let buf = match sendq.pop_front() {
                Some(b) => b,
                None => break,
            };
            let bytes = Arc::new(buf.as_slice().to_vec());
            for port in ports.iter_mut() {
                port.send = SendSlot::Sending { bytes: bytes.clone(), written: 0 };
            }
            // `buf` drops here, returning the staging buffer to the pool.
        } else {
            let port_idx = {
                let state = network.lock();
                state.lft_lookup(header.dst)
            };
            let port_idx = match port_idx {
                None => {
                    log::warn!("dropping unicast to unknown destination {}", header.dst);
                    sendq.pop_front();
                    continue;
                }
                Some(p) => p,
            };
            if port_idx >= ports.len() {
                log::warn!("dropping unicast to out-of-range port {port_idx}");
                sendq.pop_front();
                continue;
            }
            if !ports[port_idx].send.is_empty() {
                break;
            }
            let buf = match sendq.pop_front() {
                Some(b) => b,
                None => break,
            };
            let bytes = Arc::new(buf.as_slice().to_vec());
            ports[port_idx].send = SendSlot::Sending { bytes, written: 0 };
        }
    }
    Ok(())
}

fn accept_one(network: &Arc<Network>, listener_idx: usize) -> Result<()> {
    if network.accept_slot().is_pending() {
        // A second simultaneous connect burst arrives before the foreground
        // drained the handoff slot. Leave it queued in the OS backlog; we'll
        // pick it up again once the slot frees (§9 known limitation).
        return Ok(());
    }
    let mut state = network.lock();
    let listener = match state.listeners.get_mut(listener_idx) {
        Some(l) => l,
        None => return Ok(()),
    };
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                drop(state);
                network.accept_slot().publish(stream)?;
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io("accept", e)),
        }
    }
}

fn read_port(
    network: &Arc<Network>,
    pool: &BufferPool,
    recvq: &Arc<RecvQueue>,
    ports: &mut [PortState],
    idx: usize,
) -> Result<()> {
    loop {
        if ports[idx].recv.is_none() {
            let mut handle = pool.pull();
            handle.resize(HEADER_SIZE)?;
            ports[idx].recv = Some(handle);
        }

        let mut state = network.lock();
        let stream = match state.ports.get_mut(idx) {
            Some(s) => s,
            None => return Ok(()),
        };

        let handle = ports[idx].recv.as_mut().expect("just ensured a recv slot exists");
        let n = match stream.read(handle.unfilled_mut()) {
            Ok(0) => {
                log::warn!("port {idx} closed by peer mid-frame");
                ports[idx].recv = None;
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("transient read error on port {idx}: {e}");
                return Ok(());
            }
        };
        drop(state);

        let handle = ports[idx].recv.as_mut().expect("just ensured a recv slot exists");
        handle.advance(n)?;

        if handle.is_full() {
            if handle.size() == HEADER_SIZE {
                let header = spawn_wire::peek_header(handle)?;
                handle.resize(HEADER_SIZE + header.payload_len as usize)?;
                // fall through to read the payload in the same tick if more
                // data is already buffered by the kernel.
                continue;
            }
            let completed = ports[idx].recv.take().expect("just checked is_full");
            let header = spawn_wire::peek_header(&completed)?;
            if header.is_broadcast() {
                relay_broadcast(ports, idx, completed.as_slice());
            }
            recvq.enqueue(completed)?;
            return Ok(());
        }
    }
}

/// Replicates a frame received as a broadcast out every port other than the
/// one it arrived on, so multi-hop trees relay root-originated broadcasts
/// (PING, the task announcement) down through interior nodes (§4.4, GLOSSARY
/// "Broadcast"). By protocol convention port 0 is always "up toward root"
/// (§3), so a broadcast only ever arrives on port 0 and this never sends
/// back the way it came.
fn relay_broadcast(ports: &mut [PortState], arrived_on: usize, frame: &[u8]) {
    if ports.len() <= 1 {
        return;
    }
    let bytes = Arc::new(frame.to_vec());
    for (idx, port) in ports.iter_mut().enumerate() {
        if idx == arrived_on {
            continue;
        }
        if port.send.is_empty() {
            port.send = SendSlot::Sending { bytes: bytes.clone(), written: 0 };
        } else {
            log::warn!("dropping broadcast relay to port {idx}: send slot busy");
        }
    }
}

fn write_port(network: &Arc<Network>, ports: &mut [PortState], idx: usize) -> Result<()> {
    loop {
        let (bytes, written) = match &ports[idx].send {
            SendSlot::Empty => return Ok(()),
            SendSlot::Sending { bytes, written } => (bytes.clone(), *written),
        };

        let mut state = network.lock();
        let stream = match state.ports.get_mut(idx) {
            Some(s) => s,
            None => return Ok(()),
        };

        match stream.write(&bytes[written..]) {
            Ok(0) => {
                log::warn!("port {idx} accepted zero bytes; leaving slot for next writable event");
                return Ok(());
            }
            Ok(n) => {
                drop(state);
                let new_written = written + n;
                if new_written == bytes.len() {
                    ports[idx].send = SendSlot::Empty;
                    return Ok(());
                }
                ports[idx].send = SendSlot::Sending { bytes, written: new_written };
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("transient write error on port {idx}: {e}");
                return Ok(());
            }
        }
    }
}
