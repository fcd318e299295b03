//! Frame delivery sinks.
//!
//! Exactly one sink is attached to a tracer for its lifetime: a synchronous
//! callback (tests, embedders), or a UDP/TCP connection to the local agent.
//! Network sinks never touch the socket from the hot path. Encoded frames
//! go into the ring buffer and a single flusher thread drains whole frames
//! out, reading the 2-byte length prefix first so it always pops exact
//! frame boundaries. Transport failures are swallowed: a missing agent
//! must never destabilize the monitored program.

use crate::error::Error;
use crate::event::Event;
use crate::protocol::{BATCH_PACKET_SIZE, RING_BUFFER_SIZE, SHUTDOWN_GRACE, SINK_THREAD_TICK};
use crate::ring_buffer::RingBuffer;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sink kind, used to enforce write-once assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Callback,
    Udp,
    Tcp,
}

/// Synchronous event observer. Receives each decoded event in the emitting
/// thread.
pub type Callback = Box<dyn Fn(&Event) + Send + Sync>;

pub(crate) enum Sink {
    Callback(Callback),
    Network(NetworkSink),
}

impl Sink {
    pub(crate) fn callback(callback: Callback) -> Self {
        Sink::Callback(callback)
    }

    pub(crate) fn udp(host: &str, port: u16) -> Result<Self, Error> {
        Ok(Sink::Network(NetworkSink::spawn(Transport::udp(host, port)?)))
    }

    pub(crate) fn tcp(host: &str, port: u16) -> Result<Self, Error> {
        Ok(Sink::Network(NetworkSink::spawn(Transport::tcp(host, port)?)))
    }

    pub(crate) fn kind(&self) -> SinkKind {
        match self {
            Sink::Callback(_) => SinkKind::Callback,
            Sink::Network(sink) => sink.kind,
        }
    }

    /// Hand one event to the sink. The callback path delivers the typed
    /// record; the network path enqueues the encoded frame and drops it
    /// when the buffer is full.
    pub(crate) fn deliver(&self, event: &Event, frame: &[u8]) {
        match self {
            Sink::Callback(callback) => callback(event),
            Sink::Network(sink) => {
                if !sink.ring.push(frame) {
                    sink.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(frame_len = frame.len(), "ring buffer full, frame dropped");
                }
            }
        }
    }

    /// Drain buffered frames and stop the flusher thread. Bounded by the
    /// shutdown grace period.
    pub(crate) fn close(self) {
        if let Sink::Network(sink) = self {
            sink.close();
        }
    }
}

/// Ring buffer plus flusher thread for the UDP/TCP transports.
pub(crate) struct NetworkSink {
    kind: SinkKind,
    ring: Arc<RingBuffer>,
    shutdown: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    flusher: Option<JoinHandle<()>>,
}

impl NetworkSink {
    fn spawn(transport: Transport) -> Self {
        let kind = transport.kind();
        let ring = Arc::new(RingBuffer::with_capacity(RING_BUFFER_SIZE));
        let shutdown = Arc::new(AtomicBool::new(false));
        let flusher = {
            let ring = Arc::clone(&ring);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("rastro-sink".to_string())
                .spawn(move || flusher_loop(transport, &ring, &shutdown))
                .ok()
        };
        if flusher.is_none() {
            warn!("failed to spawn sink flusher thread, frames will be dropped");
        }
        Self {
            kind,
            ring,
            shutdown,
            dropped: Arc::new(AtomicU64::new(0)),
            flusher,
        }
    }

    fn close(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            info!(dropped, "frames dropped under backpressure during session");
        }
    }
}

/// Pop whole frames (length prefix first, then the remainder) and send
/// them until shutdown, then keep draining until empty or the grace period
/// lapses.
fn flusher_loop(mut transport: Transport, ring: &RingBuffer, shutdown: &AtomicBool) {
    let mut deadline: Option<Instant> = None;
    loop {
        if shutdown.load(Ordering::Acquire) {
            let limit = *deadline.get_or_insert_with(|| Instant::now() + SHUTDOWN_GRACE);
            if ring.used() == 0 || Instant::now() >= limit {
                break;
            }
        }
        let Some(mut frame) = ring.shift(2) else {
            thread::sleep(SINK_THREAD_TICK);
            continue;
        };
        let total = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        // Pushes are all-or-nothing, so the rest of the frame is present.
        if let Some(rest) = ring.shift(total - 2) {
            frame.extend_from_slice(&rest);
            if let Err(err) = transport.send(&frame) {
                debug!(error = %err, "sink transport error, frame dropped");
            }
        }
    }
}

/// The two agent transports. UDP sends one frame per datagram; TCP writes
/// the concatenated frame stream, reconnecting lazily after failures.
enum Transport {
    Udp {
        socket: UdpSocket,
        dest: SocketAddr,
    },
    Tcp {
        addr: SocketAddr,
        stream: Option<TcpStream>,
    },
}

impl Transport {
    fn udp(host: &str, port: u16) -> Result<Self, Error> {
        let dest = resolve(host, port)?;
        let socket = udp_socket(dest)
            .map_err(|e| Error::Config(format!("cannot open UDP sink socket: {e}")))?;
        Ok(Transport::Udp { socket, dest })
    }

    fn tcp(host: &str, port: u16) -> Result<Self, Error> {
        let addr = resolve(host, port)?;
        // Connectivity is best-effort; the agent may come up later.
        let stream = TcpStream::connect(addr)
            .map_err(|e| {
                info!(error = %e, %addr, "TCP agent not reachable yet, will retry per frame");
                e
            })
            .ok();
        Ok(Transport::Tcp { addr, stream })
    }

    fn kind(&self) -> SinkKind {
        match self {
            Transport::Udp { .. } => SinkKind::Udp,
            Transport::Tcp { .. } => SinkKind::Tcp,
        }
    }

    fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Udp { socket, dest } => {
                socket.send_to(frame, *dest)?;
                Ok(())
            }
            Transport::Tcp { addr, stream } => {
                if stream.is_none() {
                    *stream = Some(TcpStream::connect(*addr)?);
                }
                // Invariant: stream is Some here.
                let result = match stream.as_mut() {
                    Some(s) => s.write_all(frame),
                    None => return Ok(()),
                };
                if result.is_err() {
                    *stream = None;
                }
                result
            }
        }
    }
}

/// Unbound-port UDP socket with its send buffer sized to the datagram
/// budget, so a send never blocks the flusher on a slow agent.
fn udp_socket(dest: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(dest), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_send_buffer_size(BATCH_PACKET_SIZE)?;
    let bind: SocketAddr = if dest.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&bind.into())?;
    Ok(socket.into())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve sink address {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| Error::Config(format!("no address for sink {host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::event::EventKind;
    use std::time::Duration;

    fn frame() -> (Event, Vec<u8>) {
        let event = Event::new(7, 1, 42, EventKind::EndTransaction);
        let bytes = codec::encode(&event);
        (event, bytes)
    }

    #[test]
    fn test_callback_sink_receives_typed_events() {
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured = Arc::clone(&received);
        let sink = Sink::callback(Box::new(move |event: &Event| {
            captured.lock().unwrap().push(event.clone());
        }));
        assert_eq!(sink.kind(), SinkKind::Callback);

        let (event, bytes) = frame();
        sink.deliver(&event, &bytes);
        assert_eq!(received.lock().unwrap().as_slice(), &[event]);
    }

    #[test]
    fn test_udp_socket_send_buffer_sized_for_batches() {
        let socket = udp_socket(SocketAddr::from(([127, 0, 0, 1], 2799))).unwrap();
        let configured = socket2::SockRef::from(&socket).send_buffer_size().unwrap();
        // The kernel may round the requested size up, never down.
        assert!(configured >= BATCH_PACKET_SIZE);
    }

    #[test]
    fn test_udp_sink_sends_one_frame_per_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = Sink::udp("127.0.0.1", port).unwrap();
        assert_eq!(sink.kind(), SinkKind::Udp);
        let (event, bytes) = frame();
        sink.deliver(&event, &bytes);
        sink.deliver(&event, &bytes);

        let mut buf = [0u8; 128];
        for _ in 0..2 {
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], bytes.as_slice());
        }
        sink.close();
    }

    #[test]
    fn test_tcp_sink_streams_concatenated_frames() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let sink = Sink::tcp("127.0.0.1", port).unwrap();
        assert_eq!(sink.kind(), SinkKind::Tcp);
        let (event, bytes) = frame();
        sink.deliver(&event, &bytes);
        sink.deliver(&event, &bytes);
        let expected = [bytes.clone(), bytes.clone()].concat();

        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        // close() drains the ring before joining the flusher.
        sink.close();

        use std::io::Read;
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        while received.len() < expected.len() {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(_) => break,
            }
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_close_drains_buffered_frames() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = Sink::udp("127.0.0.1", port).unwrap();
        let (event, bytes) = frame();
        for _ in 0..10 {
            sink.deliver(&event, &bytes);
        }
        sink.close();

        let mut buf = [0u8; 128];
        for _ in 0..10 {
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], bytes.as_slice());
        }
    }
}
