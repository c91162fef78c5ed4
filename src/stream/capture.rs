//! Capture/transmit loop.
//!
//! A dedicated thread samples the latest tracking data whenever the external
//! sampler has marked it fresh, encodes it and writes it to the peer. While
//! the peer is gone it keeps reconnecting until the timeout expires, then
//! goes idle and reports [`LinkEvent::TimedOut`] once.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::Sender;
use log::{debug, info, warn};

use super::codec;
use super::events::LinkEvent;
use crate::schema::{CaptureConfig, FaceSample, LayoutCursor, SharedLayout};

/// Latest tracking sample plus a dirty flag.
///
/// The tracking source publishes once per update tick; the capture loop
/// takes the sample only if it changed since the previous send.
#[derive(Debug, Default)]
pub struct SampleSlot {
    sample: Mutex<FaceSample>,
    dirty: AtomicBool,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new sample and mark it fresh.
    pub fn publish(&self, sample: &FaceSample) {
        self.sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .copy_from(sample);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Copy the sample into `out` if it is fresh, clearing the flag.
    pub fn take_fresh(&self, out: &mut FaceSample) -> bool {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return false;
        }
        out.copy_from(&self.sample.lock().unwrap_or_else(PoisonError::into_inner));
        true
    }
}

/// Capture loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not running; either stopped or timed out.
    Idle,
    /// Connected and sending.
    Connected,
    /// Peer lost, reconnecting until the timeout expires.
    Reconnecting,
}

/// Handle to a running capture loop. Dropping it stops the loop.
pub struct CaptureLoop {
    peer: SocketAddr,
    running: Arc<AtomicBool>,
    state: Arc<AtomicCell<CaptureState>>,
    frames_sent: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

pub(crate) fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("No address for {}", addr),
        )
    })
}

fn open_stream(peer: SocketAddr, config: &CaptureConfig) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&peer, config.connect_timeout())?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(config.write_timeout()))?;
    Ok(stream)
}

/// Whether the peer is still there, without consuming anything.
fn probe(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut byte = [0u8; 1];
    let alive = match stream.peek(&mut byte) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => e.kind() == io::ErrorKind::WouldBlock,
    };
    stream.set_nonblocking(false).is_ok() && alive
}

impl CaptureLoop {
    /// Connect to `config.peer` and start the loop thread.
    pub fn connect(
        config: &CaptureConfig,
        layout: Arc<SharedLayout>,
        slot: Arc<SampleSlot>,
        events: Sender<LinkEvent>,
    ) -> io::Result<Self> {
        let peer = resolve(&config.peer)?;
        let stream = open_stream(peer, config)?;
        info!("Capture connected to {}", peer);
        let _ = events.send(LinkEvent::Connected(peer));

        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicCell::new(CaptureState::Connected));
        let frames_sent = Arc::new(AtomicU64::new(0));

        let layout = LayoutCursor::new(layout);
        let worker = CaptureWorker {
            config: config.clone(),
            peer,
            stream: Some(stream),
            buffer: vec![0u8; layout.layout().total_frame_size],
            layout,
            slot,
            events,
            running: running.clone(),
            state: state.clone(),
            frames_sent: frames_sent.clone(),
            sample: FaceSample::default(),
            started: Instant::now(),
            frame_number: 0,
            lost_since: None,
        };
        let handle = thread::Builder::new()
            .name("facelink-capture".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            peer,
            running,
            state,
            frames_sent,
            handle: Some(handle),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> CaptureState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
        self.state.store(CaptureState::Idle);
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureWorker {
    config: CaptureConfig,
    peer: SocketAddr,
    stream: Option<TcpStream>,
    layout: LayoutCursor,
    buffer: Vec<u8>,
    slot: Arc<SampleSlot>,
    events: Sender<LinkEvent>,
    running: Arc<AtomicBool>,
    state: Arc<AtomicCell<CaptureState>>,
    frames_sent: Arc<AtomicU64>,
    sample: FaceSample,
    started: Instant,
    frame_number: i32,
    lost_since: Option<Instant>,
}

impl CaptureWorker {
    fn run(mut self) {
        let interval = self.config.send_interval();
        while self.running.load(Ordering::Acquire) {
            if self.layout.refresh() {
                let size = self.layout.layout().total_frame_size;
                info!("Capture layout changed, frame size {}", size);
                self.buffer.resize(size, 0);
            }

            let connected = self.stream.as_ref().is_some_and(probe);
            if connected {
                self.send_fresh();
            } else {
                if self.stream.is_some() {
                    self.lose("peer closed the connection");
                }
                if self.retry_or_time_out() {
                    break;
                }
            }
            thread::sleep(interval);
        }
        debug!("Capture loop for {} exiting", self.peer);
    }

    fn send_fresh(&mut self) {
        if !self.slot.take_fresh(&mut self.sample) {
            return;
        }
        self.sample.frame_number = self.frame_number;
        self.sample.frame_time = self.started.elapsed().as_secs_f32();

        let layout = self.layout.layout();
        let frame = &mut self.buffer[..layout.total_frame_size];
        if let Err(e) = codec::encode(&self.sample, layout, frame) {
            warn!("Capture encode failed: {}", e);
            self.lose("encode failed");
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.write_all(frame) {
            Ok(()) => {
                self.frame_number = self.frame_number.wrapping_add(1);
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Capture send failed: {}", e);
                self.lose("send failed");
            }
        }
    }

    fn lose(&mut self, reason: &str) {
        warn!("Capture lost {}: {}", self.peer, reason);
        self.stream = None;
        self.lost_since.get_or_insert_with(Instant::now);
        self.state.store(CaptureState::Reconnecting);
        let _ = self.events.send(LinkEvent::ConnectionLost);
    }

    /// Returns true once the timeout has expired and the loop must stop.
    fn retry_or_time_out(&mut self) -> bool {
        let lost_since = *self.lost_since.get_or_insert_with(Instant::now);
        if lost_since.elapsed() > self.config.timeout() {
            warn!(
                "Capture timed out after {:.1}s without {}",
                self.config.timeout().as_secs_f32(),
                self.peer
            );
            self.state.store(CaptureState::Idle);
            self.running.store(false, Ordering::Release);
            let _ = self.events.send(LinkEvent::TimedOut);
            return true;
        }

        match open_stream(self.peer, &self.config) {
            Ok(stream) => {
                info!("Capture reconnected to {}", self.peer);
                self.stream = Some(stream);
                self.lost_since = None;
                self.state.store(CaptureState::Connected);
                let _ = self.events.send(LinkEvent::Connected(self.peer));
            }
            Err(e) => debug!("Reconnect to {} failed: {}", self.peer, e),
        }
        false
    }
}
