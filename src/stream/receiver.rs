//! Receive/decode loop.
//!
//! Listens for one peer at a time, assembles fixed-size frames from the
//! byte stream and feeds them through a [`DecodeStage`]. While muted (during
//! playback) frames are still read so the socket keeps draining, but they
//! never reach the live state.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::Sender;
use log::{debug, info, warn};

use super::events::LinkEvent;
use super::live::LiveState;
use super::source::{FrameSource, LiveSource};
use super::stage::{DecodeStage, StageStats};
use crate::animation::Recorder;
use crate::schema::{ReceiveConfig, SharedLayout};

/// Handle to a running receive loop. Dropping it stops the loop.
pub struct ReceiveLoop {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    stats: Arc<AtomicCell<StageStats>>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveLoop {
    /// Bind `config.bind` and start listening.
    ///
    /// Valid frames go to `live` and, while a session is open, to `tap`.
    pub fn bind(
        config: &ReceiveConfig,
        layout: Arc<SharedLayout>,
        live: Arc<LiveState>,
        tap: Option<Arc<Recorder>>,
        events: Sender<LinkEvent>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("Listening for tracking data on {}", local_addr);

        let running = Arc::new(AtomicBool::new(true));
        let muted = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(AtomicCell::new(StageStats::default()));

        let mut stage = DecodeStage::new(live);
        if let Some(recorder) = tap {
            stage = stage.with_tap(recorder);
        }
        let worker = ReceiveWorker {
            config: config.clone(),
            listener,
            layout,
            stage,
            events,
            running: running.clone(),
            muted: muted.clone(),
            stats: stats.clone(),
        };
        let handle = thread::Builder::new()
            .name("facelink-receive".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            local_addr,
            running,
            muted,
            stats,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Keep draining the socket but stop applying frames.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StageStats {
        self.stats.load()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Receive thread panicked");
            }
        }
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReceiveWorker {
    config: ReceiveConfig,
    listener: TcpListener,
    layout: Arc<SharedLayout>,
    stage: DecodeStage,
    events: Sender<LinkEvent>,
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    stats: Arc<AtomicCell<StageStats>>,
}

impl ReceiveWorker {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.serve(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.config.accept_poll());
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    thread::sleep(self.config.accept_poll());
                }
            }
        }
        debug!("Receive loop exiting");
    }

    fn prepare(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.read_timeout()))?;
        stream.set_nodelay(true)
    }

    fn serve(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.prepare(&stream) {
            warn!("Could not configure connection from {}: {}", peer, e);
            return;
        }
        info!("Accepted tracking peer {}", peer);
        self.stage.live().reset_sequence_for(self.stage.feed());
        let _ = self.events.send(LinkEvent::PeerAccepted(peer));

        let mut source = LiveSource::new(Box::new(stream), self.layout.clone());
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            let mut frames = FrameSource::Live(&mut source);
            let outcome = if self.muted.load(Ordering::Acquire) {
                DecodeStage::discard(&mut frames, now)
            } else {
                self.stage.pump(&mut frames, now, 1)
            };
            self.stats.store(self.stage.stats());
            if outcome.ended {
                break;
            }
        }

        info!("Tracking peer {} disconnected", peer);
        let _ = self.events.send(LinkEvent::PeerClosed(peer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FaceSample, LayoutParams, StreamLayout};
    use crate::stream::codec;
    use crossbeam::channel;
    use std::io::Write;
    use std::time::Duration;

    fn config() -> ReceiveConfig {
        ReceiveConfig {
            bind: "127.0.0.1:0".into(),
            read_timeout_ms: 20,
            tracking_timeout_ms: 500,
            accept_poll_ms: 5,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_receives_split_frames_and_reports_close() {
        let layout = StreamLayout::new(&LayoutParams {
            blend_shape_count: 4,
            ..Default::default()
        })
        .unwrap();
        let shared = SharedLayout::new(layout.clone());
        let live = Arc::new(LiveState::new(Duration::from_secs(1)));
        let (tx, rx) = channel::unbounded();
        let mut receiver = ReceiveLoop::bind(&config(), shared, live.clone(), None, tx).unwrap();

        let mut sample = FaceSample::new(4);
        sample.blend_shapes = vec![0.1, 0.2, 0.3, 0.4];
        sample.frame_number = 7;
        let mut frame = vec![0u8; layout.total_frame_size];
        codec::encode(&sample, &layout, &mut frame).unwrap();

        let mut peer = TcpStream::connect(receiver.local_addr()).unwrap();
        let (head, tail) = frame.split_at(10);
        peer.write_all(head).unwrap();
        peer.flush().unwrap();
        thread::sleep(Duration::from_millis(30));
        peer.write_all(tail).unwrap();

        assert!(wait_for(|| live.sequence() == 1));
        let snap = live.snapshot(Instant::now());
        assert_eq!(snap.blend_shapes, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(snap.frame_number, Some(7));

        drop(peer);
        assert!(wait_for(|| rx
            .try_iter()
            .any(|e| matches!(e, LinkEvent::PeerClosed(_)))));
        assert_eq!(receiver.stats().applied, 1);
        receiver.stop();
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_muted_receiver_drains_without_applying() {
        let layout = StreamLayout::new(&LayoutParams {
            blend_shape_count: 1,
            ..Default::default()
        })
        .unwrap();
        let live = Arc::new(LiveState::new(Duration::from_secs(1)));
        let (tx, _rx) = channel::unbounded();
        let receiver =
            ReceiveLoop::bind(&config(), SharedLayout::new(layout.clone()), live.clone(), None, tx)
                .unwrap();
        receiver.set_muted(true);

        let mut frame = vec![0u8; layout.total_frame_size];
        codec::encode(&FaceSample::new(1), &layout, &mut frame).unwrap();
        let mut peer = TcpStream::connect(receiver.local_addr()).unwrap();
        for _ in 0..3 {
            peer.write_all(&frame).unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(live.sequence(), 0);
    }
}
