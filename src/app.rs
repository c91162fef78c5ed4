//! Explicit application loop tying the pieces together.
//!
//! Each [`App::tick`] runs three phases in a fixed order: background status
//! (link events from the socket threads), the playback scheduler, then the
//! renderers. Socket I/O happens on its own threads and never blocks a tick.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use log::{info, warn};

use crate::animation::{PlaybackEngine, PlaybackError, RecordedStream, Recorder, RecordingError};
use crate::schema::{ConfigError, FacelinkConfig, LayoutError, LayoutParams, SharedLayout};
use crate::stream::{
    DecodeStage, Feed, FrameSource, LinkEvent, LinkStatus, LiveSnapshot, LiveState, ReceiveLoop,
};

/// Where the live state currently comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Playback,
}

/// Consumer of the live state, called once per tick.
pub trait Renderer {
    fn render(&mut self, snapshot: &LiveSnapshot);
}

impl<F: FnMut(&LiveSnapshot)> Renderer for F {
    fn render(&mut self, snapshot: &LiveSnapshot) {
        self(snapshot)
    }
}

pub struct App {
    config: FacelinkConfig,
    layout: Arc<SharedLayout>,
    live: Arc<LiveState>,
    recorder: Arc<Recorder>,
    receiver: Option<ReceiveLoop>,
    events_tx: Sender<LinkEvent>,
    events_rx: Receiver<LinkEvent>,
    status: LinkStatus,
    mode: Mode,
    playback: PlaybackEngine,
    stage: DecodeStage,
    renderers: Vec<Box<dyn Renderer>>,
    snapshot: LiveSnapshot,
}

impl App {
    pub fn new(config: FacelinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = SharedLayout::new(config.stream_layout()?);
        let live = Arc::new(LiveState::new(config.receive.tracking_timeout()));
        let recorder = Arc::new(Recorder::new(config.recorder.clone()));
        let (events_tx, events_rx) = channel::unbounded();
        let playback = PlaybackEngine::new(config.playback.catch_up);
        let stage = DecodeStage::new(live.clone()).with_feed(Feed::Playback);

        Ok(Self {
            config,
            layout,
            live,
            recorder,
            receiver: None,
            events_tx,
            events_rx,
            status: LinkStatus::default(),
            mode: Mode::Live,
            playback,
            stage,
            renderers: Vec::new(),
            snapshot: LiveSnapshot::default(),
        })
    }

    /// Start the receive loop; received frames also feed the recorder.
    pub fn listen(&mut self) -> io::Result<SocketAddr> {
        let receiver = ReceiveLoop::bind(
            &self.config.receive,
            self.layout.clone(),
            self.live.clone(),
            Some(self.recorder.clone()),
            self.events_tx.clone(),
        )?;
        receiver.set_muted(self.mode == Mode::Playback);
        let addr = receiver.local_addr();
        self.receiver = Some(receiver);
        Ok(addr)
    }

    /// Sender for socket loops started outside the app (e.g. capture).
    pub fn events(&self) -> Sender<LinkEvent> {
        self.events_tx.clone()
    }

    pub fn add_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderers.push(renderer);
    }

    pub fn config(&self) -> &FacelinkConfig {
        &self.config
    }

    pub fn layout(&self) -> &Arc<SharedLayout> {
        &self.layout
    }

    pub fn live(&self) -> &Arc<LiveState> {
        &self.live
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn receiver(&self) -> Option<&ReceiveLoop> {
        self.receiver.as_ref()
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn playback(&self) -> &PlaybackEngine {
        &self.playback
    }

    /// Swap the stream layout. An open take is finished first since its
    /// frames would no longer match.
    pub fn set_layout(&mut self, params: &LayoutParams) -> Result<(), LayoutError> {
        self.force_finish_recording("layout change");
        let layout = self.layout.reconfigure(params)?;
        self.config.layout = *params;
        info!("Layout now {} bytes per frame", layout.total_frame_size);
        Ok(())
    }

    /// Open a new take with the current layout. Returns its take number.
    pub fn start_recording(&self) -> Result<u32, RecordingError> {
        let take = self.recorder.next_take_number();
        self.recorder.start_recording(&self.layout.get(), take)?;
        Ok(take)
    }

    pub fn finish_recording(&self) -> Result<Option<Arc<RecordedStream>>, RecordingError> {
        self.recorder.finish_recording()
    }

    fn force_finish_recording(&self, reason: &str) {
        if !self.recorder.is_recording() {
            return;
        }
        info!("Finishing recording ({})", reason);
        if let Err(e) = self.recorder.finish_recording() {
            warn!("Could not finish recording: {}", e);
        }
    }

    /// Replace live input with `stream`, starting at `now`.
    ///
    /// The live state is handed to playback before the receiver is muted, so
    /// a live frame already being read when playback starts is turned away.
    pub fn start_playback(&mut self, stream: Arc<RecordedStream>, now: Instant) -> Result<(), PlaybackError> {
        self.force_finish_recording("playback started");
        self.playback.start(stream, now)?;
        self.live.hand_over(Feed::Playback);
        if let Some(receiver) = &self.receiver {
            receiver.set_muted(true);
        }
        self.mode = Mode::Playback;
        Ok(())
    }

    pub fn stop_playback(&mut self) {
        self.playback.stop();
        self.enter_live();
    }

    fn enter_live(&mut self) {
        if self.mode == Mode::Live {
            return;
        }
        self.live.hand_over(Feed::Live);
        if let Some(receiver) = &self.receiver {
            receiver.set_muted(false);
        }
        self.mode = Mode::Live;
        info!("Back to live input");
    }

    /// Run one application cycle.
    pub fn tick(&mut self, now: Instant) {
        self.tick_background_status();
        self.tick_playback(now);
        self.tick_renderers(now);
    }

    fn tick_background_status(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.status.apply(event);
            match event {
                LinkEvent::PeerClosed(peer) => {
                    info!("Peer {} closed", peer);
                    self.force_finish_recording("peer closed");
                }
                LinkEvent::TimedOut => {
                    warn!("Link timed out");
                    self.force_finish_recording("link timed out");
                }
                _ => {}
            }
        }
    }

    fn tick_playback(&mut self, now: Instant) {
        if self.mode != Mode::Playback {
            return;
        }
        let budget = self.playback.frames_per_tick();
        let outcome = self
            .stage
            .pump(&mut FrameSource::Playback(&mut self.playback), now, budget);
        if outcome.ended {
            self.enter_live();
        }
    }

    fn tick_renderers(&mut self, now: Instant) {
        if self.renderers.is_empty() {
            return;
        }
        self.live.snapshot_into(&mut self.snapshot, now);
        for renderer in &mut self.renderers {
            renderer.render(&self.snapshot);
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.force_finish_recording("shutdown");
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
    }
}
