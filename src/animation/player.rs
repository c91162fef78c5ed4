//! Playback of recorded takes through the live decode path.

use std::sync::Arc;
use std::time::Instant;

use log::info;

use super::recorder::RecordedStream;
use crate::schema::CatchUp;
use crate::stream::{Advance, codec};

/// Playback errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Recording '{0}' has no frames")]
    EmptyStream(String),
    #[error("Recording '{0}' carries no frame time, playback cannot be scheduled")]
    MissingFrameTime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Active,
}

/// Schedules recorded frames against the wall clock.
///
/// Frame `i` becomes due once the time since [`start`](Self::start) reaches
/// its frame time minus the first frame's. [`advance`](Self::advance) hands
/// out at most one due frame per call; how many calls a host tick makes is
/// its [`CatchUp`] policy.
#[derive(Debug, Default)]
pub struct PlaybackEngine {
    stream: Option<Arc<RecordedStream>>,
    state: PlaybackState,
    catch_up: CatchUp,
    next: usize,
    current: Option<usize>,
    origin: f64,
    started_at: Option<Instant>,
    stream_time: f64,
}

impl PlaybackEngine {
    pub fn new(catch_up: CatchUp) -> Self {
        Self {
            catch_up,
            ..Default::default()
        }
    }

    /// Seek to frame 0 and start the clock at `now`.
    pub fn start(&mut self, stream: Arc<RecordedStream>, now: Instant) -> Result<(), PlaybackError> {
        let layout = stream.layout();
        if !layout.has_frame_time() {
            return Err(PlaybackError::MissingFrameTime(stream.name().to_owned()));
        }
        let first = stream
            .frame(0)
            .and_then(|frame| codec::read_frame_time(frame, layout))
            .ok_or_else(|| PlaybackError::EmptyStream(stream.name().to_owned()))?;

        info!(
            "Playing '{}' ({} frames, {:?})",
            stream.name(),
            stream.frame_count(),
            self.catch_up
        );
        self.origin = f64::from(first);
        self.stream = Some(stream);
        self.state = PlaybackState::Active;
        self.next = 0;
        self.current = None;
        self.started_at = Some(now);
        self.stream_time = 0.0;
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state == PlaybackState::Active {
            info!("Playback stopped at frame {:?}", self.current);
        }
        self.state = PlaybackState::Stopped;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == PlaybackState::Active
    }

    pub fn catch_up(&self) -> CatchUp {
        self.catch_up
    }

    pub fn set_catch_up(&mut self, catch_up: CatchUp) {
        self.catch_up = catch_up;
    }

    /// Frames a host tick may pull under the current policy.
    pub fn frames_per_tick(&self) -> usize {
        self.catch_up.frames_per_tick()
    }

    pub fn stream(&self) -> Option<&Arc<RecordedStream>> {
        self.stream.as_ref()
    }

    /// Index of the last frame handed out.
    pub fn current_frame(&self) -> Option<usize> {
        self.current
    }

    pub fn frame_count(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.frame_count())
    }

    /// Fraction of frames handed out, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        match (self.current, self.frame_count()) {
            (Some(i), n) if n > 0 => (i + 1) as f32 / n as f32,
            _ => 0.0,
        }
    }

    /// Stream time of the last frame handed out, relative to frame 0.
    pub fn stream_time(&self) -> f32 {
        self.stream_time as f32
    }

    /// Hand out the next frame if it is due at `now`.
    ///
    /// Playback stops right after the last frame is handed out; the call
    /// after that reports [`Advance::Ended`].
    pub fn advance(&mut self, now: Instant) -> Advance<'_> {
        if self.state != PlaybackState::Active {
            return Advance::Ended;
        }
        let Some(stream) = self.stream.as_deref() else {
            self.state = PlaybackState::Stopped;
            return Advance::Ended;
        };
        let Some(frame) = stream.frame(self.next) else {
            self.state = PlaybackState::Stopped;
            return Advance::Ended;
        };

        let layout = stream.layout();
        let due = codec::read_frame_time(frame, layout).map_or(0.0, |t| f64::from(t) - self.origin);
        let elapsed = self
            .started_at
            .map_or(0.0, |at| now.saturating_duration_since(at).as_secs_f64());
        if elapsed < due {
            return Advance::Pending;
        }

        self.current = Some(self.next);
        self.next += 1;
        self.stream_time = due;
        if self.next >= stream.frame_count() {
            info!("Playback of '{}' finished", stream.name());
            self.state = PlaybackState::Stopped;
        }
        Advance::Frame {
            bytes: frame,
            layout,
        }
    }
}
