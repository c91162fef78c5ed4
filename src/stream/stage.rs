//! Decode/apply stage shared by live and playback sources.

use std::sync::Arc;
use std::time::Instant;

use log::debug;

use super::codec::{self, CodecError};
use super::live::{Feed, LiveState, Publish};
use super::source::{Advance, FrameSource};
use crate::animation::Recorder;
use crate::schema::{FaceSample, StreamLayout};

/// Running counters for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Frames decoded and published.
    pub applied: u64,
    /// Frames dropped for a bad sentinel or short buffer.
    pub malformed: u64,
    /// Frames ignored because their frame number went backwards.
    pub stale: u64,
    /// Frames turned away because another feed owned the live state.
    pub muted: u64,
    /// Frames the recorder tap refused.
    pub tap_errors: u64,
}

/// Result of one [`DecodeStage::pump`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpOutcome {
    /// Frames published this pump.
    pub applied: usize,
    /// The source reported its end.
    pub ended: bool,
}

/// Decodes frames into a [`LiveState`], optionally mirroring valid frames
/// into a [`Recorder`].
pub struct DecodeStage {
    live: Arc<LiveState>,
    feed: Feed,
    scratch: FaceSample,
    tap: Option<Arc<Recorder>>,
    stats: StageStats,
}

impl DecodeStage {
    /// A stage writing as [`Feed::Live`].
    pub fn new(live: Arc<LiveState>) -> Self {
        Self {
            live,
            feed: Feed::Live,
            scratch: FaceSample::default(),
            tap: None,
            stats: StageStats::default(),
        }
    }

    /// Record every applied frame while the recorder has a session open.
    pub fn with_tap(mut self, recorder: Arc<Recorder>) -> Self {
        self.tap = Some(recorder);
        self
    }

    /// Write as `feed` instead.
    pub fn with_feed(mut self, feed: Feed) -> Self {
        self.feed = feed;
        self
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    pub fn stats(&self) -> StageStats {
        self.stats
    }

    pub fn live(&self) -> &Arc<LiveState> {
        &self.live
    }

    /// Decode one frame and publish it.
    ///
    /// A malformed frame is counted and dropped; the live state keeps its
    /// previous value.
    pub fn apply(
        &mut self,
        frame: &[u8],
        layout: &StreamLayout,
        now: Instant,
    ) -> Result<Publish, CodecError> {
        if let Err(e) = codec::decode(frame, layout, &mut self.scratch) {
            self.stats.malformed += 1;
            debug!("Dropping frame: {}", e);
            return Err(e);
        }

        let outcome = self.live.publish(self.feed, &self.scratch, layout, now);
        match outcome {
            Publish::Applied => {
                self.stats.applied += 1;
                if let Some(recorder) = &self.tap {
                    if recorder.is_recording() {
                        if let Err(e) = recorder.add_data_to_recording(frame, 0) {
                            self.stats.tap_errors += 1;
                            debug!("Recorder refused frame: {}", e);
                        }
                    }
                }
            }
            Publish::Stale => {
                self.stats.stale += 1;
                debug!("Ignoring stale frame {}", self.scratch.frame_number);
            }
            Publish::Muted => {
                self.stats.muted += 1;
            }
        }
        Ok(outcome)
    }

    /// Pull up to `budget` frames from `source` and apply them in order.
    pub fn pump(&mut self, source: &mut FrameSource<'_>, now: Instant, budget: usize) -> PumpOutcome {
        let mut outcome = PumpOutcome::default();
        for _ in 0..budget {
            match source.advance(now) {
                Advance::Frame { bytes, layout } => {
                    if let Ok(Publish::Applied) = self.apply(bytes, layout, now) {
                        outcome.applied += 1;
                    }
                }
                Advance::Pending => break,
                Advance::Ended => {
                    outcome.ended = true;
                    break;
                }
            }
        }
        outcome
    }

    /// Pull one frame and throw it away, keeping the source drained while
    /// the stage is muted.
    pub fn discard(source: &mut FrameSource<'_>, now: Instant) -> PumpOutcome {
        match source.advance(now) {
            Advance::Ended => PumpOutcome {
                applied: 0,
                ended: true,
            },
            _ => PumpOutcome::default(),
        }
    }
}
