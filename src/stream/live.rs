//! Decoded live state shared with renderers.
//!
//! One decode stage writes, any number of renderers read snapshots. The
//! state is owned explicitly and passed around as an `Arc`. Which stage may
//! write is decided by the current [`Feed`]: samples from any other feed are
//! turned away under the same lock that applies them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::schema::{FaceSample, Pose, StreamLayout};

/// Where samples written to a [`LiveState`] come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Feed {
    /// Frames from the receive loop.
    #[default]
    Live,
    /// Frames from a recorded take.
    Playback,
}

/// Outcome of [`LiveState::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Applied,
    /// The frame number went backwards; the sample was ignored.
    Stale,
    /// The sample came from a feed that does not own the state.
    Muted,
}

/// Copy of the live state handed to renderers.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub blend_shapes: Vec<f32>,
    pub head_pose: Pose,
    pub camera_pose: Pose,
    pub frame_number: Option<i32>,
    pub frame_time: Option<f32>,
    /// Tracking reported active and frames still arriving.
    pub tracking_active: bool,
    /// Number of samples applied so far; zero until the first frame.
    pub sequence: u64,
}

#[derive(Debug)]
struct Inner {
    feed: Feed,
    sample: FaceSample,
    has_frame_number: bool,
    has_frame_time: bool,
    has_active_flag: bool,
    last_frame_number: Option<i32>,
    last_update: Option<Instant>,
}

#[derive(Debug)]
pub struct LiveState {
    inner: RwLock<Inner>,
    sequence: AtomicU64,
    tracking_timeout: Duration,
}

impl LiveState {
    /// `tracking_timeout` is how long tracking stays active without a new frame.
    pub fn new(tracking_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                feed: Feed::Live,
                sample: FaceSample::default(),
                has_frame_number: false,
                has_frame_time: false,
                has_active_flag: false,
                last_frame_number: None,
                last_update: None,
            }),
            sequence: AtomicU64::new(0),
            tracking_timeout,
        }
    }

    /// Samples applied so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Feed currently allowed to write.
    pub fn feed(&self) -> Feed {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).feed
    }

    /// Give the state to `feed` and forget the last frame number. Samples
    /// from the previous feed that are still in flight are rejected.
    pub fn hand_over(&self, feed: Feed) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.feed = feed;
        inner.last_frame_number = None;
    }

    /// Forget the last frame number, e.g. when a new peer connects or
    /// playback restarts from frame 0.
    pub fn reset_sequence(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.last_frame_number = None;
    }

    /// Like [`reset_sequence`](Self::reset_sequence), but only while `feed`
    /// owns the state.
    pub fn reset_sequence_for(&self, feed: Feed) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.feed == feed {
            inner.last_frame_number = None;
        }
    }

    /// Apply a freshly decoded sample from `feed`.
    ///
    /// Frame numbers are compared with wrap-around, so a peer counter that
    /// rolls over past `i32::MAX` keeps being applied.
    pub fn publish(
        &self,
        feed: Feed,
        sample: &FaceSample,
        layout: &StreamLayout,
        now: Instant,
    ) -> Publish {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.feed != feed {
            return Publish::Muted;
        }

        if layout.has_frame_number() {
            if let Some(last) = inner.last_frame_number {
                if sample.frame_number.wrapping_sub(last) < 0 {
                    return Publish::Stale;
                }
            }
            inner.last_frame_number = Some(sample.frame_number);
        }

        inner.sample.copy_from(sample);
        inner.has_frame_number = layout.has_frame_number();
        inner.has_frame_time = layout.has_frame_time();
        inner.has_active_flag = layout.has_active_flag();
        inner.last_update = Some(now);
        drop(inner);

        self.sequence.fetch_add(1, Ordering::AcqRel);
        Publish::Applied
    }

    /// Active while frames keep reporting tracking and keep arriving.
    pub fn tracking_active(&self, now: Instant) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Self::derive_active(&inner, self.tracking_timeout, now)
    }

    fn derive_active(inner: &Inner, timeout: Duration, now: Instant) -> bool {
        let fresh = inner
            .last_update
            .is_some_and(|at| now.saturating_duration_since(at) <= timeout);
        let reported = !inner.has_active_flag || inner.sample.tracking_active;
        fresh && reported
    }

    /// Copy the current state into `out`, reusing its allocation.
    pub fn snapshot_into(&self, out: &mut LiveSnapshot, now: Instant) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        out.blend_shapes.clear();
        out.blend_shapes.extend_from_slice(&inner.sample.blend_shapes);
        out.head_pose = inner.sample.head;
        out.camera_pose = inner.sample.camera;
        out.frame_number = inner.has_frame_number.then_some(inner.sample.frame_number);
        out.frame_time = inner.has_frame_time.then_some(inner.sample.frame_time);
        out.tracking_active = Self::derive_active(&inner, self.tracking_timeout, now);
        out.sequence = self.sequence();
    }

    pub fn snapshot(&self, now: Instant) -> LiveSnapshot {
        let mut out = LiveSnapshot::default();
        self.snapshot_into(&mut out, now);
        out
    }
}
