//! Recording, playback and baking of captured takes.
//!
//! Frames received live can be recorded into an immutable
//! [`RecordedStream`], saved as a `.fcr` file, replayed through the same
//! decode path as live data, or baked into fixed-rate keyframe curves.
//!
//! # File Format
//!
//! ```text
//! Header (32 bytes + name):
//!   Magic: "FCRS" (4 bytes)
//!   Version: u16
//!   Flags: u16 (frame number, frame time, active flag)
//!   Blend shape count: u32
//!   Sentinel: u8, reserved (3 bytes)
//!   Frame size: u32
//!   Frame count: u64
//!   Name length: u16, reserved (2 bytes)
//!   Name: UTF-8
//!
//! Frame data:
//!   frame_count * frame_size bytes, each frame exactly as sent on the wire
//! ```

mod baker;
mod curve;
mod format;
mod player;
mod pool;
mod recorder;

pub use baker::{BakeError, BakeOptions, BakeReport, SampleRate, bake};
pub use curve::{AnimationClip, ClipSink, Curve, Keyframe};
pub use format::{LayoutFlags, RECORDING_MAGIC, RECORDING_VERSION, RecordingHeader};
pub use player::{PlaybackEngine, PlaybackError, PlaybackState};
pub use pool::{BufferPool, TopUpWorker};
pub use recorder::{RecordedStream, Recorder, RecordingError, RecordingLibrary};
